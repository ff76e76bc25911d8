//! Typed error hierarchy for the shipyard orchestrator.
//!
//! One enum per subsystem:
//! - `ChannelError`: remote command channel (connectivity, transfer, timeouts)
//! - `PipelineError`: host provisioning failures that abort the remaining steps
//! - `MigrationError` / `FunctionDeployError`: pipeline-level failures of the
//!   migration and function pipelines (per-unit failures are report values)
//! - `LedgerError`: deployment ledger access
//! - `RequestError`: malformed invocation events
//!
//! Non-fatal outcomes (proxy validation failure, deferred certificates,
//! per-unit migration failures) are not errors; see `proxy::ActivationOutcome`,
//! `proxy::CertificateOutcome` and `migrate::MigrationReport`.

use thiserror::Error;

/// Errors from the remote command channel.
///
/// Authentication failures, unreachable hosts and malformed key material are
/// all connectivity failures; the variant keeps them distinguishable.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Invalid SSH private key: {0}")]
    KeyParse(String),

    #[error("Host {host} is unreachable: {message}")]
    Unreachable { host: String, message: String },

    #[error("Authentication failed for {user}@{host}: {message}")]
    AuthFailed {
        user: String,
        host: String,
        message: String,
    },

    #[error("Command timed out after {secs}s: {command}")]
    Timeout { command: String, secs: u64 },

    #[error("Failed to write {path} on remote host: {message}")]
    Transfer { path: String, message: String },

    #[error("Failed to launch detached command: {message}")]
    Launch { message: String },

    #[error("Failed to run ssh client: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Session is closed")]
    Closed,
}

/// Errors that abort the host provisioning pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Target {name} not found")]
    TargetNotFound { name: String },

    #[error("Target {name} is not bound to a host")]
    NotBound { name: String },

    #[error("SSH key missing for target {name}")]
    MissingKey { name: String },

    #[error("SSH connection failed: {0}")]
    Connectivity(#[from] ChannelError),

    #[error("Required tool {tool} is missing and could not be installed: {stderr}")]
    Tooling { tool: String, stderr: String },

    #[error("Command exited with {exit_code}: {command}: {stderr}")]
    Command {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors that stop the migration pipeline before or between units.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Repository {repo} is unavailable: {message}")]
    RepositoryUnavailable { repo: String, message: String },

    #[error("Failed to read migration {name}: {message}")]
    Fetch { name: String, message: String },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the serverless function platform and the function source.
#[derive(Debug, Error)]
pub enum FunctionDeployError {
    #[error("Cloud quota exhausted: {message}")]
    QuotaExceeded { message: String },

    #[error("Function platform rejected {operation} (HTTP {status}): {body}")]
    Platform {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("Cloud authentication failed: {0}")]
    Auth(String),

    #[error("Function source error: {0}")]
    Source(#[source] anyhow::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors turning an invocation event into a pipeline request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Missing required parameter {0}")]
    MissingParam(&'static str),

    #[error("Invalid parameter {name}: {message}")]
    InvalidParam { name: String, message: String },

    #[error("Invalid event: {0}")]
    InvalidEvent(String),
}

/// Errors from the deployment ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid schema name '{0}'")]
    InvalidSchema(String),

    #[error("Database URL is not configured")]
    NotConfigured,
}
