//! Migration applier.
//!
//! Applies SQL units in filename order against a database whose ledger table
//! records applied version tokens. Each unit is its own unit of work: a failure
//! is recorded and the run moves on to the next unit.

pub mod github_source;
pub mod postgres;

use crate::errors::{LedgerError, MigrationError};
use crate::report::{Outcome, RunLog};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

pub use github_source::GithubMigrationSource;
pub use postgres::PgExecutor;

/// Longest error text kept per failed unit.
pub const MAX_ERROR_LEN: usize = 200;

/// Version token of a migration file: the part before the first `__`, or the
/// whole name when there is no separator.
pub fn version_token(file_name: &str) -> &str {
    match file_name.find("__") {
        Some(idx) => &file_name[..idx],
        None => file_name,
    }
}

/// A named SQL script, not yet fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationUnit {
    pub file_name: String,
    /// Source-specific locator (a repository path for the GitHub source).
    pub location: String,
}

impl MigrationUnit {
    pub fn new(file_name: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            location: location.into(),
        }
    }

    pub fn version(&self) -> &str {
        version_token(&self.file_name)
    }
}

/// Schema objects whose "already exists" errors count as applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistingObject {
    Table,
    Object,
}

/// Failure of a single unit's SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitExecError {
    AlreadyExists(ExistingObject),
    Failed(String),
}

/// Executes migration SQL and maintains the version ledger.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn ensure_ledger(&self) -> Result<(), LedgerError>;
    async fn applied_versions(&self) -> Result<BTreeSet<String>, LedgerError>;
    /// Run one unit's full text as a single batch with autocommit semantics.
    async fn execute_unit(&self, sql: &str) -> Result<(), UnitExecError>;
    /// Record a version; recording an existing version is a no-op.
    async fn record_version(&self, version: &str) -> Result<(), LedgerError>;
}

/// Supplies migration units and their content.
#[async_trait]
pub trait MigrationSource: Send + Sync {
    /// Units in any order; `Ok(None)` when the source has no migrations directory.
    async fn list_units(&mut self) -> Result<Option<Vec<MigrationUnit>>, MigrationError>;
    async fn fetch(&self, unit: &MigrationUnit) -> Result<String, MigrationError>;
}

/// Per-run counts and names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Names of units whose SQL ran and was recorded in this run.
    #[serde(rename = "migrations_applied")]
    pub applied: Vec<String>,
    pub skipped: Vec<String>,
    /// File name to truncated error text.
    pub failed: BTreeMap<String, String>,
    pub applied_count: usize,
    pub skipped_count: usize,
    pub failed_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl MigrationReport {
    fn finish(mut self) -> Self {
        self.applied_count = self.applied.len();
        self.skipped_count = self.skipped.len();
        self.failed_count = self.failed.len();
        self
    }
}

/// Cut an error message to `MAX_ERROR_LEN` characters.
pub fn truncate_error(message: &str) -> String {
    message.chars().take(MAX_ERROR_LEN).collect()
}

/// Apply every unapplied unit.
///
/// Only ledger setup errors abort the run; per-unit failures are reported.
pub async fn apply_all(
    units: Vec<MigrationUnit>,
    source: &dyn MigrationSource,
    executor: &dyn SqlExecutor,
    log: &mut RunLog,
) -> Result<MigrationReport, MigrationError> {
    let mut report = MigrationReport::default();
    let mut units = units;
    units.sort_by(|a, b| a.file_name.cmp(&b.file_name));

    if units.is_empty() {
        log.info("No SQL files found in db_migrations/");
        report.message = Some("No migrations found".to_string());
        return Ok(report.finish());
    }

    executor.ensure_ledger().await?;
    let mut applied = executor.applied_versions().await?;
    log.info(format!("Already applied: {}", applied.len()));
    log.blank();

    // Version token to the file that claimed it in this run.
    let mut claimed: BTreeMap<String, String> = BTreeMap::new();

    for unit in &units {
        let version = unit.version().to_string();

        if applied.contains(&version) {
            match claimed.get(&version) {
                Some(first) => log.warn(format!(
                    "{} skipped: version {} already claimed by {}",
                    unit.file_name, version, first
                )),
                None => log.info(format!("{} (already applied)", unit.file_name)),
            }
            report.skipped.push(unit.file_name.clone());
            continue;
        }

        log.info(format!("Applying {}...", unit.file_name));

        let sql = match source.fetch(unit).await {
            Ok(sql) => sql,
            Err(e) => {
                let message = truncate_error(&e.to_string());
                log.error(format!("  Failed to read: {}", message));
                report.failed.insert(unit.file_name.clone(), message);
                continue;
            }
        };

        let existing = match executor.execute_unit(&sql).await {
            Ok(()) => None,
            Err(UnitExecError::AlreadyExists(kind)) => Some(kind),
            Err(UnitExecError::Failed(message)) => {
                let message = truncate_error(&message);
                log.error(format!("  Error: {}", message));
                report.failed.insert(unit.file_name.clone(), message);
                continue;
            }
        };

        // The SQL ran but the version is unrecorded; the unit is retried next run.
        if let Err(e) = executor.record_version(&version).await {
            let message = truncate_error(&e.to_string());
            log.error(format!("  Failed to record version {}: {}", version, message));
            report.failed.insert(unit.file_name.clone(), message);
            continue;
        }

        match existing {
            None => {
                log.success("  Applied");
                report.applied.push(unit.file_name.clone());
            }
            Some(kind) => {
                let what = match kind {
                    ExistingObject::Table => "table",
                    ExistingObject::Object => "object",
                };
                log.info(format!("  Skipped ({} already exists)", what));
                report.skipped.push(unit.file_name.clone());
            }
        }

        applied.insert(version.clone());
        claimed.insert(version, unit.file_name.clone());
    }

    let report = report.finish();
    log.blank();
    log.success(format!("Applied: {}", report.applied_count));
    log.info(format!("Skipped: {}", report.skipped_count));
    if report.failed_count > 0 {
        log.warn(format!("Failed: {}", report.failed_count));
    } else {
        log.info("Failed: 0");
    }
    Ok(report)
}

/// Discover units from `source` and apply them.
///
/// A source without a migrations directory is a successful empty run.
pub async fn run_migrations(
    source: &mut dyn MigrationSource,
    executor: &dyn SqlExecutor,
    mut log: RunLog,
) -> Outcome<MigrationReport> {
    let units = match source.list_units().await {
        Ok(Some(units)) => units,
        Ok(None) => {
            log.info("db_migrations/ not found");
            let report = MigrationReport {
                message: Some("No migrations found".to_string()),
                ..Default::default()
            };
            return Outcome::ok(log, report.finish());
        }
        Err(e) => return Outcome::failed(log, e, None),
    };
    log.info(format!("Found {} migration files", units.len()));

    match apply_all(units, source, executor, &mut log).await {
        Ok(report) => Outcome::ok(log, report),
        Err(e) => Outcome::failed(log, e, None),
    }
}
