//! Layered configuration for shipyard.
//!
//! Values are resolved in order: built-in defaults, then `shipyard.toml`,
//! then environment variables (a `.env` file is loaded by the binary before
//! this runs), then CLI flags applied by the command layer.
//!
//! # Configuration File Format
//!
//! ```toml
//! [database]
//! url = "postgres://deploy@db.internal/main"
//! schema = "public"
//!
//! [github]
//! manifest_path = "backend/func2url.json"
//! manifest_branch = "main"
//!
//! [ssh]
//! connect_timeout_secs = 30
//! command_timeout_secs = 30
//! install_timeout_secs = 120
//! default_user = "ubuntu"
//!
//! [proxy]
//! sites_available = "/etc/nginx/sites-available"
//! sites_enabled = "/etc/nginx/sites-enabled"
//!
//! [functions]
//! runtime = "python311"
//! memory_bytes = 268435456
//! execution_timeout_secs = 600
//! default_batch_size = 5
//! ```
//!
//! Secrets (`GITHUB_TOKEN`, `YANDEX_CLOUD_TOKEN`, `DATABASE_URL`) normally come
//! from the environment rather than the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "shipyard.toml";

const MASK: &str = "****";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub schema: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            schema: "public".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    pub token: Option<String>,
    pub api_base: String,
    /// Repository path of the function URL manifest.
    pub manifest_path: String,
    pub manifest_branch: String,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_base: crate::github::DEFAULT_API_BASE.to_string(),
            manifest_path: "backend/func2url.json".to_string(),
            manifest_branch: "main".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub connect_timeout_secs: u64,
    pub command_timeout_secs: u64,
    /// Package installs and repository clones.
    pub install_timeout_secs: u64,
    pub default_user: String,
    pub ssh_bin: String,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            command_timeout_secs: 30,
            install_timeout_secs: 120,
            default_user: "ubuntu".to_string(),
            ssh_bin: "ssh".to_string(),
        }
    }
}

impl SshConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub sites_available: String,
    pub sites_enabled: String,
    pub log_dir: String,
    /// Parent of every project directory; the serving root is `<web_root>/<domain>/html`.
    pub web_root: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            sites_available: "/etc/nginx/sites-available".to_string(),
            sites_enabled: "/etc/nginx/sites-enabled".to_string(),
            log_dir: "/var/log/nginx".to_string(),
            web_root: "/var/www".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificateConfig {
    pub timeout_secs: u64,
}

impl Default for CertificateConfig {
    fn default() -> Self {
        Self { timeout_secs: 120 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionsConfig {
    pub oauth_token: Option<String>,
    pub iam_url: String,
    pub resource_manager_url: String,
    pub functions_url: String,
    pub invoke_base_url: String,
    pub runtime: String,
    pub entrypoint: String,
    pub memory_bytes: u64,
    pub execution_timeout_secs: u64,
    pub default_batch_size: usize,
    /// Directory in the source repository holding one sub-directory per function.
    pub source_dir: String,
    /// Error substring the platform uses when a resource quota is exhausted.
    pub quota_marker: String,
    pub create_settle_secs: u64,
}

impl Default for FunctionsConfig {
    fn default() -> Self {
        Self {
            oauth_token: None,
            iam_url: "https://iam.api.cloud.yandex.net/iam/v1/tokens".to_string(),
            resource_manager_url: "https://resource-manager.api.cloud.yandex.net/resource-manager/v1"
                .to_string(),
            functions_url: "https://serverless-functions.api.cloud.yandex.net/functions/v1"
                .to_string(),
            invoke_base_url: "https://functions.yandexcloud.net".to_string(),
            runtime: "python311".to_string(),
            entrypoint: "index.handler".to_string(),
            memory_bytes: 268_435_456,
            execution_timeout_secs: 600,
            default_batch_size: 5,
            source_dir: "backend".to_string(),
            quota_marker: "Quota limit".to_string(),
            create_settle_secs: 2,
        }
    }
}

/// Fully resolved configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShipyardConfig {
    pub database: DatabaseConfig,
    pub github: GithubConfig,
    pub ssh: SshConfig,
    pub proxy: ProxyConfig,
    pub certificate: CertificateConfig,
    pub functions: FunctionsConfig,
    /// File the values were read from, if any.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl ShipyardConfig {
    /// Load defaults, the config file (explicit path or `./shipyard.toml`), and
    /// the process environment.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Path::new(CONFIG_FILE_NAME);
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid shipyard.toml")
    }

    /// Overlay environment values. `lookup` abstracts the environment so tests
    /// can supply a map.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty("DATABASE_URL") {
            self.database.url = Some(url);
        }
        if let Some(schema) = non_empty("MAIN_DB_SCHEMA") {
            self.database.schema = schema;
        }
        if let Some(token) = non_empty("GITHUB_TOKEN") {
            self.github.token = Some(token);
        }
        if let Some(token) = non_empty("YANDEX_CLOUD_TOKEN") {
            self.functions.oauth_token = Some(token);
        }
        if let Some(user) = non_empty("SHIPYARD_SSH_USER") {
            self.ssh.default_user = user;
        }
    }

    /// Render as TOML with secrets masked, for `shipyard config show`.
    pub fn to_masked_toml(&self) -> Result<String> {
        let mut masked = self.clone();
        if masked.database.url.is_some() {
            masked.database.url = Some(mask_database_url(
                masked.database.url.as_deref().unwrap_or_default(),
            ));
        }
        if masked.github.token.is_some() {
            masked.github.token = Some(MASK.to_string());
        }
        if masked.functions.oauth_token.is_some() {
            masked.functions.oauth_token = Some(MASK.to_string());
        }
        toml::to_string_pretty(&masked).context("Failed to render configuration")
    }

    /// Default file content for `shipyard config init`.
    pub fn default_toml() -> Result<String> {
        toml::to_string_pretty(&Self::default()).context("Failed to render default configuration")
    }
}

/// Hide the password portion of a database URL.
fn mask_database_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some(MASK));
            }
            parsed.to_string()
        }
        Err(_) => MASK.to_string(),
    }
}
