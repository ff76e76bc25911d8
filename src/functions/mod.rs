//! Batched serverless function deployment.
//!
//! One invocation deploys the slice `[offset, offset + batch_size)` of the
//! sorted function list and reports the offset to resume from. Callers loop
//! until `has_more` is false; each unit lands in exactly one slice.

pub mod bundle;
pub mod manifest;
pub mod platform;
pub mod source;
pub mod yandex;

use crate::config::FunctionsConfig;
use crate::errors::FunctionDeployError;
use crate::report::{Outcome, RunLog};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::str::FromStr;

pub use bundle::FunctionCode;
pub use manifest::{GithubManifest, ManifestStore, UrlMap, sync_manifest};
pub use platform::{FunctionPlatform, RemoteFunction, VersionSpec};
pub use source::{FunctionSource, GithubFunctionSource};
pub use yandex::YandexFunctions;

/// Progress through the ordered function list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchCursor {
    pub offset: usize,
    pub batch_size: usize,
    pub total: usize,
}

impl BatchCursor {
    pub fn new(offset: usize, batch_size: usize, total: usize) -> Self {
        Self {
            offset,
            batch_size,
            total,
        }
    }

    /// Indices of this invocation's slice, clamped to the list.
    pub fn slice_range(&self) -> Range<usize> {
        let start = self.offset.min(self.total);
        let end = self.offset.saturating_add(self.batch_size).min(self.total);
        start..end
    }

    pub fn slice_len(&self) -> usize {
        self.slice_range().len()
    }

    /// Units after this slice.
    pub fn remaining(&self) -> usize {
        self.total - self.slice_range().end
    }

    pub fn has_more(&self) -> bool {
        self.remaining() > 0
    }

    pub fn next_offset(&self) -> Option<usize> {
        self.has_more().then(|| self.slice_range().end)
    }

    /// 1-based batch number for logs.
    pub fn batch_number(&self) -> usize {
        self.offset / self.batch_size.max(1) + 1
    }
}

/// An environment variable injected into every deployed version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub name: String,
    pub value: String,
}

impl FromStr for Secret {
    type Err = String;

    /// Parses `NAME=VALUE`; the value may itself contain `=`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, value) = s
            .split_once('=')
            .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", s))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(format!("secret name is empty in '{}'", s));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(format!("invalid secret name '{}'", name));
        }
        Ok(Self {
            name: name.to_string(),
            value: value.to_string(),
        })
    }
}

/// Caller input for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRequest {
    pub secrets: Vec<Secret>,
    pub batch_size: usize,
    pub offset: usize,
    /// Deploy only the unit with this name.
    pub only: Option<String>,
}

impl BatchRequest {
    pub fn validate(&self) -> Result<(), FunctionDeployError> {
        if self.batch_size == 0 {
            return Err(FunctionDeployError::Other(anyhow::anyhow!(
                "batch size must be at least 1"
            )));
        }
        Ok(())
    }

    fn environment(&self) -> BTreeMap<String, String> {
        self.secrets
            .iter()
            .map(|s| (s.name.clone(), s.value.clone()))
            .collect()
    }
}

/// Fixed runtime parameters of every version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSettings {
    pub runtime: String,
    pub entrypoint: String,
    pub memory_bytes: u64,
    pub execution_timeout_secs: u64,
}

impl From<&FunctionsConfig> for BatchSettings {
    fn from(config: &FunctionsConfig) -> Self {
        Self {
            runtime: config.runtime.clone(),
            entrypoint: config.entrypoint.clone(),
            memory_bytes: config.memory_bytes,
            execution_timeout_secs: config.execution_timeout_secs,
        }
    }
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self::from(&FunctionsConfig::default())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub deployed: Vec<String>,
    pub function_urls: UrlMap,
    pub has_more: bool,
    pub next_offset: Option<usize>,
    pub total_functions: usize,
    /// Offset plus units deployed in this invocation.
    pub deployed_count: usize,
    pub quota_exhausted: bool,
    /// Slice units left untouched after quota exhaustion.
    pub not_attempted: Vec<String>,
    /// Unit name to error text.
    pub failed: BTreeMap<String, String>,
    pub manifest_updated: bool,
}

/// Result of deploying one unit.
enum UnitResult {
    Deployed(String),
    Failed(String),
    QuotaExceeded(String),
}

/// Deploy one slice of the function list.
///
/// Only discovery and the initial platform listing can fail the call. Every
/// per-unit problem is recorded in the report, and quota exhaustion stops the
/// slice while keeping what was already deployed.
pub async fn deploy_batch(
    request: &BatchRequest,
    settings: &BatchSettings,
    source: &mut dyn FunctionSource,
    platform: &dyn FunctionPlatform,
    manifest: Option<&dyn ManifestStore>,
    log: &mut RunLog,
) -> Result<BatchReport, FunctionDeployError> {
    request.validate()?;

    let mut names = source.list_units(log).await?;
    if let Some(only) = &request.only {
        names.retain(|n| n == only);
        log.info(format!("Filter: deploying only {}", only));
    }

    let cursor = BatchCursor::new(request.offset, request.batch_size, names.len());
    log.success(format!("Functions found: {}", cursor.total));

    let slice = &names[cursor.slice_range()];
    if slice.is_empty() {
        log.info(format!("Nothing to deploy at offset {}", request.offset));
    } else if slice.len() < cursor.total {
        let range = cursor.slice_range();
        log.info(format!(
            "Deploying batch {}: functions {}-{} of {}",
            cursor.batch_number(),
            range.start + 1,
            range.end,
            cursor.total
        ));
        log.info(format!("Remaining after this batch: {}", cursor.remaining()));
    } else {
        log.info(format!("Deploying all {} functions at once", slice.len()));
    }

    let mut report = BatchReport {
        has_more: cursor.has_more(),
        next_offset: cursor.next_offset(),
        total_functions: cursor.total,
        ..Default::default()
    };

    if !slice.is_empty() {
        log.info("Checking existing functions...");
        let mut existing: HashMap<String, String> = platform
            .list_functions()
            .await?
            .into_iter()
            .map(|f| (f.name, f.id))
            .collect();
        log.info(format!("  Found on platform: {}", existing.len()));

        let environment = request.environment();
        for (idx, name) in slice.iter().enumerate() {
            log.info(format!("Deploying {}", name));
            match deploy_unit(name, settings, &environment, source, platform, &mut existing, log)
                .await
            {
                UnitResult::Deployed(url) => {
                    log.success(format!("{} deployed: {}", name, url));
                    report.deployed.push(name.clone());
                    report.function_urls.insert(name.clone(), url);
                }
                UnitResult::Failed(message) => {
                    log.error(format!("  {}", message));
                    report.failed.insert(name.clone(), message);
                }
                UnitResult::QuotaExceeded(message) => {
                    log.error(format!("  {}", message));
                    report.failed.insert(name.clone(), message);
                    report.quota_exhausted = true;
                    report.not_attempted = slice[idx + 1..].to_vec();
                    log.blank();
                    log.warn("Cloud quota exhausted, stopping this batch");
                    log.info("Delete unused functions or request a quota increase, then re-run");
                    break;
                }
            }
        }
    }

    report.deployed_count = request.offset + report.deployed.len();

    log.blank();
    log.success(format!(
        "Done. Functions deployed in this batch: {}",
        report.deployed.len()
    ));
    if let Some(next) = report.next_offset {
        log.info(format!(
            "{} functions remain, run again with offset {}",
            cursor.remaining(),
            next
        ));
    }

    if let Some(store) = manifest {
        report.manifest_updated = sync_manifest(store, &report.function_urls, log).await;
    }

    tracing::info!(
        deployed = report.deployed.len(),
        failed = report.failed.len(),
        has_more = report.has_more,
        "Function batch finished"
    );
    Ok(report)
}

async fn deploy_unit(
    name: &str,
    settings: &BatchSettings,
    environment: &BTreeMap<String, String>,
    source: &dyn FunctionSource,
    platform: &dyn FunctionPlatform,
    existing: &mut HashMap<String, String>,
    log: &mut RunLog,
) -> UnitResult {
    let code = match source.load(name).await {
        Ok(Some(code)) => code,
        Ok(None) => return UnitResult::Failed(format!("Skipping {}: cannot read entry script", name)),
        Err(e) => return UnitResult::Failed(format!("Skipping {}: {}", name, e)),
    };

    let content = match code.package() {
        Ok(content) => content,
        Err(e) => return UnitResult::Failed(format!("Failed to package {}: {:#}", name, e)),
    };
    tracing::debug!(function = %name, size = content.len(), digest = %bundle::bundle_digest(&content), "Packaged function");

    let function_id = match existing.get(name) {
        Some(id) => {
            log.info("  Updating existing function");
            id.clone()
        }
        None => {
            log.info("  Creating new function");
            match platform.create_function(name).await {
                Ok(id) => {
                    log.success("  Function created");
                    existing.insert(name.to_string(), id.clone());
                    id
                }
                Err(FunctionDeployError::QuotaExceeded { message }) => {
                    return UnitResult::QuotaExceeded(format!("Create failed: {}", message));
                }
                Err(e) => return UnitResult::Failed(format!("Create failed: {}", e)),
            }
        }
    };

    let spec = VersionSpec {
        runtime: settings.runtime.clone(),
        entrypoint: settings.entrypoint.clone(),
        memory_bytes: settings.memory_bytes,
        execution_timeout_secs: settings.execution_timeout_secs,
        environment: environment.clone(),
        content,
    };
    match platform.create_version(&function_id, &spec).await {
        Ok(()) => {}
        Err(FunctionDeployError::QuotaExceeded { message }) => {
            return UnitResult::QuotaExceeded(format!("Deploy failed: {}", message));
        }
        Err(e) => return UnitResult::Failed(format!("Deploy failed: {}", e)),
    }

    if let Err(e) = platform.make_public(&function_id).await {
        log.warn(format!("  Could not make {} public: {}", name, e));
    }

    UnitResult::Deployed(platform.invoke_url(&function_id))
}

/// Run one batch and wrap it for display.
pub async fn run_batch(
    request: &BatchRequest,
    settings: &BatchSettings,
    source: &mut dyn FunctionSource,
    platform: &dyn FunctionPlatform,
    manifest: Option<&dyn ManifestStore>,
    mut log: RunLog,
) -> Outcome<BatchReport> {
    match deploy_batch(request, settings, source, platform, manifest, &mut log).await {
        Ok(report) => Outcome::ok(log, report),
        Err(e) => Outcome::failed(log, e, None),
    }
}
