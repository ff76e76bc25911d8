use super::bundle::{ENTRY_FILE, FunctionCode, REQUIREMENTS_FILE};
use crate::errors::FunctionDeployError;
use crate::github::GithubClient;
use crate::report::RunLog;
use async_trait::async_trait;

/// Supplies function units and their code.
#[async_trait]
pub trait FunctionSource: Send + Sync {
    /// Names of every function unit, sorted.
    async fn list_units(&mut self, log: &mut RunLog) -> Result<Vec<String>, FunctionDeployError>;

    /// Code for one unit; `Ok(None)` when its entry script cannot be read.
    async fn load(&self, name: &str) -> Result<Option<FunctionCode>, FunctionDeployError>;
}

/// Reads function directories from a repository's default branch. A directory
/// under `source_dir` is a unit when it contains `index.py`.
pub struct GithubFunctionSource {
    client: GithubClient,
    repository: String,
    source_dir: String,
    branch: Option<String>,
}

impl GithubFunctionSource {
    pub fn new(
        client: GithubClient,
        repository: impl Into<String>,
        source_dir: impl Into<String>,
    ) -> Self {
        Self {
            client,
            repository: repository.into(),
            source_dir: source_dir.into().trim_matches('/').to_string(),
            branch: None,
        }
    }

    fn unit_path(&self, name: &str, file: &str) -> String {
        format!("{}/{}/{}", self.source_dir, name, file)
    }

    async fn read(&self, path: &str) -> anyhow::Result<Option<String>> {
        Ok(self
            .client
            .get_file(&self.repository, path, self.branch.as_deref())
            .await?
            .map(|f| f.content))
    }
}

#[async_trait]
impl FunctionSource for GithubFunctionSource {
    async fn list_units(&mut self, log: &mut RunLog) -> Result<Vec<String>, FunctionDeployError> {
        log.info(format!("Reading functions from {}", self.repository));
        let repo = self
            .client
            .get_repository(&self.repository)
            .await
            .map_err(FunctionDeployError::Source)?;
        log.success(format!("Repository found, branch: {}", repo.default_branch));
        self.branch = Some(repo.default_branch.clone());

        let entries = self
            .client
            .list_directory(&self.repository, &self.source_dir, Some(&repo.default_branch))
            .await
            .map_err(FunctionDeployError::Source)?
            .ok_or_else(|| {
                FunctionDeployError::Source(anyhow::anyhow!(
                    "{}/ not found on branch {}",
                    self.source_dir,
                    repo.default_branch
                ))
            })?;

        let mut names = Vec::new();
        for entry in entries.into_iter().filter(|e| e.is_dir()) {
            match self.read(&self.unit_path(&entry.name, ENTRY_FILE)).await {
                Ok(Some(_)) => names.push(entry.name),
                Ok(None) => {
                    tracing::debug!(dir = %entry.name, "No entry script, not a function");
                }
                Err(e) => {
                    log.warn(format!("Skipping {}: {:#}", entry.name, e));
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn load(&self, name: &str) -> Result<Option<FunctionCode>, FunctionDeployError> {
        let entry = match self.read(&self.unit_path(name, ENTRY_FILE)).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return Ok(None),
            Err(e) => {
                tracing::warn!(function = %name, error = %format!("{:#}", e), "Entry script unreadable");
                return Ok(None);
            }
        };
        let requirements = self
            .read(&self.unit_path(name, REQUIREMENTS_FILE))
            .await
            .map_err(FunctionDeployError::Source)?;
        Ok(Some(FunctionCode {
            name: name.to_string(),
            entry,
            requirements,
        }))
    }
}
