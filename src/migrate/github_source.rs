use super::{MigrationSource, MigrationUnit};
use crate::errors::MigrationError;
use crate::github::{ContentEntry, GithubClient};
use async_trait::async_trait;

pub const MIGRATIONS_DIR: &str = "db_migrations";

/// Reads `db_migrations/*.sql` from a repository's default branch.
pub struct GithubMigrationSource {
    client: GithubClient,
    repository: String,
    branch: Option<String>,
}

impl GithubMigrationSource {
    pub fn new(client: GithubClient, repository: impl Into<String>) -> Self {
        Self {
            client,
            repository: repository.into(),
            branch: None,
        }
    }

    /// Default branch, once resolved by `list_units`.
    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }
}

/// Keep `.sql` files only.
pub fn sql_units(entries: Vec<ContentEntry>) -> Vec<MigrationUnit> {
    let mut units: Vec<MigrationUnit> = entries
        .into_iter()
        .filter(|e| e.is_file() && e.name.ends_with(".sql"))
        .map(|e| MigrationUnit::new(e.name, e.path))
        .collect();
    units.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    units
}

#[async_trait]
impl MigrationSource for GithubMigrationSource {
    async fn list_units(&mut self) -> Result<Option<Vec<MigrationUnit>>, MigrationError> {
        let repo = self
            .client
            .get_repository(&self.repository)
            .await
            .map_err(|e| MigrationError::RepositoryUnavailable {
                repo: self.repository.clone(),
                message: format!("{:#}", e),
            })?;
        self.branch = Some(repo.default_branch.clone());

        let entries = self
            .client
            .list_directory(&self.repository, MIGRATIONS_DIR, Some(&repo.default_branch))
            .await?;
        Ok(entries.map(sql_units))
    }

    async fn fetch(&self, unit: &MigrationUnit) -> Result<String, MigrationError> {
        let file = self
            .client
            .get_file(&self.repository, &unit.location, self.branch.as_deref())
            .await
            .map_err(|e| MigrationError::Fetch {
                name: unit.file_name.clone(),
                message: format!("{:#}", e),
            })?;
        file.map(|f| f.content).ok_or_else(|| MigrationError::Fetch {
            name: unit.file_name.clone(),
            message: "file not found".to_string(),
        })
    }
}
