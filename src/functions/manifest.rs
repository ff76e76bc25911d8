//! The function-name → URL manifest kept in the source repository.
//!
//! Writes are read-modify-write guarded by the blob SHA read alongside the
//! content; the store rejects a write whose SHA has moved on.

use crate::github::GithubClient;
use crate::report::RunLog;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;

pub type UrlMap = BTreeMap<String, String>;

/// Manifest content plus its concurrency token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestSnapshot {
    pub urls: UrlMap,
    /// `None` when the manifest does not exist yet.
    pub sha: Option<String>,
}

#[async_trait]
pub trait ManifestStore: Send + Sync {
    async fn load(&self) -> Result<ManifestSnapshot>;
    async fn store(&self, urls: &UrlMap, sha: Option<&str>, message: &str) -> Result<()>;
}

/// Merge `updates` into `current`, returning how many entries changed.
pub fn merge_urls(current: &mut UrlMap, updates: &UrlMap) -> usize {
    let mut changed = 0;
    for (name, url) in updates {
        if current.get(name) != Some(url) {
            current.insert(name.clone(), url.clone());
            changed += 1;
        }
    }
    changed
}

pub fn commit_message(changed: usize) -> String {
    format!("chore: update func2url.json with {} new URLs", changed)
}

/// Merge this batch's URLs into the manifest. Returns whether it was written.
/// Failures are logged as warnings and never propagate.
pub async fn sync_manifest(store: &dyn ManifestStore, urls: &UrlMap, log: &mut RunLog) -> bool {
    if urls.is_empty() {
        return false;
    }
    log.blank();
    log.info("Updating func2url.json...");

    let result = async {
        let mut snapshot = store.load().await?;
        let changed = merge_urls(&mut snapshot.urls, urls);
        if changed > 0 {
            store
                .store(&snapshot.urls, snapshot.sha.as_deref(), &commit_message(changed))
                .await?;
        }
        Ok::<usize, anyhow::Error>(changed)
    }
    .await;

    match result {
        Ok(0) => {
            log.info("func2url.json unchanged");
            false
        }
        Ok(changed) => {
            log.success(format!("func2url.json updated, changed URLs: {}", changed));
            true
        }
        Err(e) => {
            log.warn(format!("Failed to update func2url.json: {:#}", e));
            false
        }
    }
}

/// Manifest stored as a JSON file in a GitHub repository.
pub struct GithubManifest {
    client: GithubClient,
    repository: String,
    path: String,
    branch: String,
}

impl GithubManifest {
    pub fn new(
        client: GithubClient,
        repository: impl Into<String>,
        path: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            client,
            repository: repository.into(),
            path: path.into(),
            branch: branch.into(),
        }
    }
}

#[async_trait]
impl ManifestStore for GithubManifest {
    async fn load(&self) -> Result<ManifestSnapshot> {
        let file = self
            .client
            .get_file(&self.repository, &self.path, Some(&self.branch))
            .await?;
        match file {
            Some(file) => {
                let urls: UrlMap = serde_json::from_str(&file.content)
                    .with_context(|| format!("{} is not a JSON object of URLs", self.path))?;
                Ok(ManifestSnapshot {
                    urls,
                    sha: Some(file.sha),
                })
            }
            None => Ok(ManifestSnapshot::default()),
        }
    }

    async fn store(&self, urls: &UrlMap, sha: Option<&str>, message: &str) -> Result<()> {
        let content = serde_json::to_string_pretty(urls)?;
        self.client
            .put_file(&self.repository, &self.path, &content, message, &self.branch, sha)
            .await
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MemoryManifest;
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> UrlMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_merge_counts_only_changes() {
        let mut current = map(&[("auth", "https://f/1"), ("pay", "https://f/2")]);
        let updates = map(&[("auth", "https://f/1"), ("pay", "https://f/3"), ("new", "https://f/4")]);
        assert_eq!(merge_urls(&mut current, &updates), 2);
        assert_eq!(current["pay"], "https://f/3");
        assert_eq!(current.len(), 3);
    }

    #[tokio::test]
    async fn test_sync_writes_once_with_sha_and_message() {
        let store = MemoryManifest::with(&[("auth", "https://f/1")]);
        let mut log = RunLog::new();
        let written = sync_manifest(
            &store,
            &map(&[("auth", "https://f/1"), ("pay", "https://f/2")]),
            &mut log,
        )
        .await;

        assert!(written);
        let writes = store.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].1.as_deref(), Some("sha-0"));
        assert_eq!(writes[0].2, "chore: update func2url.json with 1 new URLs");
        assert_eq!(writes[0].0.len(), 2);
    }

    #[tokio::test]
    async fn test_sync_unchanged_does_not_write() {
        let store = MemoryManifest::with(&[("auth", "https://f/1")]);
        let mut log = RunLog::new();
        let written = sync_manifest(&store, &map(&[("auth", "https://f/1")]), &mut log).await;
        assert!(!written);
        assert!(store.writes().is_empty());
        assert!(log.contains("unchanged"));
    }

    #[tokio::test]
    async fn test_sync_failure_is_a_warning() {
        let store = MemoryManifest {
            fail_load: true,
            ..Default::default()
        };
        let mut log = RunLog::new();
        let written = sync_manifest(&store, &map(&[("auth", "https://f/1")]), &mut log).await;
        assert!(!written);
        assert!(log.has_level(crate::report::LogLevel::Warn));
        assert!(log.contains("502"));
    }

    #[tokio::test]
    async fn test_sync_empty_batch_is_noop() {
        let store = MemoryManifest::default();
        let mut log = RunLog::new();
        assert!(!sync_manifest(&store, &UrlMap::new(), &mut log).await);
        assert!(log.is_empty());
    }
}
