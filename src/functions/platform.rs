use crate::errors::FunctionDeployError;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// A function that already exists on the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFunction {
    pub id: String,
    pub name: String,
}

/// Everything needed to publish one deployable version.
#[derive(Debug, Clone)]
pub struct VersionSpec {
    pub runtime: String,
    pub entrypoint: String,
    pub memory_bytes: u64,
    pub execution_timeout_secs: u64,
    pub environment: BTreeMap<String, String>,
    /// Zip bundle bytes.
    pub content: Vec<u8>,
}

/// Serverless function platform operations used by the batch deployer.
///
/// Implementations report quota exhaustion as
/// `FunctionDeployError::QuotaExceeded`, whatever call it surfaces on.
#[async_trait]
pub trait FunctionPlatform: Send + Sync {
    /// Every function in the working folder, across all pages.
    async fn list_functions(&self) -> Result<Vec<RemoteFunction>, FunctionDeployError>;

    /// Create an empty function and return its allocated id.
    async fn create_function(&self, name: &str) -> Result<String, FunctionDeployError>;

    async fn create_version(
        &self,
        function_id: &str,
        spec: &VersionSpec,
    ) -> Result<(), FunctionDeployError>;

    /// Allow unauthenticated invocation.
    async fn make_public(&self, function_id: &str) -> Result<(), FunctionDeployError>;

    fn invoke_url(&self, function_id: &str) -> String;
}
