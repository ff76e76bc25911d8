//! Yandex Cloud Functions client.
//!
//! The OAuth token is exchanged for an IAM token once per run, and the first
//! cloud's first folder is used as the working folder.

use super::platform::{FunctionPlatform, RemoteFunction, VersionSpec};
use crate::config::FunctionsConfig;
use crate::errors::FunctionDeployError;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const USER_AGENT: &str = "shipyard";

/// Longest platform error body kept in errors and logs.
const MAX_BODY_LEN: usize = 300;

const INVOKER_ROLE: &str = "serverless.functions.invoker";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IamTokenResponse {
    iam_token: String,
}

#[derive(Debug, Deserialize)]
struct IdEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CloudList {
    #[serde(default)]
    clouds: Vec<IdEntry>,
}

#[derive(Debug, Deserialize)]
struct FolderList {
    #[serde(default)]
    folders: Vec<IdEntry>,
}

#[derive(Debug, Deserialize)]
struct FunctionEntry {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FunctionPage {
    #[serde(default)]
    functions: Vec<FunctionEntry>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationMetadata {
    #[serde(default)]
    function_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Operation {
    #[serde(default)]
    metadata: Option<OperationMetadata>,
}

pub struct YandexFunctions {
    http: reqwest::Client,
    iam_token: String,
    folder_id: String,
    functions_url: String,
    invoke_base_url: String,
    quota_marker: String,
    settle: Duration,
}

impl std::fmt::Debug for YandexFunctions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YandexFunctions")
            .field("folder_id", &self.folder_id)
            .field("functions_url", &self.functions_url)
            .finish()
    }
}

impl YandexFunctions {
    /// Authenticate and resolve the working folder.
    pub async fn connect(config: &FunctionsConfig) -> Result<Self, FunctionDeployError> {
        let oauth_token = config
            .oauth_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                FunctionDeployError::Auth("YANDEX_CLOUD_TOKEN is not configured".to_string())
            })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        let resp = http
            .post(&config.iam_url)
            .header("User-Agent", USER_AGENT)
            .json(&json!({ "yandexPassportOauthToken": oauth_token }))
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(FunctionDeployError::Auth(format!(
                "IAM token exchange returned HTTP {}: {}",
                status,
                truncate_body(&body)
            )));
        }
        let iam_token = resp.json::<IamTokenResponse>().await?.iam_token;

        let resource_manager = config.resource_manager_url.trim_end_matches('/');
        let clouds: CloudList = get_json(
            &http,
            &iam_token,
            &format!("{}/clouds", resource_manager),
            &[],
            "list clouds",
        )
        .await?;
        let cloud_id = clouds
            .clouds
            .into_iter()
            .next()
            .map(|c| c.id)
            .ok_or_else(|| FunctionDeployError::Auth("No clouds visible to this token".into()))?;

        let folders: FolderList = get_json(
            &http,
            &iam_token,
            &format!("{}/folders", resource_manager),
            &[("cloudId", cloud_id.as_str())],
            "list folders",
        )
        .await?;
        let folder_id = folders
            .folders
            .into_iter()
            .next()
            .map(|f| f.id)
            .ok_or_else(|| {
                FunctionDeployError::Auth(format!("Cloud {} has no folders", cloud_id))
            })?;

        tracing::debug!(cloud_id = %cloud_id, folder_id = %folder_id, "Resolved function folder");

        Ok(Self {
            http,
            iam_token,
            folder_id,
            functions_url: config.functions_url.trim_end_matches('/').to_string(),
            invoke_base_url: config.invoke_base_url.trim_end_matches('/').to_string(),
            quota_marker: config.quota_marker.clone(),
            settle: Duration::from_secs(config.create_settle_secs),
        })
    }

    pub fn folder_id(&self) -> &str {
        &self.folder_id
    }

    async fn post(
        &self,
        url: &str,
        body: &serde_json::Value,
        operation: &str,
    ) -> Result<serde_json::Value, FunctionDeployError> {
        let resp = self
            .http
            .post(url)
            .header("User-Agent", USER_AGENT)
            .bearer_auth(&self.iam_token)
            .json(body)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(classify_failure(
                operation,
                status.as_u16(),
                &text,
                &self.quota_marker,
            ));
        }
        if text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| {
            FunctionDeployError::Other(anyhow::anyhow!(
                "Unexpected {} response: {}",
                operation,
                e
            ))
        })
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<String>, FunctionDeployError> {
        Ok(self
            .list_functions()
            .await?
            .into_iter()
            .find(|f| f.name == name)
            .map(|f| f.id))
    }
}

async fn get_json<T: serde::de::DeserializeOwned>(
    http: &reqwest::Client,
    iam_token: &str,
    url: &str,
    query: &[(&str, &str)],
    operation: &str,
) -> Result<T, FunctionDeployError> {
    let resp = http
        .get(url)
        .query(query)
        .header("User-Agent", USER_AGENT)
        .bearer_auth(iam_token)
        .send()
        .await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(FunctionDeployError::Platform {
            operation: operation.to_string(),
            status: status.as_u16(),
            body: truncate_body(&body),
        });
    }
    Ok(resp.json::<T>().await?)
}

/// Query pairs for one page of the function listing.
pub fn function_list_query<'a>(
    folder_id: &'a str,
    page_token: Option<&'a str>,
) -> Vec<(&'static str, &'a str)> {
    let mut query = vec![("folderId", folder_id)];
    if let Some(token) = page_token {
        query.push(("pageToken", token));
    }
    query
}

/// Map a failed platform response to an error, recognising quota exhaustion.
pub fn classify_failure(
    operation: &str,
    status: u16,
    body: &str,
    quota_marker: &str,
) -> FunctionDeployError {
    let body = truncate_body(body);
    if !quota_marker.is_empty() && body.contains(quota_marker) {
        return FunctionDeployError::QuotaExceeded { message: body };
    }
    FunctionDeployError::Platform {
        operation: operation.to_string(),
        status,
        body,
    }
}

fn truncate_body(body: &str) -> String {
    body.chars().take(MAX_BODY_LEN).collect()
}

/// Request body for a new version.
pub fn version_payload(function_id: &str, spec: &VersionSpec) -> serde_json::Value {
    json!({
        "functionId": function_id,
        "runtime": spec.runtime,
        "entrypoint": spec.entrypoint,
        "resources": { "memory": spec.memory_bytes.to_string() },
        "executionTimeout": format!("{}s", spec.execution_timeout_secs),
        "environment": spec.environment,
        "content": BASE64.encode(&spec.content),
    })
}

pub fn public_access_payload() -> serde_json::Value {
    json!({
        "accessBindings": [{
            "roleId": INVOKER_ROLE,
            "subject": { "id": "allUsers", "type": "system" },
        }]
    })
}

#[async_trait]
impl FunctionPlatform for YandexFunctions {
    async fn list_functions(&self) -> Result<Vec<RemoteFunction>, FunctionDeployError> {
        let mut functions = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let url = format!("{}/functions", self.functions_url);
            let query = function_list_query(&self.folder_id, page_token.as_deref());
            let page: FunctionPage =
                get_json(&self.http, &self.iam_token, &url, &query, "list functions").await?;
            functions.extend(page.functions.into_iter().map(|f| RemoteFunction {
                id: f.id,
                name: f.name,
            }));
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(functions)
    }

    async fn create_function(&self, name: &str) -> Result<String, FunctionDeployError> {
        let body = json!({
            "folderId": self.folder_id,
            "name": name,
            "description": format!("Function {} deployed by shipyard", name),
        });
        let response = self
            .post(
                &format!("{}/functions", self.functions_url),
                &body,
                "create function",
            )
            .await?;

        let from_operation = serde_json::from_value::<Operation>(response)
            .ok()
            .and_then(|op| op.metadata)
            .and_then(|m| m.function_id);
        if let Some(id) = from_operation {
            return Ok(id);
        }

        // The operation may not carry the id yet; look it up once it settles.
        tokio::time::sleep(self.settle).await;
        self.find_by_name(name)
            .await?
            .ok_or_else(|| FunctionDeployError::Platform {
                operation: "create function".to_string(),
                status: 200,
                body: format!("function {} not listed after creation", name),
            })
    }

    async fn create_version(
        &self,
        function_id: &str,
        spec: &VersionSpec,
    ) -> Result<(), FunctionDeployError> {
        self.post(
            &format!("{}/versions", self.functions_url),
            &version_payload(function_id, spec),
            "create version",
        )
        .await?;
        Ok(())
    }

    async fn make_public(&self, function_id: &str) -> Result<(), FunctionDeployError> {
        self.post(
            &format!(
                "{}/functions/{}:setAccessBindings",
                self.functions_url, function_id
            ),
            &public_access_payload(),
            "set access bindings",
        )
        .await?;
        Ok(())
    }

    fn invoke_url(&self, function_id: &str) -> String {
        format!("{}/{}", self.invoke_base_url, function_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_function_list_query_is_encoded() {
        let query = function_list_query("b1g folder", Some("a+b=&c"));
        let request = reqwest::Client::new()
            .get("https://functions.example/functions")
            .query(&query)
            .build()
            .unwrap();
        let url = request.url().as_str();
        assert!(url.contains("folderId=b1g+folder") || url.contains("folderId=b1g%20folder"));
        assert!(url.contains("pageToken=a%2Bb%3D%26c"));

        assert_eq!(function_list_query("b1g", None), vec![("folderId", "b1g")]);
    }

    #[test]
    fn test_classify_quota_marker() {
        let err = classify_failure(
            "create function",
            400,
            r#"{"code":8,"message":"Quota limit serverless.functions.count exceeded"}"#,
            "Quota limit",
        );
        assert!(matches!(err, FunctionDeployError::QuotaExceeded { .. }));
    }

    #[test]
    fn test_classify_other_failure_truncates_body() {
        let body = "x".repeat(1000);
        match classify_failure("create version", 500, &body, "Quota limit") {
            FunctionDeployError::Platform {
                operation,
                status,
                body,
            } => {
                assert_eq!(operation, "create version");
                assert_eq!(status, 500);
                assert_eq!(body.len(), MAX_BODY_LEN);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_version_payload_shape() {
        let mut environment = BTreeMap::new();
        environment.insert("DATABASE_URL".to_string(), "postgres://x".to_string());
        let spec = VersionSpec {
            runtime: "python311".into(),
            entrypoint: "index.handler".into(),
            memory_bytes: 268_435_456,
            execution_timeout_secs: 600,
            environment,
            content: b"PK".to_vec(),
        };
        let payload = version_payload("d4e1", &spec);
        assert_eq!(payload["functionId"], "d4e1");
        assert_eq!(payload["resources"]["memory"], "268435456");
        assert_eq!(payload["executionTimeout"], "600s");
        assert_eq!(payload["environment"]["DATABASE_URL"], "postgres://x");
        assert_eq!(payload["content"], "UEs=");
    }

    #[test]
    fn test_public_access_payload_grants_invoker_to_all_users() {
        let payload = public_access_payload();
        let binding = &payload["accessBindings"][0];
        assert_eq!(binding["roleId"], "serverless.functions.invoker");
        assert_eq!(binding["subject"]["id"], "allUsers");
        assert_eq!(binding["subject"]["type"], "system");
    }

    #[test]
    fn test_operation_metadata_parses_function_id() {
        let op: Operation = serde_json::from_str(
            r#"{"id":"op1","metadata":{"@type":"x","functionId":"fn1"},"done":false}"#,
        )
        .unwrap();
        assert_eq!(op.metadata.unwrap().function_id.as_deref(), Some("fn1"));
    }

    #[tokio::test]
    async fn test_connect_requires_token() {
        let config = FunctionsConfig::default();
        let err = YandexFunctions::connect(&config).await.unwrap_err();
        assert!(matches!(err, FunctionDeployError::Auth(_)));
    }
}
