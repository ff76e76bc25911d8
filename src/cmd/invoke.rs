//! `shipyard invoke`: run a pipeline from a serverless-style event.
//!
//! The response is always JSON on stdout, shaped like the structured outcome
//! of the pipeline that ran.

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use shipyard::config::ShipyardConfig;
use shipyard::request::{Invocation, PipelineKind, parse_event, resolve};
use shipyard::report::{Outcome, RunLog};
use std::io::Read;
use std::path::Path;

use super::deploy::{execute_provision, execute_status};
use super::functions::execute_functions;
use super::migrate::{MigrationTarget, execute_migrate};

fn read_event(path: &Path) -> Result<Value> {
    let raw = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read event from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read event file {}", path.display()))?
    };
    if raw.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&raw).context("Event is not valid JSON")
}

fn to_value<T: serde::Serialize>(outcome: &Outcome<T>) -> Result<Value> {
    serde_json::to_value(outcome).context("Failed to render outcome as JSON")
}

async fn dispatch(config: &ShipyardConfig, kind: PipelineKind, event: &Value) -> Result<Value> {
    let invocation = parse_event(event)
        .and_then(|request| resolve(kind, &request, config.functions.default_batch_size));

    match invocation {
        Err(e) => to_value(&Outcome::<Map<String, Value>>::failed(RunLog::new(), e, None)),
        Ok(Invocation::Preflight) => to_value(&Outcome::ok(RunLog::new(), Map::new())),
        Ok(Invocation::Provision {
            target,
            action,
            upstream_port,
        }) => to_value(&execute_provision(config, &target, action, upstream_port).await),
        Ok(Invocation::Status { target }) => to_value(&execute_status(config, &target).await),
        Ok(Invocation::Migrate { repository }) => to_value(
            &execute_migrate(config, MigrationTarget::Repository(&repository)).await,
        ),
        Ok(Invocation::Functions {
            repository,
            request,
        }) => to_value(&execute_functions(config, &repository, &request, true).await),
    }
}

pub async fn cmd_invoke(config: &ShipyardConfig, pipeline: &str, event: &Path) -> Result<bool> {
    let kind: PipelineKind = pipeline.parse().map_err(anyhow::Error::msg)?;
    let event = read_event(event)?;
    let response = dispatch(config, kind, &event).await?;

    println!(
        "{}",
        serde_json::to_string_pretty(&response).context("Failed to render response")?
    );
    Ok(response
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_preflight_response() {
        let config = ShipyardConfig::default();
        let response = dispatch(&config, PipelineKind::Functions, &json!({"httpMethod": "OPTIONS"}))
            .await
            .unwrap();
        assert_eq!(response["success"], true);
        assert_eq!(response["logs"], json!([]));
        assert!(response.get("error").is_none());
    }

    #[tokio::test]
    async fn test_missing_parameter_is_a_failed_response() {
        let config = ShipyardConfig::default();
        let response = dispatch(&config, PipelineKind::Migrate, &json!({"body": "{}"}))
            .await
            .unwrap();
        assert_eq!(response["success"], false);
        assert!(
            response["error"]
                .as_str()
                .unwrap()
                .contains("github_repo")
        );
    }

    #[tokio::test]
    async fn test_functions_without_cloud_token_fails_before_network() {
        let config = ShipyardConfig::default();
        let event = json!({"body": {"github_repo": "acme/site"}});
        let response = dispatch(&config, PipelineKind::Functions, &event).await.unwrap();
        assert_eq!(response["success"], false);
        assert!(
            response["error"]
                .as_str()
                .unwrap()
                .contains("YANDEX_CLOUD_TOKEN")
        );
    }
}
