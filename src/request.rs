//! Invocation events to typed pipeline requests.
//!
//! Serverless gateways deliver parameters in different places. Every source is
//! read in one fixed order and merged so that a key is taken from the first
//! source that carries it:
//!
//! 1. `queryStringParameters`
//! 2. `params.query` (or `params.queryStringParameters`)
//! 3. the query of `requestUrl`, `url` or `request.url`
//! 4. the body: base64-decoded when `isBase64Encoded`, then JSON or form-encoded

use crate::errors::RequestError;
use crate::functions::{BatchRequest, Secret};
use crate::github::normalize_repository;
use crate::provision::Action;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Map, Value};
use std::str::FromStr;

/// Where a parameter came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamSource {
    QueryString,
    NestedQuery,
    RequestUrl,
    Body,
}

/// A parsed event: method plus merged parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvocationRequest {
    pub method: String,
    params: Map<String, Value>,
    origins: Vec<(String, ParamSource)>,
}

impl InvocationRequest {
    pub fn is_preflight(&self) -> bool {
        self.method.eq_ignore_ascii_case("OPTIONS")
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    pub fn source_of(&self, key: &str) -> Option<ParamSource> {
        self.origins
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, source)| *source)
    }

    /// Non-empty string value; single-element lists are unwrapped.
    pub fn str_param(&self, key: &str) -> Option<&str> {
        match self.params.get(key)? {
            Value::String(s) => Some(s.as_str()).filter(|s| !s.trim().is_empty()),
            Value::Array(items) => items.first().and_then(Value::as_str),
            _ => None,
        }
    }

    pub fn require_str(&self, key: &'static str) -> Result<&str, RequestError> {
        self.str_param(key).ok_or(RequestError::MissingParam(key))
    }

    /// Accepts JSON numbers and numeric strings.
    pub fn usize_param(&self, key: &str) -> Result<Option<usize>, RequestError> {
        let invalid = |message: String| RequestError::InvalidParam {
            name: key.to_string(),
            message,
        };
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_u64()
                .map(|n| Some(n as usize))
                .ok_or_else(|| invalid(format!("{} is not a non-negative integer", n))),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => s
                .trim()
                .parse::<usize>()
                .map(Some)
                .map_err(|e| invalid(e.to_string())),
            Some(other) => Err(invalid(format!("unexpected value {}", other))),
        }
    }

    fn merge(&mut self, source: ParamSource, values: Map<String, Value>) {
        for (key, value) in values {
            if self.params.contains_key(&key) {
                continue;
            }
            self.origins.push((key.clone(), source));
            self.params.insert(key, value);
        }
    }
}

/// Parse a gateway event.
pub fn parse_event(event: &Value) -> Result<InvocationRequest, RequestError> {
    let empty = Map::new();
    let event = match event {
        Value::Object(map) => map,
        Value::Null => &empty,
        other => {
            return Err(RequestError::InvalidEvent(format!(
                "expected a JSON object, got {}",
                type_name(other)
            )));
        }
    };
    let nested = event.get("params").and_then(Value::as_object);

    let method = nested
        .and_then(|p| p.get("http_method"))
        .or_else(|| event.get("httpMethod"))
        .or_else(|| event.get("requestMethod"))
        .and_then(Value::as_str)
        .unwrap_or("POST")
        .to_uppercase();

    let mut request = InvocationRequest {
        method,
        ..Default::default()
    };

    if let Some(query) = event.get("queryStringParameters").and_then(Value::as_object) {
        request.merge(ParamSource::QueryString, query.clone());
    }

    if let Some(query) = nested.and_then(|p| {
        p.get("query")
            .or_else(|| p.get("queryStringParameters"))
            .and_then(Value::as_object)
    }) {
        request.merge(ParamSource::NestedQuery, query.clone());
    }

    let url = event
        .get("requestUrl")
        .or_else(|| event.get("url"))
        .or_else(|| event.get("request").and_then(|r| r.get("url")))
        .and_then(Value::as_str);
    if let Some(url) = url {
        request.merge(ParamSource::RequestUrl, url_query(url));
    }

    let base64_body = event
        .get("isBase64Encoded")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    match event.get("body") {
        Some(Value::Object(body)) => request.merge(ParamSource::Body, body.clone()),
        Some(Value::String(raw)) => {
            request.merge(ParamSource::Body, parse_body(raw, base64_body)?);
        }
        _ => {}
    }

    Ok(request)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn url_query(url: &str) -> Map<String, Value> {
    match url.split_once('?') {
        Some((_, query)) => form_pairs(query.split('#').next().unwrap_or_default()),
        None => Map::new(),
    }
}

fn form_pairs(raw: &str) -> Map<String, Value> {
    let mut map = Map::new();
    for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
        map.entry(key.into_owned())
            .or_insert_with(|| Value::String(value.into_owned()));
    }
    map
}

fn parse_body(raw: &str, base64_body: bool) -> Result<Map<String, Value>, RequestError> {
    let decoded;
    let mut text = raw;
    if base64_body {
        // An undecodable body is read as-is.
        if let Some(plain) = BASE64
            .decode(raw.trim().as_bytes())
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
        {
            decoded = plain;
            text = &decoded;
        }
    }

    let text = text.trim();
    if text.is_empty() {
        return Ok(Map::new());
    }
    if text.starts_with('{') {
        return match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Ok(Map::new()),
            Err(e) => Err(RequestError::InvalidEvent(format!("body is not valid JSON: {}", e))),
        };
    }
    Ok(form_pairs(text))
}

/// Pipelines reachable through `shipyard invoke`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    Deploy,
    Ssl,
    Status,
    Migrate,
    Functions,
}

impl FromStr for PipelineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deploy" => Ok(Self::Deploy),
            "ssl" | "setup-ssl" | "setup_ssl" => Ok(Self::Ssl),
            "status" | "deploy-status" => Ok(Self::Status),
            "migrate" => Ok(Self::Migrate),
            "functions" | "deploy-functions" => Ok(Self::Functions),
            other => Err(format!(
                "Unknown pipeline '{}'. Valid pipelines: deploy, ssl, status, migrate, functions",
                other
            )),
        }
    }
}

/// A fully typed pipeline request.
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    Preflight,
    Provision {
        target: String,
        action: Action,
        upstream_port: Option<u16>,
    },
    Status {
        target: String,
    },
    Migrate {
        repository: String,
    },
    Functions {
        repository: String,
        request: BatchRequest,
    },
}

/// Map a parsed event onto the typed request for `kind`.
pub fn resolve(
    kind: PipelineKind,
    request: &InvocationRequest,
    default_batch_size: usize,
) -> Result<Invocation, RequestError> {
    if request.is_preflight() {
        return Ok(Invocation::Preflight);
    }
    match kind {
        PipelineKind::Deploy | PipelineKind::Ssl => {
            let target = request.require_str("config_name")?.to_string();
            let action = match kind {
                PipelineKind::Ssl => Action::SetupSsl,
                _ => request
                    .str_param("action")
                    .unwrap_or("deploy")
                    .parse::<Action>()
                    .map_err(|message| RequestError::InvalidParam {
                        name: "action".into(),
                        message,
                    })?,
            };
            let upstream_port = request
                .usize_param("upstream_port")?
                .map(|port| {
                    u16::try_from(port).map_err(|_| RequestError::InvalidParam {
                        name: "upstream_port".into(),
                        message: format!("{} is out of range", port),
                    })
                })
                .transpose()?;
            Ok(Invocation::Provision {
                target,
                action,
                upstream_port,
            })
        }
        PipelineKind::Status => Ok(Invocation::Status {
            target: request.require_str("config_name")?.to_string(),
        }),
        PipelineKind::Migrate => Ok(Invocation::Migrate {
            repository: repository(request)?,
        }),
        PipelineKind::Functions => {
            let batch_size = request
                .usize_param("batch_size")?
                .unwrap_or(default_batch_size);
            if batch_size == 0 {
                return Err(RequestError::InvalidParam {
                    name: "batch_size".into(),
                    message: "must be at least 1".into(),
                });
            }
            Ok(Invocation::Functions {
                repository: repository(request)?,
                request: BatchRequest {
                    secrets: secrets(request)?,
                    batch_size,
                    offset: request.usize_param("offset")?.unwrap_or(0),
                    only: request.str_param("function_filter").map(str::to_string),
                },
            })
        }
    }
}

fn repository(request: &InvocationRequest) -> Result<String, RequestError> {
    let raw = request.require_str("github_repo")?;
    normalize_repository(raw).ok_or_else(|| RequestError::InvalidParam {
        name: "github_repo".into(),
        message: format!("'{}' is not a GitHub repository reference", raw),
    })
}

/// `secrets` is a list of `{name, value}` objects or `NAME=VALUE` strings.
fn secrets(request: &InvocationRequest) -> Result<Vec<Secret>, RequestError> {
    let invalid = |message: String| RequestError::InvalidParam {
        name: "secrets".into(),
        message,
    };
    match request.get("secrets") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.parse::<Secret>().map_err(invalid),
                other => serde_json::from_value::<Secret>(other.clone())
                    .map_err(|e| invalid(e.to_string())),
            })
            .collect(),
        Some(other) => Err(invalid(format!("expected a list, got {}", type_name(other)))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_string_wins_over_body() {
        let event = json!({
            "httpMethod": "POST",
            "queryStringParameters": {"github_repo": "acme/from-query"},
            "body": "{\"github_repo\": \"acme/from-body\", \"offset\": 5}",
        });
        let request = parse_event(&event).unwrap();
        assert_eq!(request.str_param("github_repo"), Some("acme/from-query"));
        assert_eq!(request.source_of("github_repo"), Some(ParamSource::QueryString));
        assert_eq!(request.usize_param("offset").unwrap(), Some(5));
        assert_eq!(request.source_of("offset"), Some(ParamSource::Body));
    }

    #[test]
    fn test_nested_params_and_method_override() {
        let event = json!({
            "requestMethod": "GET",
            "params": {"http_method": "OPTIONS", "query": {"github_repo": ["acme/site"]}},
        });
        let request = parse_event(&event).unwrap();
        assert!(request.is_preflight());
        assert_eq!(request.str_param("github_repo"), Some("acme/site"));
        assert_eq!(request.source_of("github_repo"), Some(ParamSource::NestedQuery));
    }

    #[test]
    fn test_request_url_query() {
        let event = json!({"request": {"url": "/migrate?github_repo=acme%2Fsite&x=1#frag"}});
        let request = parse_event(&event).unwrap();
        assert_eq!(request.str_param("github_repo"), Some("acme/site"));
        assert_eq!(request.source_of("github_repo"), Some(ParamSource::RequestUrl));
        assert_eq!(request.method, "POST");
    }

    #[test]
    fn test_base64_form_body() {
        let body = BASE64.encode("github_repo=acme%2Fsite&batch_size=3");
        let event = json!({"body": body, "isBase64Encoded": true});
        let request = parse_event(&event).unwrap();
        assert_eq!(request.str_param("github_repo"), Some("acme/site"));
        assert_eq!(request.usize_param("batch_size").unwrap(), Some(3));
    }

    #[test]
    fn test_empty_and_invalid_events() {
        assert!(parse_event(&Value::Null).unwrap().get("x").is_none());
        assert!(matches!(
            parse_event(&json!([1, 2])),
            Err(RequestError::InvalidEvent(_))
        ));
        assert!(matches!(
            parse_event(&json!({"body": "{not json"})),
            Err(RequestError::InvalidEvent(_))
        ));
        let request = parse_event(&json!({"body": ""})).unwrap();
        assert!(request.str_param("github_repo").is_none());
    }

    #[test]
    fn test_resolve_functions_request() {
        let event = json!({
            "body": {
                "github_repo": "https://github.com/acme/site.git",
                "secrets": [{"name": "API_KEY", "value": "k"}, "DATABASE_URL=pg"],
                "batch_size": "2",
                "offset": 4,
                "function_filter": "auth",
            }
        });
        let request = parse_event(&event).unwrap();
        match resolve(PipelineKind::Functions, &request, 5).unwrap() {
            Invocation::Functions {
                repository,
                request,
            } => {
                assert_eq!(repository, "acme/site");
                assert_eq!(request.batch_size, 2);
                assert_eq!(request.offset, 4);
                assert_eq!(request.only.as_deref(), Some("auth"));
                assert_eq!(request.secrets.len(), 2);
                assert_eq!(request.secrets[1].name, "DATABASE_URL");
            }
            other => panic!("unexpected invocation: {other:?}"),
        }
    }

    #[test]
    fn test_resolve_defaults_and_errors() {
        let request = parse_event(&json!({"body": {"github_repo": "acme/site"}})).unwrap();
        match resolve(PipelineKind::Functions, &request, 5).unwrap() {
            Invocation::Functions { request, .. } => {
                assert_eq!(request.batch_size, 5);
                assert_eq!(request.offset, 0);
            }
            other => panic!("unexpected invocation: {other:?}"),
        }

        let empty = parse_event(&json!({})).unwrap();
        assert!(matches!(
            resolve(PipelineKind::Migrate, &empty, 5),
            Err(RequestError::MissingParam("github_repo"))
        ));
        assert!(matches!(
            resolve(PipelineKind::Deploy, &empty, 5),
            Err(RequestError::MissingParam("config_name"))
        ));

        let bad = parse_event(&json!({"body": {"github_repo": "acme/site", "offset": -1}})).unwrap();
        assert!(resolve(PipelineKind::Functions, &bad, 5).is_err());
    }

    #[test]
    fn test_resolve_provision_actions() {
        let request = parse_event(&json!({
            "queryStringParameters": {"config_name": "landing", "action": "setup_ssl"}
        }))
        .unwrap();
        assert_eq!(
            resolve(PipelineKind::Deploy, &request, 5).unwrap(),
            Invocation::Provision {
                target: "landing".into(),
                action: Action::SetupSsl,
                upstream_port: None,
            }
        );

        let ssl = parse_event(&json!({"body": {"config_name": "landing"}})).unwrap();
        assert!(matches!(
            resolve(PipelineKind::Ssl, &ssl, 5).unwrap(),
            Invocation::Provision {
                action: Action::SetupSsl,
                ..
            }
        ));
    }

    #[test]
    fn test_preflight_short_circuits() {
        let request = parse_event(&json!({"httpMethod": "OPTIONS"})).unwrap();
        assert_eq!(
            resolve(PipelineKind::Functions, &request, 5).unwrap(),
            Invocation::Preflight
        );
    }

    #[test]
    fn test_pipeline_kind_parse() {
        assert_eq!("deploy-functions".parse::<PipelineKind>().unwrap(), PipelineKind::Functions);
        assert!("quiz".parse::<PipelineKind>().is_err());
    }
}
