//! HTTP Request node executor.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::core::http_client::HttpRequest;
use crate::core::resolver::NodeInputs;
use crate::core::runtime_context::RuntimeContext;
use crate::core::variable_pool::VariablePool;
use crate::dsl::{NodeRunResult, NodeSchema};
use crate::error::NodeError;
use crate::nodes::executor::NodeExecutor;
use crate::nodes::utils::parse_config;
use crate::template::{render, render_value};

use super::dynamic_outputs;

const ERROR_BODY_PREVIEW: usize = 512;

#[derive(Debug, Clone, Deserialize)]
struct KeyValue {
    key: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct HttpRequestConfig {
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    headers: Vec<KeyValue>,
    #[serde(default)]
    params: Vec<KeyValue>,
    /// A string template, or a JSON value whose strings are templates.
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl Default for HttpRequestConfig {
    fn default() -> Self {
        Self {
            method: default_method(),
            url: String::new(),
            headers: Vec::new(),
            params: Vec::new(),
            body: None,
            timeout_secs: None,
        }
    }
}

/// Executor for HTTP Request nodes.
pub struct HttpRequestExecutor;

impl HttpRequestExecutor {
    fn build_request(
        config: &HttpRequestConfig,
        inputs: &NodeInputs,
        pool: &VariablePool,
    ) -> Result<HttpRequest, NodeError> {
        let url = render(&config.url, pool, Some(inputs));
        let mut parsed = reqwest::Url::parse(url.trim()).map_err(|e| {
            NodeError::InputValidationError(format!("invalid url '{}': {}", url, e))
        })?;
        if !config.params.is_empty() {
            let mut query = parsed.query_pairs_mut();
            for param in &config.params {
                query.append_pair(&param.key, &render(&param.value, pool, Some(inputs)));
            }
        }

        let mut headers: Vec<(String, String)> = config
            .headers
            .iter()
            .filter(|h| !h.key.trim().is_empty())
            .map(|h| (h.key.clone(), render(&h.value, pool, Some(inputs))))
            .collect();

        let body = match &config.body {
            None | Some(Value::Null) => None,
            Some(Value::String(template)) => Some(render(template, pool, Some(inputs))),
            Some(structured) => {
                if !headers
                    .iter()
                    .any(|(k, _)| k.eq_ignore_ascii_case("content-type"))
                {
                    headers.push(("Content-Type".to_string(), "application/json".to_string()));
                }
                Some(serde_json::to_string(&render_value(structured, pool, Some(inputs)))?)
            }
        };

        Ok(HttpRequest {
            method: config.method.to_uppercase(),
            url: parsed.to_string(),
            headers,
            body,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl NodeExecutor for HttpRequestExecutor {
    fn validate(&self, node: &NodeSchema) -> Result<(), NodeError> {
        let config: HttpRequestConfig = parse_config(node)?;
        if config.url.trim().is_empty() {
            return Err(NodeError::ConfigError("http-request url is empty".to_string()));
        }
        match config.method.to_uppercase().as_str() {
            "GET" | "POST" | "PUT" | "PATCH" | "DELETE" | "HEAD" => Ok(()),
            other => Err(NodeError::ConfigError(format!(
                "unsupported http method: {}",
                other
            ))),
        }
    }

    async fn execute(
        &self,
        node: &NodeSchema,
        inputs: &NodeInputs,
        pool: &VariablePool,
        context: &RuntimeContext,
    ) -> Result<NodeRunResult, NodeError> {
        let config: HttpRequestConfig = parse_config(node)?;
        let client = context.services.http()?;
        let request = Self::build_request(&config, inputs, pool)?;

        let response = context.guard(client.send(request)).await?;
        if response.status >= 400 {
            let preview: String = response.body.chars().take(ERROR_BODY_PREVIEW).collect();
            return Err(NodeError::HttpError {
                status: Some(response.status),
                message: format!("status {}: {}", response.status, preview),
            });
        }

        let parsed_body = serde_json::from_str::<Value>(&response.body).ok();
        let headers: Map<String, Value> = response
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();

        let mut outputs: HashMap<String, Value> = parsed_body
            .as_ref()
            .map(|body| dynamic_outputs(node, body))
            .unwrap_or_default();
        outputs.insert("status_code".to_string(), Value::from(response.status));
        outputs.insert(
            "body".to_string(),
            parsed_body.unwrap_or(Value::String(response.body)),
        );
        outputs.insert("headers".to_string(), Value::Object(headers));
        Ok(NodeRunResult::with_outputs(outputs))
    }
}
