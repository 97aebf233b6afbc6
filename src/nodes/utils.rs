use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::resolver::NodeInputs;
use crate::dsl::{NodeSchema, NodeUsage};
use crate::error::NodeError;
use crate::llm::types::TokenUsage;
use crate::template::value_to_text;

/// Deserialize a node's kind-specific config; an absent config is the
/// default.
pub fn parse_config<T: DeserializeOwned + Default>(node: &NodeSchema) -> Result<T, NodeError> {
    if node.config.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(node.config.clone()).map_err(|e| {
        NodeError::ConfigError(format!("invalid config for node {}: {}", node.id, e))
    })
}

/// Text form of an input, empty when missing or null.
pub fn input_text(inputs: &NodeInputs, key: &str) -> String {
    inputs.get(key).map(value_to_text).unwrap_or_default()
}

pub fn input_array(inputs: &NodeInputs, key: &str) -> Vec<Value> {
    match inputs.get(key) {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other.clone()],
    }
}

pub fn model_usage(node: &NodeSchema, model: &str, usage: &TokenUsage) -> NodeUsage {
    NodeUsage {
        node_id: node.id.clone(),
        node_name: node.display_name().to_string(),
        model: Some(model.to_string()),
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        call_count: 1,
    }
}

/// Follow a dot path (`a.b.0.c`) into a JSON value.
pub fn extract_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}
