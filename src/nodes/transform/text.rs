//! Text concatenation node executor.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

use crate::core::resolver::NodeInputs;
use crate::core::runtime_context::RuntimeContext;
use crate::core::variable_pool::VariablePool;
use crate::dsl::{NodeRunResult, NodeSchema};
use crate::error::NodeError;
use crate::nodes::executor::NodeExecutor;
use crate::nodes::utils::parse_config;
use crate::template::{render, value_to_text};

#[derive(Debug, Default, Deserialize)]
struct TextConcatConfig {
    /// Template over inputs and variables. Without one, the declared
    /// inputs are joined with `separator`.
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    separator: String,
}

pub struct TextConcatExecutor;

#[async_trait]
impl NodeExecutor for TextConcatExecutor {
    async fn execute(
        &self,
        node: &NodeSchema,
        inputs: &NodeInputs,
        pool: &VariablePool,
        _context: &RuntimeContext,
    ) -> Result<NodeRunResult, NodeError> {
        let config: TextConcatConfig = parse_config(node)?;
        let text = match config.text {
            Some(template) => render(&template, pool, Some(inputs)),
            None => node
                .inputs
                .iter()
                .filter_map(|slot| inputs.get(&slot.key))
                .map(|value| match value {
                    Value::Array(items) => items
                        .iter()
                        .map(value_to_text)
                        .collect::<Vec<_>>()
                        .join(&config.separator),
                    other => value_to_text(other),
                })
                .collect::<Vec<_>>()
                .join(&config.separator),
        };
        Ok(NodeRunResult::with_outputs(HashMap::from([(
            "text".to_string(),
            Value::String(text),
        )])))
    }
}
