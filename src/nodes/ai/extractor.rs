use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;

use crate::core::resolver::NodeInputs;
use crate::core::runtime_context::RuntimeContext;
use crate::core::variable_pool::VariablePool;
use crate::dsl::{NodeRunResult, NodeSchema, ValueType};
use crate::error::NodeError;
use crate::llm::types::{ChatCompletionRequest, ChatMessage, ModelConfig, ToolDefinition};
use crate::nodes::executor::NodeExecutor;
use crate::nodes::utils::{input_text, model_usage, parse_config};
use crate::template::render;

use super::history_messages;

const EXTRACT_TOOL: &str = "extract_fields";

#[derive(Debug, Clone, Deserialize)]
struct ExtractField {
    key: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    value_type: ValueType,
    #[serde(default)]
    required: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ExtractorConfig {
    #[serde(default)]
    model: ModelConfig,
    #[serde(default)]
    description: String,
    #[serde(default)]
    fields: Vec<ExtractField>,
}

fn extract_tool(description: &str, fields: &[ExtractField]) -> ToolDefinition {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for field in fields {
        let ty = match field.value_type {
            ValueType::Number => "number",
            ValueType::Boolean => "boolean",
            _ => "string",
        };
        properties.insert(
            field.key.clone(),
            json!({"type": ty, "description": field.description}),
        );
        if field.required {
            required.push(Value::String(field.key.clone()));
        }
    }
    ToolDefinition {
        name: EXTRACT_TOOL.to_string(),
        description: if description.is_empty() {
            "Extract the requested fields from the text".to_string()
        } else {
            description.to_string()
        },
        parameters: json!({
            "type": "object",
            "properties": properties,
            "required": required,
        }),
    }
}

/// Parse a JSON object out of a plain-text reply, tolerating a code fence.
fn parse_object(text: &str) -> Option<Map<String, Value>> {
    let trimmed = text.trim();
    let inner = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);
    match serde_json::from_str::<Value>(inner.trim()).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Keep declared fields only; numbers and booleans given as strings are
/// parsed.
fn collect_fields(fields: &[ExtractField], raw: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for field in fields {
        let Some(value) = raw.get(&field.key).filter(|v| !v.is_null()) else {
            continue;
        };
        let value = match (field.value_type, value) {
            (ValueType::Number, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| value.clone()),
            (ValueType::Boolean, Value::String(s)) => match s.trim() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => value.clone(),
            },
            _ => value.clone(),
        };
        out.insert(field.key.clone(), value);
    }
    out
}

pub struct FieldExtractorExecutor;

#[async_trait]
impl NodeExecutor for FieldExtractorExecutor {
    fn validate(&self, node: &NodeSchema) -> Result<(), NodeError> {
        let config: ExtractorConfig = parse_config(node)?;
        if config.fields.is_empty() {
            return Err(NodeError::ConfigError(
                "field-extractor needs at least one field".to_string(),
            ));
        }
        Ok(())
    }

    async fn execute(
        &self,
        node: &NodeSchema,
        inputs: &NodeInputs,
        pool: &VariablePool,
        context: &RuntimeContext,
    ) -> Result<NodeRunResult, NodeError> {
        let config: ExtractorConfig = parse_config(node)?;
        let model = context.services.model()?;

        let description = render(&config.description, pool, Some(inputs));
        let mut messages = vec![ChatMessage::system(format!(
            "Extract structured fields from the user's text by calling `{}`. {}",
            EXTRACT_TOOL, description
        ))];
        messages.extend(history_messages(inputs));
        messages.push(ChatMessage::user(input_text(inputs, "content")));

        let request = ChatCompletionRequest::new(&config.model, messages)
            .with_tools(vec![extract_tool(&description, &config.fields)]);
        let response = context.guard(model.chat_completion(request)).await?;

        let raw = response
            .tool_calls
            .iter()
            .find(|call| call.name == EXTRACT_TOOL)
            .and_then(|call| call.arguments.as_object().cloned())
            .or_else(|| parse_object(&response.content))
            .unwrap_or_default();
        let fields = collect_fields(&config.fields, &raw);
        let success = config
            .fields
            .iter()
            .filter(|f| f.required)
            .all(|f| fields.contains_key(&f.key));

        let mut outputs: HashMap<String, Value> = fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        outputs.insert("fields".to_string(), Value::Object(fields));
        outputs.insert("success".to_string(), Value::Bool(success));

        let mut result = NodeRunResult::with_outputs(outputs);
        result.usages.push(model_usage(node, &response.model, &response.usage));
        Ok(result)
    }
}
