use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};

use crate::core::resolver::NodeInputs;
use crate::core::runtime_context::RuntimeContext;
use crate::core::variable_pool::VariablePool;
use crate::dsl::{NodeRunResult, NodeSchema};
use crate::error::NodeError;
use crate::llm::types::{ChatCompletionRequest, ChatMessage, ModelConfig, ToolDefinition};
use crate::nodes::executor::NodeExecutor;
use crate::nodes::utils::{input_text, model_usage, parse_config};
use crate::template::render;

use super::history_messages;

const CLASSIFY_TOOL: &str = "classify_question";

#[derive(Debug, Clone, Deserialize)]
struct Category {
    id: String,
    value: String,
}

#[derive(Debug, Default, Deserialize)]
struct ClassifierConfig {
    #[serde(default)]
    model: ModelConfig,
    #[serde(default)]
    categories: Vec<Category>,
    #[serde(default)]
    instruction: Option<String>,
}

fn validate_categories(categories: &[Category]) -> Result<(), NodeError> {
    if categories.is_empty() {
        return Err(NodeError::ConfigError(
            "classifier categories must not be empty".to_string(),
        ));
    }
    let mut ids = HashSet::new();
    for category in categories {
        if category.id.trim().is_empty() {
            return Err(NodeError::ConfigError(
                "classifier category id must not be empty".to_string(),
            ));
        }
        if !ids.insert(category.id.as_str()) {
            return Err(NodeError::ConfigError(format!(
                "duplicate classifier category id: {}",
                category.id
            )));
        }
    }
    Ok(())
}

fn build_system_prompt(categories: &[Category], instruction: Option<&str>) -> String {
    let mut prompt = String::from(
        "Classify the user's question into exactly one of the categories below.\n\n### Categories\n",
    );
    for category in categories {
        prompt.push_str(&format!("- id: \"{}\", description: \"{}\"\n", category.id, category.value));
    }
    if let Some(instruction) = instruction.filter(|i| !i.trim().is_empty()) {
        prompt.push_str("\n### Instructions\n");
        prompt.push_str(instruction.trim());
        prompt.push('\n');
    }
    prompt.push_str(&format!(
        "\nCall `{}` with the chosen id, or reply with the id alone.",
        CLASSIFY_TOOL
    ));
    prompt
}

fn classify_tool(categories: &[Category]) -> ToolDefinition {
    let ids: Vec<&str> = categories.iter().map(|c| c.id.as_str()).collect();
    ToolDefinition {
        name: CLASSIFY_TOOL.to_string(),
        description: "Select the category that best matches the question".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {"type": {"type": "string", "enum": ids}},
            "required": ["type"],
        }),
    }
}

/// Map the model's answer onto a category: by id, then by description,
/// otherwise the last category.
fn pick_category<'a>(categories: &'a [Category], answer: &str) -> Option<&'a Category> {
    let answer = answer.trim().trim_matches('"').trim();
    let by_json = serde_json::from_str::<Value>(answer).ok().and_then(|v| {
        v.get("type")
            .or_else(|| v.get("category_id"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    let answer = by_json.as_deref().unwrap_or(answer);
    categories
        .iter()
        .find(|c| c.id == answer)
        .or_else(|| categories.iter().find(|c| c.value == answer))
        .or_else(|| categories.last())
}

pub struct ClassifierExecutor;

#[async_trait]
impl NodeExecutor for ClassifierExecutor {
    fn validate(&self, node: &NodeSchema) -> Result<(), NodeError> {
        let config: ClassifierConfig = parse_config(node)?;
        validate_categories(&config.categories)
    }

    async fn execute(
        &self,
        node: &NodeSchema,
        inputs: &NodeInputs,
        pool: &VariablePool,
        context: &RuntimeContext,
    ) -> Result<NodeRunResult, NodeError> {
        let config: ClassifierConfig = parse_config(node)?;
        validate_categories(&config.categories)?;
        let model = context.services.model()?;

        let instruction = config
            .instruction
            .as_deref()
            .map(|template| render(template, pool, Some(inputs)));
        let mut messages = vec![ChatMessage::system(build_system_prompt(
            &config.categories,
            instruction.as_deref(),
        ))];
        messages.extend(history_messages(inputs));
        messages.push(ChatMessage::user(input_text(inputs, "user_question")));

        let request = ChatCompletionRequest::new(&config.model, messages)
            .with_tools(vec![classify_tool(&config.categories)]);
        let response = context.guard(model.chat_completion(request)).await?;

        let answer = response
            .tool_calls
            .iter()
            .find(|call| call.name == CLASSIFY_TOOL)
            .and_then(|call| call.arguments.get("type"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| response.content.clone());
        let category = pick_category(&config.categories, &answer).ok_or_else(|| {
            NodeError::ConfigError("classifier categories must not be empty".to_string())
        })?;

        let mut result = NodeRunResult::with_outputs(HashMap::from([
            ("category".to_string(), Value::String(category.value.clone())),
            ("category_id".to_string(), Value::String(category.id.clone())),
        ]))
        .select(vec![category.id.clone()]);
        result.usages.push(model_usage(node, &response.model, &response.usage));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn categories() -> Vec<Category> {
        vec![
            Category {
                id: "greeting".into(),
                value: "Greetings and small talk".into(),
            },
            Category {
                id: "other".into(),
                value: "Anything else".into(),
            },
        ]
    }

    #[test]
    fn test_pick_by_id_value_or_json() {
        let cats = categories();
        let pick = |answer: &str| pick_category(&cats, answer).map(|c| c.id.as_str());
        assert_eq!(pick("greeting"), Some("greeting"));
        assert_eq!(pick(" \"greeting\" "), Some("greeting"));
        assert_eq!(pick("Anything else"), Some("other"));
        assert_eq!(pick(r#"{"type": "greeting"}"#), Some("greeting"));
    }

    #[test]
    fn test_unknown_answer_falls_back_to_last() {
        let cats = categories();
        assert_eq!(pick_category(&cats, "weather").map(|c| c.id.as_str()), Some("other"));
        assert!(pick_category(&[], "weather").is_none());
    }

    #[test]
    fn test_validate_categories() {
        assert!(validate_categories(&[]).is_err());
        let mut cats = categories();
        cats[1].id = "greeting".into();
        let err = validate_categories(&cats).unwrap_err();
        assert!(err.to_string().contains("duplicate classifier category id: greeting"));
    }
}
