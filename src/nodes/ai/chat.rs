use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

use crate::core::event_bus::GraphEngineEvent;
use crate::core::resolver::NodeInputs;
use crate::core::runtime_context::RuntimeContext;
use crate::core::variable_pool::VariablePool;
use crate::dsl::{NodeRunResult, NodeSchema};
use crate::error::NodeError;
use crate::llm::types::{ChatCompletionRequest, ChatMessage, ModelConfig};
use crate::nodes::executor::NodeExecutor;
use crate::nodes::utils::{input_array, input_text, model_usage, parse_config};
use crate::template::render;

use super::{format_quotes, history_messages};

#[derive(Debug, Deserialize)]
struct ModelChatConfig {
    #[serde(default)]
    model: ModelConfig,
    #[serde(default)]
    system_prompt: String,
    /// Wraps the formatted quotes; `{{quote}}` marks where they go.
    #[serde(default)]
    quote_template: Option<String>,
    #[serde(default = "default_true")]
    is_response_text: bool,
    #[serde(default = "default_true")]
    stream: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ModelChatConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            system_prompt: String::new(),
            quote_template: None,
            is_response_text: true,
            stream: true,
        }
    }
}

pub struct ModelChatExecutor;

#[async_trait]
impl NodeExecutor for ModelChatExecutor {
    async fn execute(
        &self,
        node: &NodeSchema,
        inputs: &NodeInputs,
        pool: &VariablePool,
        context: &RuntimeContext,
    ) -> Result<NodeRunResult, NodeError> {
        let config: ModelChatConfig = parse_config(node)?;
        let model = context.services.model()?;

        let mut system = render(&config.system_prompt, pool, Some(inputs));
        let quotes = input_array(inputs, "quotes");
        if !quotes.is_empty() {
            let block = format_quotes(&quotes);
            let block = match &config.quote_template {
                Some(template) => template.replace("{{quote}}", &block),
                None => format!("Use the following references when answering:\n{}", block),
            };
            if !system.is_empty() {
                system.push_str("\n\n");
            }
            system.push_str(&block);
        }

        let history = history_messages(inputs);
        let question = input_text(inputs, "user_question");
        let mut messages = Vec::with_capacity(history.len() + 2);
        if !system.is_empty() {
            messages.push(ChatMessage::system(system));
        }
        messages.extend(history.iter().cloned());
        messages.push(ChatMessage::user(question.clone()));

        let request = ChatCompletionRequest::new(&config.model, messages);
        let response = if config.stream && config.is_response_text {
            let run_id = context.run_id.clone();
            let node_id = node.id.clone();
            let events = context.events.clone();
            let on_delta = move |text: &str| {
                if let Some(events) = &events {
                    events.try_emit(GraphEngineEvent::AnswerDelta {
                        run_id: run_id.clone(),
                        node_id: node_id.clone(),
                        text: text.to_string(),
                    });
                }
            };
            context
                .guard(model.chat_completion_stream(request, &on_delta))
                .await?
        } else {
            context.guard(model.chat_completion(request)).await?
        };

        let mut new_history: Vec<Value> = history
            .iter()
            .filter_map(|m| serde_json::to_value(m).ok())
            .collect();
        new_history.push(serde_json::to_value(ChatMessage::user(question))?);
        new_history.push(serde_json::to_value(ChatMessage::assistant(
            response.content.clone(),
        ))?);

        let mut result = NodeRunResult::with_outputs(HashMap::from([
            (
                "answer_text".to_string(),
                Value::String(response.content.clone()),
            ),
            ("history".to_string(), Value::Array(new_history)),
        ]));
        if config.is_response_text {
            result.answer_text = Some(response.content);
        }
        result.metadata = serde_json::json!({ "model": &response.model });
        result.usages.push(model_usage(node, &response.model, &response.usage));
        Ok(result)
    }
}
