//! Tool-calling agent loop.
//!
//! Each tool is a region of the graph hanging off the agent through a
//! `selected-tools` edge. The model sees one function per tool entry node;
//! a call runs that region as its own scope with the call arguments seeded
//! into the entry node, and the region's result becomes the tool message.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::core::dispatcher::DispatchOutcome;
use crate::core::resolver::NodeInputs;
use crate::core::run_state::{ResponseStatus, RunState};
use crate::core::runtime_context::RuntimeContext;
use crate::core::sub_graph_runner::ScopeRun;
use crate::core::variable_pool::VariablePool;
use crate::dsl::{NodeRunResult, NodeSchema, NodeUsage, ValueType};
use crate::error::{ErrorKind, NodeError, RunError, WorkflowError};
use crate::graph::Scope;
use crate::llm::types::{
    ChatCompletionRequest, ChatMessage, ModelConfig, ToolCall, ToolDefinition,
};
use crate::nodes::executor::NodeExecutor;
use crate::nodes::utils::{input_array, input_text, model_usage, parse_config};
use crate::template::render;

#[derive(Debug, Default, Deserialize)]
struct ToolAgentConfig {
    #[serde(default)]
    model: ModelConfig,
    #[serde(default)]
    system_prompt: String,
    /// Overrides the `user_question` input when set.
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    max_iterations: Option<usize>,
    #[serde(default = "default_true")]
    is_response_text: bool,
}

fn default_true() -> bool {
    true
}

/// JSON Schema type for a slot's value type.
fn json_schema_for(value_type: ValueType) -> Value {
    match value_type {
        ValueType::Any => json!({}),
        ValueType::String => json!({"type": "string"}),
        ValueType::Number => json!({"type": "number"}),
        ValueType::Boolean => json!({"type": "boolean"}),
        ValueType::Object => json!({"type": "object"}),
        ValueType::DatasetQuote => json!({"type": "array", "items": {"type": "object"}}),
        array => {
            let items = array.element().map(json_schema_for).unwrap_or_else(|| json!({}));
            json!({"type": "array", "items": items})
        }
    }
}

/// Function name the model sees for a tool entry node.
pub(crate) fn tool_name(entry: &NodeSchema) -> String {
    entry
        .display_name()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

fn tool_definition(entry: &NodeSchema) -> ToolDefinition {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for slot in entry.inputs.iter().filter(|slot| slot.tool_param) {
        let mut schema = json_schema_for(slot.value_type);
        if let (Some(description), Value::Object(map)) = (&slot.description, &mut schema) {
            map.insert("description".into(), Value::String(description.clone()));
        }
        properties.insert(slot.key.clone(), schema);
        if slot.required {
            required.push(Value::String(slot.key.clone()));
        }
    }
    ToolDefinition {
        name: tool_name(entry),
        description: entry
            .tool_description
            .clone()
            .unwrap_or_else(|| entry.display_name().to_string()),
        parameters: json!({
            "type": "object",
            "properties": properties,
            "required": required,
        }),
    }
}

/// What one tool call contributed back to the agent.
struct ToolReply {
    content: String,
    stop: bool,
}

/// Text handed back to the model for a finished tool region.
fn tool_content(state: &RunState) -> String {
    if !state.final_outputs.is_empty() {
        return serde_json::to_string(&state.final_outputs).unwrap_or_default();
    }
    if !state.answer_text.is_empty() {
        return state.answer_text.clone();
    }
    state
        .responses
        .iter()
        .rev()
        .find(|response| response.status == ResponseStatus::Succeeded)
        .and_then(|response| serde_json::to_string(&response.outputs).ok())
        .unwrap_or_default()
}

struct AgentRun<'a> {
    node: &'a NodeSchema,
    context: &'a RuntimeContext,
    pool: &'a VariablePool,
    tools: HashMap<String, String>,
    variables: HashMap<String, Value>,
    usages: Vec<NodeUsage>,
    reported: Vec<RunError>,
}

impl AgentRun<'_> {
    async fn call_tool(&mut self, call: &ToolCall) -> Result<ToolReply, NodeError> {
        let Some(entry_id) = self.tools.get(&call.name).cloned() else {
            return Ok(ToolReply {
                content: format!("Tool error: unknown tool '{}'", call.name),
                stop: false,
            });
        };

        let seed: NodeInputs = match &call.arguments {
            Value::Object(args) => args.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            _ => NodeInputs::new(),
        };
        let mut pool = self.pool.clone();
        pool.replace_variables(self.variables.clone());

        debug!(node_id = %self.node.id, tool = %call.name, "running tool");
        let outcome = self
            .context
            .sub_graph_runner
            .run_scope(
                self.context,
                ScopeRun {
                    scope: Scope::Tool(entry_id),
                    pool,
                    seed,
                },
            )
            .await;

        let state = outcome.state;
        self.usages.extend(state.usages.iter().cloned());
        self.reported
            .extend(state.errors.iter().filter(|e| !e.fatal).cloned());

        match outcome.outcome {
            DispatchOutcome::Completed => {
                self.variables = state.pool.variables().clone();
                Ok(ToolReply {
                    content: tool_content(&state),
                    stop: state.stop_requested,
                })
            }
            DispatchOutcome::Failed(
                e @ (WorkflowError::Cancelled
                | WorkflowError::MaxStepsExceeded(_)
                | WorkflowError::Deadlock { .. }),
            ) => Err(e.into_node_error()),
            DispatchOutcome::Failed(e) => {
                warn!(node_id = %self.node.id, tool = %call.name, error = %e, "tool failed");
                self.reported.push(RunError::reported(
                    self.node.id.clone(),
                    e.kind(),
                    format!("tool '{}' failed: {}", call.name, e),
                ));
                Ok(ToolReply {
                    content: format!("Tool error: {}", e),
                    stop: false,
                })
            }
            DispatchOutcome::Suspended { node_id, .. } => Ok(ToolReply {
                content: format!("Tool error: node {} requires user input", node_id),
                stop: false,
            }),
        }
    }
}

pub struct ToolAgentExecutor;

#[async_trait]
impl NodeExecutor for ToolAgentExecutor {
    fn validate(&self, node: &NodeSchema) -> Result<(), NodeError> {
        let config: ToolAgentConfig = parse_config(node)?;
        if config.max_iterations == Some(0) {
            return Err(NodeError::ConfigError("max_iterations must be positive".into()));
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
        let config: ToolAgentConfig = parse_config(node)?;
        let model = context.services.model()?;
        let limit = config
            .max_iterations
            .unwrap_or(context.config.tool_max_iterations);

        let entries = context.graph.tool_entries(&node.id);
        let tool_defs: Vec<ToolDefinition> = entries.iter().map(|e| tool_definition(e)).collect();

        let question = match &config.query {
            Some(template) => render(template, pool, Some(inputs)),
            None => input_text(inputs, "user_question"),
        };
        let mut messages = Vec::new();
        if !config.system_prompt.is_empty() {
            messages.push(ChatMessage::system(render(&config.system_prompt, pool, Some(inputs))));
        }
        for item in input_array(inputs, "history") {
            if let Ok(message) = serde_json::from_value::<ChatMessage>(item) {
                messages.push(message);
            }
        }
        messages.push(ChatMessage::user(question));

        let mut run = AgentRun {
            node,
            context,
            pool,
            tools: entries
                .iter()
                .map(|e| (tool_name(e), e.id.clone()))
                .collect(),
            variables: pool.variables().clone(),
            usages: Vec::new(),
            reported: Vec::new(),
        };

        let mut tool_call_log: Vec<Value> = Vec::new();
        let mut final_text: Option<String> = None;
        let mut partial_text = String::new();
        let mut iterations = 0usize;

        while iterations < limit {
            let request = ChatCompletionRequest::new(&config.model, messages.clone())
                .with_tools(tool_defs.clone());
            let response = context.guard(model.chat_completion(request)).await?;
            iterations += 1;
            run.usages.push(model_usage(node, &response.model, &response.usage));

            if response.tool_calls.is_empty() {
                final_text = Some(response.content);
                break;
            }
            if !response.content.is_empty() {
                partial_text.push_str(&response.content);
            }

            messages.push(ChatMessage::assistant_tool_calls(
                response.content.clone(),
                response.tool_calls.clone(),
            ));

            let mut stopped = None;
            for call in &response.tool_calls {
                let reply = run.call_tool(call).await?;
                tool_call_log.push(json!({
                    "iteration": iterations,
                    "tool": &call.name,
                    "arguments": &call.arguments,
                    "result": &reply.content,
                }));
                messages.push(ChatMessage::tool(call.id.clone(), reply.content.clone()));
                if reply.stop {
                    stopped = Some(reply.content);
                    break;
                }
            }
            if let Some(content) = stopped {
                final_text = Some(content);
                break;
            }
        }

        let text = match final_text {
            Some(text) => text,
            None => {
                warn!(node_id = %node.id, limit, "tool agent iteration limit reached");
                let error = WorkflowError::IterationLimit {
                    node_id: node.id.clone(),
                    limit,
                };
                run.reported.push(RunError::reported(
                    node.id.clone(),
                    ErrorKind::IterationLimit,
                    error.to_string(),
                ));
                partial_text
            }
        };

        let mut result = NodeRunResult::with_outputs(HashMap::from([
            ("answer_text".to_string(), Value::String(text.clone())),
            ("tool_calls".to_string(), Value::Array(tool_call_log)),
            ("iterations".to_string(), json!(iterations)),
        ]));
        if config.is_response_text {
            result.answer_text = Some(text);
        }
        result.usages = run.usages;
        result.reported_errors = run.reported;
        result.variable_updates =
            VariablePool::with_variables(run.variables).changed_variables(pool.variables());
        Ok(result)
    }
}

// ================================
// Tool region nodes
// ================================

/// Exposes the tool-call arguments it was seeded with.
pub struct RunToolExecutor;

#[async_trait]
impl NodeExecutor for RunToolExecutor {
    async fn execute(
        &self,
        _node: &NodeSchema,
        inputs: &NodeInputs,
        _pool: &VariablePool,
        _context: &RuntimeContext,
    ) -> Result<NodeRunResult, NodeError> {
        Ok(NodeRunResult::with_outputs(inputs.clone()))
    }
}

/// Ends the enclosing agent loop once its tool region completes.
pub struct StopToolExecutor;

#[async_trait]
impl NodeExecutor for StopToolExecutor {
    async fn execute(
        &self,
        _node: &NodeSchema,
        inputs: &NodeInputs,
        _pool: &VariablePool,
        _context: &RuntimeContext,
    ) -> Result<NodeRunResult, NodeError> {
        let mut result = NodeRunResult::with_outputs(inputs.clone());
        result.stop_requested = true;
        Ok(result)
    }
}
