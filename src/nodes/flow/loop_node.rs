//! Loop Node executor.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::core::dispatcher::DispatchOutcome;
use crate::core::resolver::NodeInputs;
use crate::core::run_state::NodeStatus;
use crate::core::runtime_context::RuntimeContext;
use crate::core::sub_graph_runner::ScopeRun;
use crate::core::variable_pool::VariablePool;
use crate::dsl::{NodeRunResult, NodeSchema};
use crate::error::{ErrorKind, NodeError, RunError, WorkflowError};
use crate::graph::Scope;
use crate::nodes::executor::NodeExecutor;
use crate::nodes::utils::{input_array, parse_config};

pub const LOOP_ARRAY_KEY: &str = "array";
pub const LOOP_ITEM_KEY: &str = "item";
pub const LOOP_INDEX_KEY: &str = "index";
pub const LOOP_VALUE_KEY: &str = "value";
pub const LOOP_RESULTS_KEY: &str = "results";

#[derive(Debug, Default, Deserialize)]
struct LoopConfig {
    #[serde(default)]
    max_iterations: Option<usize>,
}

pub struct LoopNodeExecutor;

#[async_trait]
impl NodeExecutor for LoopNodeExecutor {
    fn validate(&self, node: &NodeSchema) -> Result<(), NodeError> {
        let config: LoopConfig = parse_config(node)?;
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
        let config: LoopConfig = parse_config(node)?;
        let limit = config
            .max_iterations
            .unwrap_or(context.config.loop_max_iterations);
        let items = input_array(inputs, LOOP_ARRAY_KEY);
        let loop_end = context.graph.loop_end_of(&node.id).map(|n| n.id.clone());
        let body_nodes: Vec<String> = context
            .graph
            .nodes_in_scope(&Scope::LoopBody(node.id.clone()))
            .into_iter()
            .map(|n| n.id.clone())
            .collect();

        let before = pool.variables().clone();
        let mut variables = before.clone();
        let mut result = NodeRunResult::default();
        let mut results = Vec::with_capacity(items.len().min(limit));

        for (index, item) in items.iter().enumerate() {
            if index >= limit {
                warn!(node_id = %node.id, limit, total = items.len(), "loop iteration limit reached");
                let error = WorkflowError::IterationLimit {
                    node_id: node.id.clone(),
                    limit,
                };
                result.reported_errors.push(RunError::reported(
                    node.id.clone(),
                    ErrorKind::IterationLimit,
                    error.to_string(),
                ));
                break;
            }

            // Fresh body outputs per iteration; variables carry over.
            let mut body_pool = pool.clone();
            for id in &body_nodes {
                body_pool.remove_outputs(id);
            }
            body_pool.replace_variables(variables.clone());

            debug!(node_id = %node.id, index, "loop iteration");
            let outcome = context
                .sub_graph_runner
                .run_scope(
                    context,
                    ScopeRun {
                        scope: Scope::LoopBody(node.id.clone()),
                        pool: body_pool,
                        seed: NodeInputs::from([
                            (LOOP_ITEM_KEY.to_string(), item.clone()),
                            (LOOP_INDEX_KEY.to_string(), json!(index)),
                        ]),
                    },
                )
                .await;

            let state = match outcome.outcome {
                DispatchOutcome::Completed => outcome.state,
                DispatchOutcome::Failed(e) => return Err(e.into_node_error()),
                DispatchOutcome::Suspended { node_id, .. } => {
                    return Err(NodeError::ExecutionError(format!(
                        "interactive node {} cannot suspend inside loop {}",
                        node_id, node.id
                    )))
                }
            };

            let value = loop_end
                .as_deref()
                .filter(|id| state.status(id) == Some(NodeStatus::Succeeded))
                .and_then(|id| state.pool.output(id, LOOP_VALUE_KEY))
                .cloned()
                .unwrap_or(Value::Null);
            results.push(value);

            variables = state.pool.variables().clone();
            result.usages.extend(state.usages);
            result
                .reported_errors
                .extend(state.errors.into_iter().filter(|e| !e.fatal));
            if !state.answer_text.is_empty() {
                result
                    .answer_text
                    .get_or_insert_with(String::new)
                    .push_str(&state.answer_text);
            }
            result.final_outputs.extend(state.final_outputs);
        }

        result.variable_updates = VariablePool::with_variables(variables).changed_variables(&before);
        result.metadata = json!({ "iterations": results.len() });
        result.outputs = HashMap::from([(LOOP_RESULTS_KEY.to_string(), Value::Array(results))]);
        Ok(result)
    }
}

/// Entry of a loop body: exposes the current item and index.
pub struct LoopStartExecutor;

#[async_trait]
impl NodeExecutor for LoopStartExecutor {
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

/// Collects the iteration result from its `value` input.
pub struct LoopEndExecutor;

#[async_trait]
impl NodeExecutor for LoopEndExecutor {
    async fn execute(
        &self,
        _node: &NodeSchema,
        inputs: &NodeInputs,
        _pool: &VariablePool,
        _context: &RuntimeContext,
    ) -> Result<NodeRunResult, NodeError> {
        let value = inputs.get(LOOP_VALUE_KEY).cloned().unwrap_or(Value::Null);
        Ok(NodeRunResult::with_outputs(HashMap::from([(
            LOOP_VALUE_KEY.to_string(),
            value,
        )])))
    }
}
