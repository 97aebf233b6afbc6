//! Workflow dispatcher: the activation scheduler.
//!
//! The [`WorkflowDispatcher`] drives one scope of a run (the root graph, one
//! loop iteration or one tool call). Each pass skips every node whose gating
//! edges are all skipped, resolves the inputs of every runnable node and
//! executes those nodes concurrently through their registered
//! [`NodeExecutor`](crate::nodes::NodeExecutor). Results are committed one at
//! a time under the run-state lock, which decides the outgoing edge states
//! that feed the next pass.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde_json::Value;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::core::event_bus::GraphEngineEvent;
use crate::core::resolver::{resolve_inputs, NodeInputs, Resolution};
use crate::core::run_state::{NodeResponse, NodeStatus, ResponseStatus, RunState};
use crate::core::runtime_context::RuntimeContext;
use crate::core::variable_pool::VariablePool;
use crate::dsl::{Cardinality, NodeRunResult, NodeSchema, NodeUsage};
use crate::error::{NodeError, RunError, WorkflowError};
use crate::graph::{check_node_run_status, Graph, RunDecision, Scope};
use crate::nodes::human_input::InteractionRequest;

/// Configuration for the workflow engine
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct EngineConfig {
    /// Node executions per run, loop and tool bodies included.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// Concurrent executors per scope; 0 means unbounded.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_parallel_enabled")]
    pub parallel_enabled: bool,
    /// Timeout for each external call made by an executor.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: Option<u64>,
    #[serde(default = "default_loop_max_iterations")]
    pub loop_max_iterations: usize,
    #[serde(default = "default_tool_max_iterations")]
    pub tool_max_iterations: usize,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    #[serde(default = "default_quote_token_limit")]
    pub default_quote_token_limit: usize,
}

fn default_max_steps() -> usize {
    500
}

fn default_max_concurrency() -> usize {
    8
}

fn default_parallel_enabled() -> bool {
    true
}

fn default_call_timeout_secs() -> Option<u64> {
    Some(120)
}

fn default_loop_max_iterations() -> usize {
    100
}

fn default_tool_max_iterations() -> usize {
    30
}

fn default_rrf_k() -> f64 {
    60.0
}

fn default_quote_token_limit() -> usize {
    5000
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_steps: default_max_steps(),
            max_concurrency: default_max_concurrency(),
            parallel_enabled: default_parallel_enabled(),
            call_timeout_secs: default_call_timeout_secs(),
            loop_max_iterations: default_loop_max_iterations(),
            tool_max_iterations: default_tool_max_iterations(),
            rrf_k: default_rrf_k(),
            default_quote_token_limit: default_quote_token_limit(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    pub fn concurrency_limit(&self) -> usize {
        if !self.parallel_enabled {
            1
        } else if self.max_concurrency == 0 {
            usize::MAX
        } else {
            self.max_concurrency
        }
    }
}

/// How a dispatcher pass over a scope ended.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    Completed,
    Suspended {
        node_id: String,
        request: InteractionRequest,
    },
    Failed(WorkflowError),
}

struct SchedulePass {
    ready: Vec<(NodeSchema, NodeInputs)>,
    skipped: Vec<String>,
}

struct TaskOutcome {
    node: NodeSchema,
    result: Result<NodeRunResult, NodeError>,
    elapsed_ms: u64,
}

enum Handled {
    Committed,
    Suspend(String, InteractionRequest),
    Fatal(WorkflowError),
}

/// The main workflow dispatcher: drives graph execution within one scope
pub struct WorkflowDispatcher {
    context: Arc<RuntimeContext>,
    scope: Scope,
    state: Arc<RwLock<RunState>>,
    /// Values injected into the scope entry node (loop item, tool arguments).
    seed: Option<NodeInputs>,
    cancel: CancellationToken,
}

impl WorkflowDispatcher {
    pub fn new(context: Arc<RuntimeContext>, state: RunState) -> Self {
        let cancel = context.cancel.child_token();
        Self {
            scope: state.scope.clone(),
            context,
            state: Arc::new(RwLock::new(state)),
            seed: None,
            cancel,
        }
    }

    pub fn with_seed(mut self, seed: NodeInputs) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn snapshot(&self) -> RunState {
        self.state.read().clone()
    }

    /// Drive the scope until it completes, suspends or fails. Failures are
    /// also recorded as the fatal entry of the run state's error list.
    pub async fn run(&self) -> DispatchOutcome {
        let graph = self.context.graph.clone();
        let limit = self.context.config.concurrency_limit();
        let mut join_set: JoinSet<TaskOutcome> = JoinSet::new();
        let mut suspension: Option<(String, InteractionRequest)> = None;
        let mut failure: Option<WorkflowError> = None;

        loop {
            if failure.is_none() && self.context.cancel.is_cancelled() {
                failure = Some(WorkflowError::Cancelled);
                self.cancel.cancel();
            }

            if failure.is_none() && suspension.is_none() {
                match self.schedule_pass(&graph) {
                    Ok(pass) => {
                        for node_id in pass.skipped {
                            debug!(run_id = %self.context.run_id, node_id = %node_id, "node skipped");
                            self.context
                                .emit(GraphEngineEvent::NodeSkipped {
                                    run_id: self.context.run_id.clone(),
                                    node_id,
                                    timestamp: self.context.now(),
                                })
                                .await;
                        }
                        if let Err(e) = self.spawn_ready(pass.ready, &mut join_set, limit).await {
                            failure = Some(e);
                        }
                    }
                    Err(e) => failure = Some(e),
                }
                if failure.is_some() {
                    self.cancel.cancel();
                }
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(join_error) => {
                    failure.get_or_insert(WorkflowError::InternalError(join_error.to_string()));
                    self.cancel.cancel();
                    continue;
                }
            };
            match self.handle_outcome(&graph, outcome).await {
                Handled::Committed => {}
                Handled::Suspend(node_id, request) => {
                    if suspension.is_none() {
                        suspension = Some((node_id, request));
                    }
                }
                Handled::Fatal(e) => {
                    if failure.is_none() {
                        failure = Some(e);
                        self.cancel.cancel();
                    }
                }
            }
        }

        if let Some(e) = failure {
            error!(run_id = %self.context.run_id, error = %e, "run failed");
            self.state.write().errors.push(e.to_run_error());
            return DispatchOutcome::Failed(e);
        }
        if let Some((node_id, request)) = suspension {
            return DispatchOutcome::Suspended { node_id, request };
        }

        let pending = self.state.read().pending_nodes(&graph);
        if !pending.is_empty() {
            let e = WorkflowError::Deadlock { pending };
            error!(run_id = %self.context.run_id, error = %e, "scheduler deadlock");
            self.state.write().errors.push(e.to_run_error());
            return DispatchOutcome::Failed(e);
        }
        DispatchOutcome::Completed
    }

    /// Propagate skips to a fixpoint, then collect runnable nodes with
    /// resolved inputs.
    fn schedule_pass(&self, graph: &Graph) -> Result<SchedulePass, WorkflowError> {
        let mut state = self.state.write();
        let nodes = graph.nodes_in_scope(&self.scope);

        let mut skipped = Vec::new();
        loop {
            let mut changed = false;
            for node in &nodes {
                if state.node_status.contains_key(&node.id) {
                    continue;
                }
                if check_node_run_status(graph, node, &self.scope, &state.edge_status)
                    == RunDecision::Skip
                {
                    state.mark_skipped(graph, &node.id);
                    skipped.push(node.id.clone());
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        let mut ready = Vec::new();
        for node in &nodes {
            if state.node_status.contains_key(&node.id)
                || check_node_run_status(graph, node, &self.scope, &state.edge_status)
                    != RunDecision::Run
            {
                continue;
            }
            let seed = if graph.is_scope_entry(node, &self.scope) {
                self.seed.as_ref()
            } else {
                None
            };
            if let Resolution::Ready(inputs) = resolve_inputs(graph, &state, node, seed)? {
                ready.push(((*node).clone(), inputs));
            }
        }
        Ok(SchedulePass { ready, skipped })
    }

    async fn spawn_ready(
        &self,
        ready: Vec<(NodeSchema, NodeInputs)>,
        join_set: &mut JoinSet<TaskOutcome>,
        limit: usize,
    ) -> Result<(), WorkflowError> {
        if ready.is_empty() {
            return Ok(());
        }
        let pool = Arc::new(self.state.read().pool.clone());
        for (node, inputs) in ready {
            if join_set.len() >= limit {
                break;
            }
            self.context.charge_step()?;
            self.state
                .write()
                .node_status
                .insert(node.id.clone(), NodeStatus::Running);

            debug!(run_id = %self.context.run_id, node_id = %node.id, kind = %node.kind, "node started");
            self.context
                .emit(GraphEngineEvent::NodeStarted {
                    run_id: self.context.run_id.clone(),
                    node_id: node.id.clone(),
                    kind: node.kind,
                    timestamp: self.context.now(),
                })
                .await;

            join_set.spawn(execute_node(
                self.context.clone(),
                self.cancel.clone(),
                node,
                inputs,
                pool.clone(),
            ));
        }
        Ok(())
    }

    async fn handle_outcome(&self, graph: &Graph, outcome: TaskOutcome) -> Handled {
        let TaskOutcome {
            node,
            result,
            elapsed_ms,
        } = outcome;
        let run_id = self.context.run_id.clone();

        match result {
            Ok(NodeRunResult {
                interaction: Some(request),
                ..
            }) => {
                self.state.write().node_status.remove(&node.id);
                Handled::Suspend(node.id, request)
            }
            Ok(result) => {
                let (usages, outputs) = {
                    let mut state = self.state.write();
                    commit_result(graph, &mut state, &node, result, elapsed_ms)
                };
                // Usages of nested scopes were recorded when those scopes committed.
                for usage in usages.iter().filter(|usage| usage.node_id == node.id) {
                    self.context.record_usage(usage);
                }
                debug!(run_id = %run_id, node_id = %node.id, elapsed_ms, "node succeeded");
                self.context
                    .emit(GraphEngineEvent::NodeSucceeded {
                        run_id,
                        node_id: node.id,
                        outputs,
                        elapsed_ms,
                        timestamp: self.context.now(),
                    })
                    .await;
                Handled::Committed
            }
            Err(NodeError::Cancelled) => Handled::Fatal(WorkflowError::Cancelled),
            Err(e) => match node.error_slot() {
                Some(slot) if e.is_catchable() => {
                    warn!(run_id = %run_id, node_id = %node.id, error = %e, "node failure routed to error output");
                    {
                        let mut state = self.state.write();
                        commit_caught(graph, &mut state, &node, &slot.key, &e, elapsed_ms);
                    }
                    self.context
                        .emit(GraphEngineEvent::NodeFailed {
                            run_id,
                            node_id: node.id,
                            error: e.to_string(),
                            caught: true,
                            timestamp: self.context.now(),
                        })
                        .await;
                    Handled::Committed
                }
                _ => {
                    self.state.write().responses.push(NodeResponse {
                        node_id: node.id.clone(),
                        node_name: node.display_name().to_string(),
                        kind: node.kind,
                        status: ResponseStatus::Failed,
                        outputs: HashMap::new(),
                        metadata: Value::Null,
                        error: Some(e.to_string()),
                        elapsed_ms,
                    });
                    self.context
                        .emit(GraphEngineEvent::NodeFailed {
                            run_id,
                            node_id: node.id.clone(),
                            error: e.to_string(),
                            caught: false,
                            timestamp: self.context.now(),
                        })
                        .await;
                    Handled::Fatal(WorkflowError::NodeExecution {
                        node_id: node.id,
                        error: e,
                    })
                }
            },
        }
    }
}

async fn execute_node(
    context: Arc<RuntimeContext>,
    cancel: CancellationToken,
    node: NodeSchema,
    inputs: NodeInputs,
    pool: Arc<VariablePool>,
) -> TaskOutcome {
    let started = Instant::now();
    let result = tokio::select! {
        _ = cancel.cancelled() => Err(NodeError::Cancelled),
        result = execute_with_retry(&context, &cancel, &node, &inputs, &pool) => result,
    };
    TaskOutcome {
        node,
        result,
        elapsed_ms: started.elapsed().as_millis() as u64,
    }
}

async fn execute_with_retry(
    context: &RuntimeContext,
    cancel: &CancellationToken,
    node: &NodeSchema,
    inputs: &NodeInputs,
    pool: &VariablePool,
) -> Result<NodeRunResult, NodeError> {
    let executor = context.registry.get(node.kind).ok_or_else(|| {
        NodeError::ConfigError(format!("No executor for node kind: {}", node.kind))
    })?;
    let (max_retries, interval_ms) = node
        .retry
        .as_ref()
        .map(|retry| (retry.max_retries, retry.retry_interval_ms))
        .unwrap_or((0, 0));

    let mut attempt = 0;
    loop {
        match executor.execute(node, inputs, pool, context).await {
            Ok(result) => return Ok(result),
            Err(e) if attempt < max_retries && e.is_retryable() && !cancel.is_cancelled() => {
                attempt += 1;
                warn!(node_id = %node.id, attempt, error = %e, "retrying node");
                if interval_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(interval_ms)).await;
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// Commit a successful result: outputs (with declared defaults), variable
/// updates, answer text, usages and the outgoing edge decisions.
pub(crate) fn commit_result(
    graph: &Graph,
    state: &mut RunState,
    node: &NodeSchema,
    result: NodeRunResult,
    elapsed_ms: u64,
) -> (Vec<NodeUsage>, Value) {
    let NodeRunResult {
        mut outputs,
        selected_handles,
        metadata,
        usages,
        variable_updates,
        answer_text,
        final_outputs,
        reported_errors,
        stop_requested,
        ..
    } = result;

    for slot in &node.outputs {
        if slot.cardinality == Cardinality::Error || outputs.contains_key(&slot.key) {
            continue;
        }
        if let Some(default) = &slot.default {
            outputs.insert(slot.key.clone(), default.clone());
        }
    }

    for (name, value) in variable_updates {
        state.pool.set_variable(name, value);
    }
    if let Some(text) = answer_text {
        state.answer_text.push_str(&text);
    }
    state.final_outputs.extend(final_outputs);
    state.errors.extend(reported_errors);
    state.usages.extend(usages.iter().cloned());
    state.stop_requested |= stop_requested;

    let error_handle = node
        .outputs
        .iter()
        .find(|slot| slot.cardinality == Cardinality::Error)
        .map(|slot| slot.key.as_str());
    state.activate_edges(
        graph,
        &node.id,
        &outputs,
        selected_handles.as_deref(),
        error_handle,
    );

    let output_json: Value = outputs
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect::<serde_json::Map<_, _>>()
        .into();
    state.responses.push(NodeResponse {
        node_id: node.id.clone(),
        node_name: node.display_name().to_string(),
        kind: node.kind,
        status: ResponseStatus::Succeeded,
        outputs: outputs.clone(),
        metadata,
        error: None,
        elapsed_ms,
    });
    state.pool.set_outputs(node.id.clone(), outputs);
    state
        .node_status
        .insert(node.id.clone(), NodeStatus::Succeeded);
    (usages, output_json)
}

fn commit_caught(
    graph: &Graph,
    state: &mut RunState,
    node: &NodeSchema,
    error_key: &str,
    error: &NodeError,
    elapsed_ms: u64,
) {
    let outputs = HashMap::from([(error_key.to_string(), Value::String(error.to_string()))]);
    state.route_error(graph, &node.id, error_key);
    state.errors.push(RunError::reported(
        node.id.clone(),
        error.kind(),
        error.to_string(),
    ));
    state.responses.push(NodeResponse {
        node_id: node.id.clone(),
        node_name: node.display_name().to_string(),
        kind: node.kind,
        status: ResponseStatus::Caught,
        outputs: outputs.clone(),
        metadata: Value::Null,
        error: Some(error.to_string()),
        elapsed_ms,
    });
    state.pool.set_outputs(node.id.clone(), outputs);
    state.node_status.insert(node.id.clone(), NodeStatus::Caught);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(config.max_steps, 500);
        assert_eq!(config.tool_max_iterations, 30);
        assert_eq!(config.loop_max_iterations, 100);
        assert_eq!(config.call_timeout_secs, Some(120));
        assert!((config.rrf_k - 60.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_concurrency_limit() {
        let mut config = EngineConfig::default();
        assert_eq!(config.concurrency_limit(), 8);
        config.max_concurrency = 0;
        assert_eq!(config.concurrency_limit(), usize::MAX);
        config.parallel_enabled = false;
        assert_eq!(config.concurrency_limit(), 1);
    }

    #[test]
    fn test_partial_config_override() {
        let config =
            EngineConfig::from_json_str(r#"{"max_steps": 10, "call_timeout_secs": null}"#).unwrap();
        assert_eq!(config.max_steps, 10);
        assert_eq!(config.call_timeout_secs, None);
        assert_eq!(config.max_concurrency, 8);
    }
}
