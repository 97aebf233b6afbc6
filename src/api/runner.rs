//! High-level workflow engine and builder.
//!
//! [`WorkflowEngine`] (constructed via [`WorkflowEngineBuilder`]) is the main
//! entry point. It validates a graph, drives the root scope through the
//! [`WorkflowDispatcher`] and turns the final run state into either a
//! [`RunResult`] or a [`Suspension`] carrying a continuation token.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::checkpoint::{Continuation, RunStore, CONTINUATION_VERSION};
use crate::core::dispatcher::{commit_result, DispatchOutcome, EngineConfig, WorkflowDispatcher};
use crate::core::event_bus::{EventEmitter, GraphEngineEvent};
use crate::core::http_client::HttpClient;
use crate::core::run_state::{NodeResponse, RunState};
use crate::core::runtime_context::{
    IdGenerator, RealIdGenerator, RealTimeProvider, RuntimeContext, Services, TimeProvider,
    UsageSink,
};
use crate::core::sub_graph_runner::{DefaultSubGraphRunner, SubGraphRunner};
use crate::core::variable_pool::VariablePool;
use crate::dsl::{EntryInput, NodeKind, NodeRunResult, NodeUsage, WorkflowSchema};
use crate::error::{RunError, WorkflowError};
use crate::graph::{build_graph, validate_executors, Graph, Scope};
use crate::knowledge::SearchClient;
use crate::llm::ModelClient;
use crate::nodes::executor::{NodeExecutor, NodeExecutorRegistry};
use crate::nodes::human_input::{InteractionRequest, UserInput};
use crate::sandbox::CodeSandbox;

/// System variable holding the run start time (RFC 3339, UTC).
pub const SYS_TIME_VAR: &str = "cTime";
/// System variable holding the run id.
pub const SYS_RUN_ID_VAR: &str = "runId";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
}

/// Final result of a run. A failed run still carries every response that
/// completed before the failure; the fatal entry is in `errors`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub status: RunStatus,
    pub final_outputs: HashMap<String, Value>,
    pub answer_text: String,
    pub node_responses: Vec<NodeResponse>,
    pub usages: Vec<NodeUsage>,
    pub errors: Vec<RunError>,
}

impl RunResult {
    fn from_state(state: RunState, status: RunStatus) -> Self {
        Self {
            run_id: state.run_id,
            status,
            final_outputs: state.final_outputs,
            answer_text: state.answer_text,
            node_responses: state.responses,
            usages: state.usages,
            errors: state.errors,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn fatal_error(&self) -> Option<&RunError> {
        self.errors.iter().find(|e| e.fatal)
    }

    pub fn response(&self, node_id: &str) -> Option<&NodeResponse> {
        self.node_responses.iter().find(|r| r.node_id == node_id)
    }

    /// Whether the node ran to completion (successfully or caught).
    pub fn executed(&self, node_id: &str) -> bool {
        self.response(node_id).is_some()
    }
}

/// A run paused at an interactive node, waiting for user input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suspension {
    pub run_id: String,
    /// Opaque token for [`WorkflowEngine::resume_run`].
    pub token: String,
    pub node_id: String,
    pub request: InteractionRequest,
    pub node_responses: Vec<NodeResponse>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(RunResult),
    Suspended(Suspension),
}

impl RunOutcome {
    pub fn completed(self) -> Option<RunResult> {
        match self {
            RunOutcome::Completed(result) => Some(result),
            RunOutcome::Suspended(_) => None,
        }
    }

    pub fn suspended(self) -> Option<Suspension> {
        match self {
            RunOutcome::Suspended(suspension) => Some(suspension),
            RunOutcome::Completed(_) => None,
        }
    }
}

/// Workflow engine with builder-based configuration.
///
/// One engine serves any number of runs; every run owns its own state.
pub struct WorkflowEngine {
    registry: Arc<NodeExecutorRegistry>,
    config: Arc<EngineConfig>,
    services: Services,
    run_store: Option<Arc<dyn RunStore>>,
    events: Option<EventEmitter>,
    sub_graph_runner: Arc<dyn SubGraphRunner>,
    id_generator: Arc<dyn IdGenerator>,
    time_provider: Arc<dyn TimeProvider>,
}

impl WorkflowEngine {
    pub fn builder() -> WorkflowEngineBuilder {
        WorkflowEngineBuilder {
            registry: NodeExecutorRegistry::new(),
            config: EngineConfig::default(),
            services: Services::default(),
            run_store: None,
            events: None,
            sub_graph_runner: Arc::new(DefaultSubGraphRunner),
            id_generator: Arc::new(RealIdGenerator),
            time_provider: Arc::new(RealTimeProvider),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Build and validate a graph without running it.
    pub fn validate(&self, schema: WorkflowSchema) -> Result<Graph, WorkflowError> {
        let graph = build_graph(schema)?;
        validate_executors(&graph, &self.registry)?;
        Ok(graph)
    }

    /// Start a run. Validation failures are returned as `Err` before any
    /// node executes; every later failure comes back as a failed
    /// [`RunResult`].
    pub async fn start_run(
        &self,
        schema: WorkflowSchema,
        variables: HashMap<String, Value>,
        entry: EntryInput,
    ) -> Result<RunOutcome, WorkflowError> {
        self.start_run_with_cancel(schema, variables, entry, CancellationToken::new())
            .await
    }

    pub async fn start_run_with_cancel(
        &self,
        schema: WorkflowSchema,
        variables: HashMap<String, Value>,
        entry: EntryInput,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, WorkflowError> {
        let graph = Arc::new(self.validate(schema)?);
        let run_id = self.id_generator.next_id();

        let mut seeded = HashMap::from([
            (
                SYS_TIME_VAR.to_string(),
                Value::String(self.time_provider.now().to_rfc3339()),
            ),
            (SYS_RUN_ID_VAR.to_string(), Value::String(run_id.clone())),
        ]);
        seeded.extend(variables);

        let state = RunState::new(
            run_id.clone(),
            Scope::Root,
            VariablePool::with_variables(seeded),
            &graph,
        );
        let context = self.context(&run_id, graph, entry, cancel);

        info!(run_id = %run_id, nodes = context.graph.nodes().len(), "run started");
        context
            .emit(GraphEngineEvent::RunStarted {
                run_id,
                resumed: false,
                timestamp: context.now(),
            })
            .await;
        self.drive(context, state).await
    }

    /// Resume a suspended run from its continuation token with the user's
    /// answer to the pending interaction.
    pub async fn resume_run(
        &self,
        token: &str,
        input: UserInput,
    ) -> Result<RunOutcome, WorkflowError> {
        self.resume_run_with_cancel(token, input, CancellationToken::new())
            .await
    }

    pub async fn resume_run_with_cancel(
        &self,
        token: &str,
        input: UserInput,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, WorkflowError> {
        let continuation = Continuation::from_token(token)?;
        let (context, state) = self.prepare_resume(continuation, input, cancel).await?;
        self.drive(context, state).await
    }

    /// Resume a run saved in the configured [`RunStore`]. The stored
    /// continuation is consumed once the input is accepted.
    pub async fn resume_stored(
        &self,
        run_id: &str,
        input: UserInput,
    ) -> Result<RunOutcome, WorkflowError> {
        let store = self
            .run_store
            .as_ref()
            .ok_or_else(|| WorkflowError::Store("no run store configured".to_string()))?;
        let continuation = store
            .load(run_id)
            .await?
            .ok_or_else(|| WorkflowError::Store(format!("no suspended run {}", run_id)))?;
        let (context, state) = self
            .prepare_resume(continuation, input, CancellationToken::new())
            .await?;
        store.delete(run_id).await?;
        self.drive(context, state).await
    }

    fn context(
        &self,
        run_id: &str,
        graph: Arc<Graph>,
        entry: EntryInput,
        cancel: CancellationToken,
    ) -> RuntimeContext {
        let mut context =
            RuntimeContext::new(run_id, graph, self.registry.clone(), self.config.clone())
                .with_services(self.services.clone())
                .with_entry(entry)
                .with_events(self.events.clone())
                .with_cancel(cancel)
                .with_time_provider(self.time_provider.clone());
        context.sub_graph_runner = self.sub_graph_runner.clone();
        context
    }

    /// Rebuild the run from a continuation and commit the user's answer as
    /// the suspended node's result.
    async fn prepare_resume(
        &self,
        continuation: Continuation,
        input: UserInput,
        cancel: CancellationToken,
    ) -> Result<(RuntimeContext, RunState), WorkflowError> {
        let Continuation {
            schema,
            mut state,
            suspended_node,
            request,
            entry,
            steps,
            ..
        } = continuation;

        let graph = Arc::new(self.validate(schema)?);
        let node = graph
            .node(&suspended_node)
            .filter(|node| node.kind.is_interactive())
            .cloned()
            .ok_or_else(|| {
                WorkflowError::InvalidContinuation(format!(
                    "suspended node {} is not an interactive node",
                    suspended_node
                ))
            })?;
        if state.status(&node.id).is_some() {
            return Err(WorkflowError::InvalidContinuation(format!(
                "node {} already completed",
                node.id
            )));
        }
        let answer = request
            .answer(&input)
            .map_err(WorkflowError::InvalidResumeInput)?;

        let run_id = state.run_id.clone();
        let context = self
            .context(&run_id, graph.clone(), entry, cancel)
            .with_steps_taken(steps);

        info!(run_id = %run_id, node_id = %node.id, "run resumed");
        context
            .emit(GraphEngineEvent::RunStarted {
                run_id: run_id.clone(),
                resumed: true,
                timestamp: context.now(),
            })
            .await;

        let result = NodeRunResult::with_outputs(answer.outputs).select(answer.handles);
        let (_, outputs) = commit_result(&graph, &mut state, &node, result, 0);
        context
            .emit(GraphEngineEvent::NodeSucceeded {
                run_id,
                node_id: node.id,
                outputs,
                elapsed_ms: 0,
                timestamp: context.now(),
            })
            .await;
        Ok((context, state))
    }

    async fn drive(
        &self,
        context: RuntimeContext,
        state: RunState,
    ) -> Result<RunOutcome, WorkflowError> {
        let entry = context.entry.clone();
        let context = Arc::new(context);
        let dispatcher = WorkflowDispatcher::new(context.clone(), state);
        let outcome = dispatcher.run().await;
        let state = dispatcher.snapshot();
        let run_id = state.run_id.clone();

        match outcome {
            DispatchOutcome::Suspended { node_id, request } => {
                let node_responses = state.responses.clone();
                let continuation = Continuation {
                    version: CONTINUATION_VERSION,
                    schema: context.graph.schema().clone(),
                    state,
                    suspended_node: node_id.clone(),
                    request: request.clone(),
                    entry,
                    steps: context.steps_taken(),
                };
                let token = continuation.to_token()?;
                if let Some(store) = &self.run_store {
                    store.save(&run_id, &continuation).await?;
                }

                info!(run_id = %run_id, node_id = %node_id, "run suspended");
                context
                    .emit(GraphEngineEvent::RunSuspended {
                        run_id: run_id.clone(),
                        node_id: node_id.clone(),
                        timestamp: context.now(),
                    })
                    .await;
                Ok(RunOutcome::Suspended(Suspension {
                    run_id,
                    token,
                    node_id,
                    request,
                    node_responses,
                }))
            }
            DispatchOutcome::Completed => {
                info!(run_id = %run_id, errors = state.errors.len(), "run finished");
                context
                    .emit(GraphEngineEvent::RunFinished {
                        run_id,
                        succeeded: true,
                        timestamp: context.now(),
                    })
                    .await;
                Ok(RunOutcome::Completed(RunResult::from_state(
                    state,
                    RunStatus::Succeeded,
                )))
            }
            DispatchOutcome::Failed(e) => {
                warn!(run_id = %run_id, error = %e, "run finished with failure");
                context
                    .emit(GraphEngineEvent::RunFinished {
                        run_id,
                        succeeded: false,
                        timestamp: context.now(),
                    })
                    .await;
                Ok(RunOutcome::Completed(RunResult::from_state(
                    state,
                    RunStatus::Failed,
                )))
            }
        }
    }
}

/// Builder for configuring a [`WorkflowEngine`].
pub struct WorkflowEngineBuilder {
    registry: NodeExecutorRegistry,
    config: EngineConfig,
    services: Services,
    run_store: Option<Arc<dyn RunStore>>,
    events: Option<EventEmitter>,
    sub_graph_runner: Arc<dyn SubGraphRunner>,
    id_generator: Arc<dyn IdGenerator>,
    time_provider: Arc<dyn TimeProvider>,
}

impl WorkflowEngineBuilder {
    /// Set the engine configuration (step budget, concurrency, timeouts).
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn model(mut self, client: Arc<dyn ModelClient>) -> Self {
        self.services.model = Some(client);
        self
    }

    pub fn search(mut self, client: Arc<dyn SearchClient>) -> Self {
        self.services.search = Some(client);
        self
    }

    pub fn http(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.services.http = Some(client);
        self
    }

    pub fn sandbox(mut self, sandbox: Arc<dyn CodeSandbox>) -> Self {
        self.services.sandbox = Some(sandbox);
        self
    }

    pub fn usage_sink(mut self, sink: Arc<dyn UsageSink>) -> Self {
        self.services.usage_sink = Some(sink);
        self
    }

    /// Persist every suspension so it can be resumed by run id.
    pub fn run_store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.run_store = Some(store);
        self
    }

    /// Deliver [`GraphEngineEvent`]s to this channel.
    pub fn event_sender(mut self, tx: mpsc::Sender<GraphEngineEvent>) -> Self {
        self.events = Some(EventEmitter::new(tx));
        self
    }

    /// Register or replace the executor for a node kind.
    pub fn register_executor(mut self, kind: NodeKind, executor: Box<dyn NodeExecutor>) -> Self {
        self.registry.register(kind, executor);
        self
    }

    /// Set a custom sub-graph runner for loop and tool bodies.
    pub fn sub_graph_runner(mut self, runner: Arc<dyn SubGraphRunner>) -> Self {
        self.sub_graph_runner = runner;
        self
    }

    pub fn id_generator(mut self, generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = generator;
        self
    }

    pub fn time_provider(mut self, provider: Arc<dyn TimeProvider>) -> Self {
        self.time_provider = provider;
        self
    }

    pub fn build(self) -> WorkflowEngine {
        WorkflowEngine {
            registry: Arc::new(self.registry),
            config: Arc::new(self.config),
            services: self.services,
            run_store: self.run_store,
            events: self.events,
            sub_graph_runner: self.sub_graph_runner,
            id_generator: self.id_generator,
            time_provider: self.time_provider,
        }
    }
}
