use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use crate::core::dispatcher::EngineConfig;
use crate::core::event_bus::{EventEmitter, GraphEngineEvent};
use crate::core::http_client::HttpClient;
use crate::core::sub_graph_runner::{DefaultSubGraphRunner, SubGraphRunner};
use crate::dsl::{EntryInput, NodeUsage};
use crate::error::{NodeError, WorkflowError};
use crate::graph::Graph;
use crate::knowledge::SearchClient;
use crate::llm::ModelClient;
use crate::nodes::executor::NodeExecutorRegistry;
use crate::sandbox::CodeSandbox;

/// Receives per-node usage metadata as nodes commit. The engine never
/// interprets it.
pub trait UsageSink: Send + Sync {
    fn record(&self, run_id: &str, usage: &NodeUsage);
}

/// External collaborators injected by the embedding application.
#[derive(Clone, Default)]
pub struct Services {
    pub model: Option<Arc<dyn ModelClient>>,
    pub search: Option<Arc<dyn SearchClient>>,
    pub http: Option<Arc<dyn HttpClient>>,
    pub sandbox: Option<Arc<dyn CodeSandbox>>,
    pub usage_sink: Option<Arc<dyn UsageSink>>,
}

fn missing(name: &str) -> NodeError {
    NodeError::MissingService(name.to_string())
}

impl Services {
    pub fn model(&self) -> Result<&Arc<dyn ModelClient>, NodeError> {
        self.model.as_ref().ok_or_else(|| missing("model client"))
    }

    pub fn search(&self) -> Result<&Arc<dyn SearchClient>, NodeError> {
        self.search.as_ref().ok_or_else(|| missing("search client"))
    }

    pub fn http(&self) -> Result<&Arc<dyn HttpClient>, NodeError> {
        self.http.as_ref().ok_or_else(|| missing("http client"))
    }

    pub fn sandbox(&self) -> Result<&Arc<dyn CodeSandbox>, NodeError> {
        self.sandbox.as_ref().ok_or_else(|| missing("code sandbox"))
    }
}

/// Everything an executor may touch besides its inputs, shared by all
/// scopes of one run.
#[derive(Clone)]
pub struct RuntimeContext {
    pub run_id: String,
    pub graph: Arc<Graph>,
    pub registry: Arc<NodeExecutorRegistry>,
    pub config: Arc<EngineConfig>,
    pub services: Services,
    pub entry: EntryInput,
    pub sub_graph_runner: Arc<dyn SubGraphRunner>,
    pub events: Option<EventEmitter>,
    pub cancel: CancellationToken,
    pub time_provider: Arc<dyn TimeProvider>,
    steps: Arc<AtomicUsize>,
}

impl RuntimeContext {
    pub fn new(
        run_id: impl Into<String>,
        graph: Arc<Graph>,
        registry: Arc<NodeExecutorRegistry>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            graph,
            registry,
            config,
            services: Services::default(),
            entry: EntryInput::default(),
            sub_graph_runner: Arc::new(DefaultSubGraphRunner),
            events: None,
            cancel: CancellationToken::new(),
            time_provider: Arc::new(RealTimeProvider),
            steps: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_services(mut self, services: Services) -> Self {
        self.services = services;
        self
    }

    pub fn with_entry(mut self, entry: EntryInput) -> Self {
        self.entry = entry;
        self
    }

    pub fn with_events(mut self, events: Option<EventEmitter>) -> Self {
        self.events = events;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_time_provider(mut self, time_provider: Arc<dyn TimeProvider>) -> Self {
        self.time_provider = time_provider;
        self
    }

    /// Continue counting from a step total carried over a suspension.
    pub fn with_steps_taken(self, steps: usize) -> Self {
        self.steps.store(steps, Ordering::SeqCst);
        self
    }

    /// Count one node execution against `max_steps`.
    pub fn charge_step(&self) -> Result<usize, WorkflowError> {
        let taken = self.steps.fetch_add(1, Ordering::SeqCst) + 1;
        if taken > self.config.max_steps {
            return Err(WorkflowError::MaxStepsExceeded(self.config.max_steps));
        }
        Ok(taken)
    }

    pub fn steps_taken(&self) -> usize {
        self.steps.load(Ordering::SeqCst)
    }

    /// Run one external call under the configured timeout, aborting it as
    /// soon as the run is cancelled.
    pub async fn guard<T, F>(&self, future: F) -> Result<T, NodeError>
    where
        F: Future<Output = Result<T, NodeError>>,
    {
        let timed = async {
            match self.config.call_timeout_secs {
                Some(secs) => {
                    match tokio::time::timeout(Duration::from_secs(secs), future).await {
                        Ok(result) => result,
                        Err(_) => Err(NodeError::Timeout(secs)),
                    }
                }
                None => future.await,
            }
        };
        tokio::select! {
            _ = self.cancel.cancelled() => Err(NodeError::Cancelled),
            result = timed => result,
        }
    }

    pub async fn emit(&self, event: GraphEngineEvent) {
        if let Some(events) = &self.events {
            events.emit(event).await;
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.time_provider.now()
    }

    pub fn record_usage(&self, usage: &NodeUsage) {
        if let Some(sink) = &self.services.usage_sink {
            sink.record(&self.run_id, usage);
        }
    }
}

pub trait TimeProvider: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

// --- Real implementations ---

pub struct RealTimeProvider;

impl TimeProvider for RealTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub struct RealIdGenerator;

impl IdGenerator for RealIdGenerator {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

// --- Fake implementations ---

pub struct FakeTimeProvider {
    pub fixed_timestamp: i64,
}

impl FakeTimeProvider {
    pub fn new(fixed_timestamp: i64) -> Self {
        Self { fixed_timestamp }
    }
}

impl TimeProvider for FakeTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.fixed_timestamp, 0)
            .single()
            .unwrap_or_default()
    }
}

pub struct FakeIdGenerator {
    pub prefix: String,
    pub counter: AtomicU64,
}

impl FakeIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }
}

impl IdGenerator for FakeIdGenerator {
    fn next_id(&self) -> String {
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}", self.prefix, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::{NodeKind, NodeSchema, WorkflowSchema};
    use crate::graph::build_graph;

    fn context(config: EngineConfig) -> RuntimeContext {
        let graph = build_graph(WorkflowSchema {
            nodes: vec![NodeSchema::new("s", NodeKind::Start)],
            edges: vec![],
        })
        .unwrap();
        RuntimeContext::new(
            "run",
            Arc::new(graph),
            Arc::new(NodeExecutorRegistry::new()),
            Arc::new(config),
        )
    }

    #[test]
    fn test_charge_step_limit() {
        let ctx = context(EngineConfig {
            max_steps: 2,
            ..EngineConfig::default()
        });
        assert!(ctx.charge_step().is_ok());
        assert!(ctx.charge_step().is_ok());
        assert!(matches!(
            ctx.charge_step(),
            Err(WorkflowError::MaxStepsExceeded(2))
        ));
    }

    #[tokio::test]
    async fn test_guard_times_out() {
        let ctx = context(EngineConfig {
            call_timeout_secs: Some(1),
            ..EngineConfig::default()
        });
        tokio::time::pause();
        let result: Result<(), NodeError> = ctx
            .guard(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(NodeError::Timeout(1))));
    }

    #[tokio::test]
    async fn test_guard_observes_cancellation() {
        let ctx = context(EngineConfig::default());
        ctx.cancel.cancel();
        let result: Result<(), NodeError> = ctx
            .guard(std::future::pending::<Result<(), NodeError>>())
            .await;
        assert!(matches!(result, Err(NodeError::Cancelled)));
    }

    #[test]
    fn test_fake_providers() {
        let ids = FakeIdGenerator::new("run");
        assert_eq!(ids.next_id(), "run-0");
        assert_eq!(ids.next_id(), "run-1");
        assert_eq!(FakeTimeProvider::new(0).now().timestamp(), 0);
    }
}
