pub mod checkpoint;
pub mod dispatcher;
pub mod event_bus;
pub mod http_client;
pub mod resolver;
pub mod run_state;
pub mod runtime_context;
pub mod sub_graph_runner;
pub mod variable_pool;

pub use checkpoint::{Continuation, FileRunStore, MemoryRunStore, RunStore, RunStoreError};
pub use dispatcher::{DispatchOutcome, EngineConfig, WorkflowDispatcher};
pub use event_bus::{EventEmitter, GraphEngineEvent};
pub use http_client::{HttpClient, HttpPoolConfig, HttpRequest, HttpResponse, ReqwestHttpClient};
pub use resolver::{resolve_inputs, NodeInputs, Resolution};
pub use run_state::{NodeResponse, NodeStatus, ResponseStatus, RunState};
pub use runtime_context::{
    FakeIdGenerator, FakeTimeProvider, IdGenerator, RealIdGenerator, RealTimeProvider,
    RuntimeContext, Services, TimeProvider, UsageSink,
};
pub use sub_graph_runner::{DefaultSubGraphRunner, ScopeOutcome, ScopeRun, SubGraphRunner};
pub use variable_pool::VariablePool;
