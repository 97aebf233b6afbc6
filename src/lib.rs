//! # dagflow: a workflow DAG execution engine
//!
//! `dagflow` runs directed-acyclic workflow graphs whose nodes are typed
//! units of work (model calls, knowledge search, HTTP requests, code,
//! branching) connected by activation and data edges. It supports:
//!
//! - **Activation scheduling**: every edge is `waiting`, `active` or
//!   `skipped`; unreached branches are skipped transitively and independent
//!   nodes run concurrently under a per-run limit.
//! - **Reference resolution**: inputs bound to upstream outputs or global
//!   variables, coerced to their declared types.
//! - **Structured control flow**: if/else and classifier branches,
//!   sequential loops over arrays, and bounded tool-calling agents whose
//!   tools are nested subgraphs.
//! - **Suspend/resume**: user-select and form-input nodes return an opaque
//!   continuation token; resuming with the user's answer continues the run
//!   exactly where it stopped.
//! - **Knowledge merge**: Reciprocal Rank Fusion of ranked result lists with
//!   a token budget.
//!
//! Model inference, search, HTTP, code execution, usage billing and
//! continuation storage are injected collaborators.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use dagflow::{parse_graph, EntryInput, RunOutcome, WorkflowEngine};
//!
//! #[tokio::main]
//! async fn main() {
//!     let json = std::fs::read_to_string("workflow.json").unwrap();
//!     let schema = parse_graph(&json).unwrap();
//!     let engine = WorkflowEngine::builder().build();
//!     match engine
//!         .start_run(schema, HashMap::new(), EntryInput::query("hello"))
//!         .await
//!         .unwrap()
//!     {
//!         RunOutcome::Completed(result) => println!("{}", result.answer_text),
//!         RunOutcome::Suspended(s) => println!("waiting on {}", s.node_id),
//!     }
//! }
//! ```

pub mod api;
pub mod core;
pub mod dsl;
pub mod error;
pub mod evaluator;
pub mod graph;
pub mod knowledge;
pub mod llm;
pub mod nodes;
pub mod sandbox;
pub mod template;

pub use crate::api::{
    RunOutcome, RunResult, RunStatus, Suspension, WorkflowEngine, WorkflowEngineBuilder,
};
pub use crate::core::{
    Continuation, DefaultSubGraphRunner, DispatchOutcome, EngineConfig, FakeIdGenerator,
    FakeTimeProvider, FileRunStore, GraphEngineEvent, HttpClient, HttpPoolConfig, HttpRequest,
    HttpResponse, IdGenerator, MemoryRunStore, NodeResponse, RealIdGenerator, RealTimeProvider,
    ReqwestHttpClient, ResponseStatus, RunStore, RuntimeContext, SubGraphRunner, TimeProvider,
    UsageSink, VariablePool, WorkflowDispatcher,
};
pub use crate::dsl::{
    parse_graph, Binding, Cardinality, EdgeSchema, EntryInput, InputSlot, NodeKind, NodeSchema, NodeUsage,
    OutputSlot, RetryConfig, ValueRef, ValueType, WorkflowSchema, SOURCE_HANDLE, TARGET_HANDLE, TOOL_HANDLE,
};
pub use crate::error::{
    BindingError, ErrorKind, NodeError, RunError, ValidationError, WorkflowError,
};
pub use crate::graph::{build_graph, Graph};
pub use crate::knowledge::{SearchClient, SearchRequest, SearchResult};
pub use crate::llm::ModelClient;
pub use crate::nodes::{InteractionRequest, NodeExecutor, NodeExecutorRegistry, UserInput};
pub use crate::sandbox::{CodeSandbox, SandboxRequest, SandboxResult};
