//! Public API layer: the engine surface embedding applications call.

mod runner;

pub use runner::{
    RunOutcome, RunResult, RunStatus, Suspension, WorkflowEngine, WorkflowEngineBuilder,
};
