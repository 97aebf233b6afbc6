//! Sub-graph runner for scoped bodies (loop iterations, tool calls).
//!
//! A loop body or a tool region runs as its own dispatcher pass over one
//! [`Scope`] of the shared graph. The [`SubGraphRunner`] trait abstracts how
//! those passes execute so that tests can substitute custom implementations.

use async_trait::async_trait;
use std::sync::Arc;

use crate::core::dispatcher::{DispatchOutcome, WorkflowDispatcher};
use crate::core::resolver::NodeInputs;
use crate::core::run_state::RunState;
use crate::core::runtime_context::RuntimeContext;
use crate::core::variable_pool::VariablePool;
use crate::graph::Scope;

/// One request to run a scope to completion.
#[derive(Debug, Clone)]
pub struct ScopeRun {
    pub scope: Scope,
    /// Pool the scope starts from: the parent's outputs plus current variables.
    pub pool: VariablePool,
    /// Values injected into the scope entry node.
    pub seed: NodeInputs,
}

#[derive(Debug, Clone)]
pub struct ScopeOutcome {
    pub outcome: DispatchOutcome,
    pub state: RunState,
}

/// Trait for executing scoped bodies within container nodes.
#[async_trait]
pub trait SubGraphRunner: Send + Sync {
    async fn run_scope(&self, context: &RuntimeContext, request: ScopeRun) -> ScopeOutcome;
}

/// Default [`SubGraphRunner`] implementation that builds a fresh
/// [`WorkflowDispatcher`] over the requested scope.
pub struct DefaultSubGraphRunner;

#[async_trait]
impl SubGraphRunner for DefaultSubGraphRunner {
    async fn run_scope(&self, context: &RuntimeContext, request: ScopeRun) -> ScopeOutcome {
        let state = RunState::new(
            context.run_id.clone(),
            request.scope,
            request.pool,
            &context.graph,
        );
        let dispatcher =
            WorkflowDispatcher::new(Arc::new(context.clone()), state).with_seed(request.seed);
        let outcome = dispatcher.run().await;
        ScopeOutcome {
            outcome,
            state: dispatcher.snapshot(),
        }
    }
}
