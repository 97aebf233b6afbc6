//! Workflow-level error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::NodeError;

/// Reasons a graph is rejected before any run starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Graph parse error: {0}")]
    Parse(String),
    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),
    #[error("Edge {edge_id} references unknown node: {node_id}")]
    DanglingEdge { edge_id: String, node_id: String },
    #[error("Edge {edge_id} targets unknown input handle '{handle}' on node {node_id}")]
    UnknownTargetHandle {
        edge_id: String,
        node_id: String,
        handle: String,
    },
    #[error("Required input '{input}' of node {node_id} has no binding and no default")]
    UnboundInput { node_id: String, input: String },
    #[error("Input '{input}' of node {node_id} is bound more than once")]
    MultipleBindings { node_id: String, input: String },
    #[error("Edge {edge_id} crosses a loop or tool boundary")]
    BoundaryCrossing { edge_id: String },
    #[error("Input '{input}' of node {node_id} references node {target} outside its visible scope")]
    InvisibleReference {
        node_id: String,
        input: String,
        target: String,
    },
    #[error("Input '{input}' of node {node_id} references unknown node {target}")]
    DanglingReference {
        node_id: String,
        input: String,
        target: String,
    },
    #[error("Loop {0} has no loop-start node")]
    MissingLoopStart(String),
    #[error("Loop {loop_id} has more than one {kind} node")]
    DuplicateSentinel { loop_id: String, kind: String },
    #[error("Node {node_id} of kind {kind} must be placed inside a loop")]
    OrphanSentinel { node_id: String, kind: String },
    #[error("Node {node_id} has unknown parent {parent_id}")]
    UnknownParent { node_id: String, parent_id: String },
    #[error("Node {0} belongs to more than one tool region")]
    SharedToolNode(String),
    #[error("Cycle detected among nodes: {0:?}")]
    Cycle(Vec<String>),
    #[error("No entry node found")]
    NoEntryNode,
    #[error("Node {0} has no incoming edges and is not an entry node")]
    UnreachableNode(String),
    #[error("Interactive node {0} must not be nested inside a loop or tool")]
    NestedInteractive(String),
    #[error("No executor registered for node kind: {0}")]
    MissingExecutor(String),
    #[error("Invalid configuration for node {node_id}: {message}")]
    InvalidConfig { node_id: String, message: String },
}

/// Inputs that cannot be turned into concrete values at run time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BindingError {
    #[error("Input '{input}' of node {node_id} is unresolved: {source_node}.{output_key} was not produced")]
    Unresolved {
        node_id: String,
        input: String,
        source_node: String,
        output_key: String,
    },
    #[error("Input '{input}' of node {node_id} expects {expected}, got {actual}")]
    TypeMismatch {
        node_id: String,
        input: String,
        expected: String,
        actual: String,
    },
}

/// Taxonomy bucket recorded on every [`RunError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Binding,
    Executor,
    Deadlock,
    IterationLimit,
    MaxSteps,
    Cancelled,
    Internal,
}

/// Caller-visible error record. Non-fatal entries are reported alongside
/// partial results; a fatal entry explains why the run stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunError {
    #[serde(default)]
    pub node_id: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
    pub fatal: bool,
}

impl RunError {
    pub fn reported(node_id: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            node_id: Some(node_id.into()),
            kind,
            message: message.into(),
            fatal: false,
        }
    }
}

/// Workflow-level errors
#[derive(Debug, Clone, Error)]
pub enum WorkflowError {
    #[error("Graph validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("Binding error: {0}")]
    Binding(#[from] BindingError),
    #[error("Node execution error: node={node_id}, error={error}")]
    NodeExecution { node_id: String, error: NodeError },
    #[error("Scheduler deadlock: pending nodes {pending:?}")]
    Deadlock { pending: Vec<String> },
    #[error("Iteration limit {limit} reached in node {node_id}")]
    IterationLimit { node_id: String, limit: usize },
    #[error("Max steps exceeded: {0}")]
    MaxStepsExceeded(usize),
    #[error("Run cancelled")]
    Cancelled,
    #[error("Invalid continuation token: {0}")]
    InvalidContinuation(String),
    #[error("Invalid resume input: {0}")]
    InvalidResumeInput(String),
    #[error("Run store error: {0}")]
    Store(String),
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::Validation(_) => ErrorKind::Validation,
            WorkflowError::Binding(_) => ErrorKind::Binding,
            WorkflowError::NodeExecution { error, .. } => error.kind(),
            WorkflowError::Deadlock { .. } => ErrorKind::Deadlock,
            WorkflowError::IterationLimit { .. } => ErrorKind::IterationLimit,
            WorkflowError::MaxStepsExceeded(_) => ErrorKind::MaxSteps,
            WorkflowError::Cancelled => ErrorKind::Cancelled,
            WorkflowError::InvalidContinuation(_)
            | WorkflowError::InvalidResumeInput(_)
            | WorkflowError::Store(_)
            | WorkflowError::InternalError(_) => ErrorKind::Internal,
        }
    }

    pub fn node_id(&self) -> Option<&str> {
        match self {
            WorkflowError::NodeExecution { node_id, .. }
            | WorkflowError::IterationLimit { node_id, .. } => Some(node_id),
            WorkflowError::Binding(BindingError::Unresolved { node_id, .. })
            | WorkflowError::Binding(BindingError::TypeMismatch { node_id, .. }) => Some(node_id),
            _ => None,
        }
    }

    /// Record this error as the fatal entry of a run.
    pub fn to_run_error(&self) -> RunError {
        RunError {
            node_id: self.node_id().map(str::to_string),
            kind: self.kind(),
            message: self.to_string(),
            fatal: true,
        }
    }

    /// Wrap this error for propagation out of a nested scope run.
    pub fn into_node_error(self) -> NodeError {
        match self {
            WorkflowError::Cancelled => NodeError::Cancelled,
            WorkflowError::NodeExecution { error, .. } if !error.is_catchable() => error,
            other => NodeError::SubGraphError {
                kind: other.kind(),
                message: other.to_string(),
            },
        }
    }
}
