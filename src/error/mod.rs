//! Error types for the workflow engine.
//!
//! - [`ValidationError`]: malformed graphs, rejected before a run starts.
//! - [`BindingError`]: inputs that cannot be resolved or coerced at run time.
//! - [`NodeError`]: failures raised by an individual node executor.
//! - [`WorkflowError`]: top-level errors returned by the engine surface.
//! - [`RunError`]: the serializable record attached to a run result.

pub mod node_error;
pub mod workflow_error;

pub use node_error::NodeError;
pub use workflow_error::{BindingError, ErrorKind, RunError, ValidationError, WorkflowError};

/// Convenience alias for workflow-level results.
pub type WorkflowResult<T> = Result<T, WorkflowError>;
/// Convenience alias for node-level results.
pub type NodeResult<T> = Result<T, NodeError>;
