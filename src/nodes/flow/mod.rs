//! Loop controller: the `loop` container and its body sentinels.
//!
//! Iterations run through the context's
//! [`SubGraphRunner`](crate::core::SubGraphRunner) so that tests can
//! substitute custom implementations.

pub mod loop_node;

pub use loop_node::{LoopEndExecutor, LoopNodeExecutor, LoopStartExecutor};
