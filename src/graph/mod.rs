//! Graph construction and representation.
//!
//! The [`Graph`] is built from a [`WorkflowSchema`](crate::dsl::WorkflowSchema)
//! by [`build_graph`], which indexes nodes and edges, assigns every node to
//! its execution scope and rejects malformed graphs. [`check_node_run_status`]
//! is the activation rule the dispatcher applies on every pass.

pub mod builder;
pub mod traversal;
pub mod types;
pub mod validator;

pub use builder::build_graph;
pub use traversal::{check_node_run_status, topological_order, RunDecision};
pub use types::{EdgeStatus, Graph, Scope};
pub use validator::{validate_executors, validate_graph};
