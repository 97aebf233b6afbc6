//! Mutable record of one (sub-)run: outputs, edge states, responses.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::variable_pool::VariablePool;
use crate::dsl::{NodeKind, NodeUsage, SOURCE_HANDLE};
use crate::error::RunError;
use crate::graph::{EdgeStatus, Graph, Scope};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Running,
    Succeeded,
    /// Failed, with the failure routed to the node's error output.
    Caught,
    Skipped,
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, NodeStatus::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Succeeded,
    Caught,
    Failed,
}

/// Per-node response surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResponse {
    pub node_id: String,
    pub node_name: String,
    pub kind: NodeKind,
    pub status: ResponseStatus,
    #[serde(default)]
    pub outputs: HashMap<String, Value>,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub scope: Scope,
    pub pool: VariablePool,
    /// Indexed like the graph's edge list.
    pub edge_status: Vec<EdgeStatus>,
    pub node_status: HashMap<String, NodeStatus>,
    pub responses: Vec<NodeResponse>,
    pub usages: Vec<NodeUsage>,
    pub errors: Vec<RunError>,
    pub answer_text: String,
    pub final_outputs: HashMap<String, Value>,
    #[serde(default)]
    pub stop_requested: bool,
}

impl RunState {
    pub fn new(run_id: impl Into<String>, scope: Scope, pool: VariablePool, graph: &Graph) -> Self {
        Self {
            run_id: run_id.into(),
            scope,
            pool,
            edge_status: vec![EdgeStatus::Waiting; graph.edges().len()],
            node_status: HashMap::new(),
            responses: Vec::new(),
            usages: Vec::new(),
            errors: Vec::new(),
            answer_text: String::new(),
            final_outputs: HashMap::new(),
            stop_requested: false,
        }
    }

    pub fn status(&self, node_id: &str) -> Option<NodeStatus> {
        self.node_status.get(node_id).copied()
    }

    pub fn is_terminal(&self, node_id: &str) -> bool {
        self.status(node_id).map(|s| s.is_terminal()).unwrap_or(false)
    }

    fn set_edge(&mut self, index: usize, status: EdgeStatus) -> bool {
        match self.edge_status.get_mut(index) {
            Some(current) if *current == EdgeStatus::Waiting => {
                *current = status;
                true
            }
            _ => false,
        }
    }

    /// Skip a node without running it, along with all its outgoing edges.
    pub fn mark_skipped(&mut self, graph: &Graph, node_id: &str) {
        self.node_status.insert(node_id.to_string(), NodeStatus::Skipped);
        for index in graph.outgoing(node_id) {
            self.set_edge(*index, EdgeStatus::Skipped);
        }
    }

    /// Decide the outgoing edges of a node that completed normally.
    ///
    /// With explicit handles, an edge is active when its handle was selected
    /// or names a produced output. Without, the default `source` handle
    /// stands in for the selection. Error handles never activate here.
    pub fn activate_edges(
        &mut self,
        graph: &Graph,
        node_id: &str,
        outputs: &HashMap<String, Value>,
        selected: Option<&[String]>,
        error_handle: Option<&str>,
    ) {
        for index in graph.outgoing(node_id) {
            let handle = graph.edge(*index).source_handle.as_str();
            let active = if Some(handle) == error_handle {
                false
            } else {
                let chosen = match selected {
                    Some(handles) => handles.iter().any(|h| h == handle),
                    None => handle == SOURCE_HANDLE,
                };
                chosen || outputs.contains_key(handle)
            };
            let status = if active {
                EdgeStatus::Active
            } else {
                EdgeStatus::Skipped
            };
            self.set_edge(*index, status);
        }
    }

    /// Route a caught failure: only edges leaving the error handle activate.
    pub fn route_error(&mut self, graph: &Graph, node_id: &str, error_handle: &str) {
        for index in graph.outgoing(node_id) {
            let status = if graph.edge(*index).source_handle == error_handle {
                EdgeStatus::Active
            } else {
                EdgeStatus::Skipped
            };
            self.set_edge(*index, status);
        }
    }

    /// Nodes of the scope that have neither run nor been skipped.
    pub fn pending_nodes(&self, graph: &Graph) -> Vec<String> {
        graph
            .nodes_in_scope(&self.scope)
            .into_iter()
            .filter(|node| !self.node_status.contains_key(&node.id))
            .map(|node| node.id.clone())
            .collect()
    }
}
