use std::collections::HashMap;

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::Bfs;
use serde::{Deserialize, Serialize};

use crate::dsl::{EdgeSchema, NodeKind, NodeSchema, WorkflowSchema};

/// Runtime state of one edge. Decided once by the node owning the source
/// handle; `Skipped` is never reverted within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeStatus {
    #[default]
    Waiting,
    Active,
    Skipped,
}

/// Execution region a node belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Scope {
    #[default]
    Root,
    /// Body of the loop node with this id.
    LoopBody(String),
    /// Nodes reachable from the tool entry node with this id.
    Tool(String),
}

/// Validated, indexed graph. Immutable for the duration of a run.
#[derive(Debug, Clone)]
pub struct Graph {
    pub(crate) schema: WorkflowSchema,
    /// Activation graph over non-tool edges; edge weights index `schema.edges`.
    pub(crate) inner: StableDiGraph<String, usize>,
    pub(crate) node_index: HashMap<String, NodeIndex>,
    pub(crate) positions: HashMap<String, usize>,
    pub(crate) incoming: HashMap<String, Vec<usize>>,
    pub(crate) outgoing: HashMap<String, Vec<usize>>,
    pub(crate) tool_edges: HashMap<String, Vec<usize>>,
    pub(crate) scopes: HashMap<String, Scope>,
    pub(crate) topo_rank: HashMap<String, usize>,
}

impl Graph {
    pub fn schema(&self) -> &WorkflowSchema {
        &self.schema
    }

    pub fn nodes(&self) -> &[NodeSchema] {
        &self.schema.nodes
    }

    pub fn edges(&self) -> &[EdgeSchema] {
        &self.schema.edges
    }

    pub fn edge(&self, index: usize) -> &EdgeSchema {
        &self.schema.edges[index]
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeSchema> {
        self.positions
            .get(node_id)
            .map(|position| &self.schema.nodes[*position])
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.positions.contains_key(node_id)
    }

    /// Incoming activation edges (tool edges excluded), in declaration order.
    pub fn incoming(&self, node_id: &str) -> &[usize] {
        self.incoming.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Outgoing activation edges (tool edges excluded), in declaration order.
    pub fn outgoing(&self, node_id: &str) -> &[usize] {
        self.outgoing.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn tool_edges(&self, agent_id: &str) -> &[usize] {
        self.tool_edges.get(agent_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Entry nodes of the tools bound to an agent, in edge order.
    pub fn tool_entries(&self, agent_id: &str) -> Vec<&NodeSchema> {
        self.tool_edges(agent_id)
            .iter()
            .filter_map(|index| self.node(&self.edge(*index).target))
            .collect()
    }

    /// Agent owning the tool edge into `entry_id`.
    pub fn tool_owner(&self, entry_id: &str) -> Option<&str> {
        self.tool_edges.iter().find_map(|(agent, edges)| {
            edges
                .iter()
                .any(|index| self.edge(*index).target == entry_id)
                .then_some(agent.as_str())
        })
    }

    pub fn scope_of(&self, node_id: &str) -> &Scope {
        static ROOT: Scope = Scope::Root;
        self.scopes.get(node_id).unwrap_or(&ROOT)
    }

    /// Scope enclosing `scope`, or `None` for the root.
    pub fn parent_scope(&self, scope: &Scope) -> Option<Scope> {
        match scope {
            Scope::Root => None,
            Scope::LoopBody(loop_id) => Some(self.scope_of(loop_id).clone()),
            Scope::Tool(entry_id) => Some(
                self.tool_owner(entry_id)
                    .map(|agent| self.scope_of(agent).clone())
                    .unwrap_or_default(),
            ),
        }
    }

    /// Whether nodes in `from` may read outputs of nodes in `target`.
    pub fn scope_visible(&self, from: &Scope, target: &Scope) -> bool {
        let mut current = Some(from.clone());
        while let Some(scope) = current {
            if &scope == target {
                return true;
            }
            current = self.parent_scope(&scope);
        }
        false
    }

    /// Nodes of one scope, ordered by the topological hint.
    pub fn nodes_in_scope(&self, scope: &Scope) -> Vec<&NodeSchema> {
        let mut nodes: Vec<&NodeSchema> = self
            .schema
            .nodes
            .iter()
            .filter(|node| self.scope_of(&node.id) == scope)
            .collect();
        nodes.sort_by_key(|node| self.topo_rank(&node.id));
        nodes
    }

    pub fn is_scope_entry(&self, node: &NodeSchema, scope: &Scope) -> bool {
        match scope {
            Scope::Root => node.kind.is_root_entry(),
            Scope::LoopBody(_) => node.kind == NodeKind::LoopStart,
            Scope::Tool(entry_id) => &node.id == entry_id,
        }
    }

    pub fn loop_children(&self, loop_id: &str, kind: NodeKind) -> Vec<&NodeSchema> {
        self.schema
            .nodes
            .iter()
            .filter(|node| node.kind == kind && node.parent_id.as_deref() == Some(loop_id))
            .collect()
    }

    pub fn loop_end_of(&self, loop_id: &str) -> Option<&NodeSchema> {
        self.loop_children(loop_id, NodeKind::LoopEnd).into_iter().next()
    }

    pub fn topo_rank(&self, node_id: &str) -> usize {
        self.topo_rank.get(node_id).copied().unwrap_or(usize::MAX)
    }

    pub fn position(&self, node_id: &str) -> usize {
        self.positions.get(node_id).copied().unwrap_or(usize::MAX)
    }

    /// Node ids reachable from `start` over activation edges, `start` included.
    pub fn reachable_from(&self, start: &str) -> Vec<String> {
        let Some(index) = self.node_index.get(start) else {
            return Vec::new();
        };
        let mut bfs = Bfs::new(&self.inner, *index);
        let mut reached = Vec::new();
        while let Some(next) = bfs.next(&self.inner) {
            if let Some(id) = self.inner.node_weight(next) {
                reached.push(id.clone());
            }
        }
        reached
    }
}
