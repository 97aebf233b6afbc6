use std::collections::HashMap;

use petgraph::stable_graph::StableDiGraph;

use crate::dsl::{NodeKind, WorkflowSchema};
use crate::error::ValidationError;

use super::traversal::topological_order;
use super::types::{Graph, Scope};
use super::validator::validate_graph;

/// Index a graph snapshot and validate it. Every structural rejection
/// happens here, before a run exists.
pub fn build_graph(mut schema: WorkflowSchema) -> Result<Graph, ValidationError> {
    schema.assign_edge_ids();

    let mut inner = StableDiGraph::new();
    let mut node_index = HashMap::new();
    let mut positions = HashMap::new();
    for (position, node) in schema.nodes.iter().enumerate() {
        if positions.insert(node.id.clone(), position).is_some() {
            return Err(ValidationError::DuplicateNode(node.id.clone()));
        }
        node_index.insert(node.id.clone(), inner.add_node(node.id.clone()));
    }

    for node in &schema.nodes {
        if let Some(parent_id) = &node.parent_id {
            let parent_is_loop = positions
                .get(parent_id)
                .map(|p| schema.nodes[*p].kind == NodeKind::Loop)
                .unwrap_or(false);
            if !parent_is_loop {
                return Err(ValidationError::UnknownParent {
                    node_id: node.id.clone(),
                    parent_id: parent_id.clone(),
                });
            }
        }
    }

    let mut incoming: HashMap<String, Vec<usize>> = HashMap::new();
    let mut outgoing: HashMap<String, Vec<usize>> = HashMap::new();
    let mut tool_edges: HashMap<String, Vec<usize>> = HashMap::new();
    for (position, edge) in schema.edges.iter().enumerate() {
        let (Some(source), Some(target)) = (node_index.get(&edge.source), node_index.get(&edge.target))
        else {
            let missing = if node_index.contains_key(&edge.source) {
                &edge.target
            } else {
                &edge.source
            };
            return Err(ValidationError::DanglingEdge {
                edge_id: edge.id.clone(),
                node_id: missing.clone(),
            });
        };
        if edge.is_tool_edge() {
            tool_edges.entry(edge.source.clone()).or_default().push(position);
            continue;
        }
        inner.add_edge(*source, *target, position);
        outgoing.entry(edge.source.clone()).or_default().push(position);
        incoming.entry(edge.target.clone()).or_default().push(position);
    }

    let mut scopes = HashMap::new();
    for node in &schema.nodes {
        let scope = match &node.parent_id {
            Some(parent) => Scope::LoopBody(parent.clone()),
            None => Scope::Root,
        };
        scopes.insert(node.id.clone(), scope);
    }

    let mut graph = Graph {
        schema,
        inner,
        node_index,
        positions,
        incoming,
        outgoing,
        tool_edges,
        scopes,
        topo_rank: HashMap::new(),
    };

    assign_tool_regions(&mut graph)?;

    let order = topological_order(&graph)?;
    graph.topo_rank = order
        .into_iter()
        .enumerate()
        .map(|(rank, id)| (id, rank))
        .collect();

    validate_graph(&graph)?;
    Ok(graph)
}

/// Every node reachable from a tool entry runs inside that tool's scope.
fn assign_tool_regions(graph: &mut Graph) -> Result<(), ValidationError> {
    let mut entries: Vec<String> = graph
        .tool_edges
        .values()
        .flatten()
        .map(|index| graph.schema.edges[*index].target.clone())
        .collect();
    entries.sort_by_key(|id| graph.position(id));
    entries.dedup();

    let mut owner: HashMap<String, String> = HashMap::new();
    for entry in &entries {
        for node_id in graph.reachable_from(entry) {
            if let Some(previous) = owner.get(&node_id) {
                if previous != entry {
                    return Err(ValidationError::SharedToolNode(node_id));
                }
                continue;
            }
            owner.insert(node_id, entry.clone());
        }
    }

    for (node_id, entry) in owner {
        graph.scopes.insert(node_id, Scope::Tool(entry));
    }
    Ok(())
}
