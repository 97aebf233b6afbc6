//! Ordering and activation decisions over a built [`Graph`].

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};

use crate::dsl::{NodeSchema, TARGET_HANDLE};
use crate::error::ValidationError;

use super::types::{EdgeStatus, Graph, Scope};

/// Deterministic Kahn ordering over activation edges. Ties are broken by
/// declaration order. Any node left over sits on a cycle.
pub fn topological_order(graph: &Graph) -> Result<Vec<String>, ValidationError> {
    let mut in_degree: HashMap<&str, usize> = graph
        .nodes()
        .iter()
        .map(|node| (node.id.as_str(), graph.incoming(&node.id).len()))
        .collect();

    let mut ready: BinaryHeap<Reverse<(usize, &str)>> = graph
        .nodes()
        .iter()
        .enumerate()
        .filter(|(_, node)| in_degree.get(node.id.as_str()) == Some(&0))
        .map(|(position, node)| Reverse((position, node.id.as_str())))
        .collect();

    let mut order = Vec::with_capacity(graph.nodes().len());
    while let Some(Reverse((_, node_id))) = ready.pop() {
        order.push(node_id.to_string());
        for index in graph.outgoing(node_id) {
            let target = graph.edge(*index).target.as_str();
            if let Some(degree) = in_degree.get_mut(target) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse((graph.position(target), target)));
                }
            }
        }
    }

    if order.len() < graph.nodes().len() {
        let mut cyclic: Vec<String> = graph
            .nodes()
            .iter()
            .filter(|node| in_degree.get(node.id.as_str()).copied().unwrap_or(0) > 0)
            .map(|node| node.id.clone())
            .collect();
        cyclic.sort_by_key(|id| graph.position(id));
        return Err(ValidationError::Cycle(cyclic));
    }
    Ok(order)
}

/// Outcome of inspecting a node's incoming edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunDecision {
    Run,
    Wait,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupState {
    Satisfied,
    Waiting,
    Skipped,
}

fn group_state(statuses: &[EdgeStatus]) -> GroupState {
    if statuses.iter().all(|s| *s == EdgeStatus::Skipped) {
        GroupState::Skipped
    } else if statuses.iter().any(|s| *s == EdgeStatus::Waiting) {
        GroupState::Waiting
    } else {
        GroupState::Satisfied
    }
}

/// Decide whether a node can run, must wait, or is skipped.
///
/// Incoming edges are grouped by target handle. A group is satisfied when at
/// least one edge is active and none is still waiting, and skipped when every
/// edge is skipped. The activation group and the groups of required inputs
/// gate the node: one skipped gate skips it. A group of an optional input
/// that ends up skipped merely leaves the input unfed.
pub fn check_node_run_status(
    graph: &Graph,
    node: &NodeSchema,
    scope: &Scope,
    edge_status: &[EdgeStatus],
) -> RunDecision {
    let incoming = graph.incoming(&node.id);
    if incoming.is_empty() {
        return if graph.is_scope_entry(node, scope) {
            RunDecision::Run
        } else {
            RunDecision::Wait
        };
    }

    let mut groups: BTreeMap<&str, Vec<EdgeStatus>> = BTreeMap::new();
    for index in incoming {
        let edge = graph.edge(*index);
        let status = edge_status.get(*index).copied().unwrap_or_default();
        groups.entry(edge.target_handle.as_str()).or_default().push(status);
    }

    let mut waiting = false;
    let mut all_skipped = true;
    for (handle, statuses) in &groups {
        let state = group_state(statuses);
        let gating = *handle == TARGET_HANDLE
            || node.input(handle).map(|slot| slot.required).unwrap_or(true);
        match state {
            GroupState::Skipped if gating => return RunDecision::Skip,
            GroupState::Skipped => {}
            GroupState::Waiting => {
                waiting = true;
                all_skipped = false;
            }
            GroupState::Satisfied => all_skipped = false,
        }
    }

    if all_skipped {
        RunDecision::Skip
    } else if waiting {
        RunDecision::Wait
    } else {
        RunDecision::Run
    }
}
