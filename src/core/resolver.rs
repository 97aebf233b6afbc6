//! Turns a node's declared inputs into concrete values for one execution.
//!
//! A slot is fed, in order, by a seeded value (loop item, tool-call
//! argument), by its active incoming edges, then by its binding. Outputs of
//! nodes in the current scope that have not finished yet leave the whole
//! node pending.

use std::collections::HashMap;

use serde_json::Value;

use crate::core::run_state::RunState;
use crate::dsl::{Binding, InputSlot, NodeSchema, ValueRef, ValueType};
use crate::error::BindingError;
use crate::graph::{EdgeStatus, Graph};

/// Resolved inputs keyed by slot key.
pub type NodeInputs = HashMap<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Ready(NodeInputs),
    Pending,
}

enum Lookup {
    Ready(Value),
    Pending,
    Missing,
}

fn lookup(graph: &Graph, state: &RunState, reference: &ValueRef) -> Lookup {
    if let Some(value) = state.pool.lookup(reference) {
        return Lookup::Ready(value.clone());
    }
    if reference.is_global() {
        return Lookup::Missing;
    }
    let same_scope = graph.scope_of(&reference.node_id) == &state.scope;
    if same_scope && !state.is_terminal(&reference.node_id) {
        Lookup::Pending
    } else {
        Lookup::Missing
    }
}

/// Coerce a value to a slot type. Only a scalar and its single-element
/// array convert into each other; everything else must already match.
pub fn coerce(value: Value, value_type: ValueType) -> Result<Value, Value> {
    if value.is_null() || value_type.accepts(&value) {
        return Ok(value);
    }
    if let Some(element) = value_type.element() {
        if !value.is_array() && element.accepts(&value) {
            return Ok(Value::Array(vec![value]));
        }
    } else if let Value::Array(items) = &value {
        if items.len() == 1 && value_type.accepts(&items[0]) {
            return Ok(items[0].clone());
        }
    }
    Err(value)
}

fn coerce_slot(node: &NodeSchema, slot: &InputSlot, value: Value) -> Result<Value, BindingError> {
    coerce(value, slot.value_type).map_err(|rejected| BindingError::TypeMismatch {
        node_id: node.id.clone(),
        input: slot.key.clone(),
        expected: slot.value_type.to_string(),
        actual: ValueType::describe(&rejected).to_string(),
    })
}

/// Resolve one slot; `Ok(None)` means a same-scope source is still running.
fn resolve_slot(
    graph: &Graph,
    state: &RunState,
    node: &NodeSchema,
    slot: &InputSlot,
    seed: Option<&NodeInputs>,
) -> Result<Option<Value>, BindingError> {
    if let Some(value) = seed.and_then(|seed| seed.get(&slot.key)) {
        return coerce_slot(node, slot, value.clone()).map(Some);
    }

    let mut values = Vec::new();
    let mut missing: Option<ValueRef> = None;

    for index in graph.incoming(&node.id) {
        let edge = graph.edge(*index);
        if edge.target_handle != slot.key || state.edge_status[*index] != EdgeStatus::Active {
            continue;
        }
        match state.pool.output(&edge.source, &edge.source_handle) {
            Some(value) => values.push(value.clone()),
            None => {
                missing.get_or_insert_with(|| ValueRef::new(&edge.source, &edge.source_handle));
            }
        }
    }

    match &slot.binding {
        Binding::Literal { value } => values.push(value.clone()),
        Binding::Reference { .. } | Binding::References { .. } => {
            for reference in slot.binding.refs() {
                match lookup(graph, state, &reference) {
                    Lookup::Ready(value) => values.push(value),
                    Lookup::Pending => return Ok(None),
                    Lookup::Missing => {
                        missing.get_or_insert(reference);
                    }
                }
            }
        }
        Binding::Unbound => {}
    }

    if slot.is_dynamic() {
        let items = values
            .into_iter()
            .filter(|value| !value.is_null())
            .map(|value| coerce_slot(node, slot, value))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Some(Value::Array(items)));
    }

    match values.into_iter().next() {
        Some(value) => coerce_slot(node, slot, value).map(Some),
        None => match (&slot.default, slot.required) {
            (Some(default), _) => Ok(Some(default.clone())),
            (None, false) => Ok(Some(Value::Null)),
            (None, true) => {
                let source = missing.unwrap_or_else(|| ValueRef::new(&node.id, &slot.key));
                Err(BindingError::Unresolved {
                    node_id: node.id.clone(),
                    input: slot.key.clone(),
                    source_node: source.node_id,
                    output_key: source.output_key,
                })
            }
        },
    }
}

/// Resolve every input of `node` against the current run state.
pub fn resolve_inputs(
    graph: &Graph,
    state: &RunState,
    node: &NodeSchema,
    seed: Option<&NodeInputs>,
) -> Result<Resolution, BindingError> {
    let mut inputs = NodeInputs::with_capacity(node.inputs.len());
    for slot in &node.inputs {
        match resolve_slot(graph, state, node, slot, seed)? {
            Some(value) => {
                inputs.insert(slot.key.clone(), value);
            }
            None => return Ok(Resolution::Pending),
        }
    }
    // Seeded keys without a declared slot pass through untouched.
    if let Some(seed) = seed {
        for (key, value) in seed {
            inputs.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
    Ok(Resolution::Ready(inputs))
}
