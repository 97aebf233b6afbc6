use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::dsl::{ValueRef, GLOBAL_NODE_ID};

/// Per-run store of global variables and collected node outputs.
///
/// Node outputs are only written by the dispatcher's commit step, so a
/// cloned snapshot handed to executors never observes partial results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariablePool {
    variables: HashMap<String, Value>,
    outputs: HashMap<String, HashMap<String, Value>>,
}

impl VariablePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variables(variables: HashMap<String, Value>) -> Self {
        Self {
            variables,
            outputs: HashMap::new(),
        }
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn variables(&self) -> &HashMap<String, Value> {
        &self.variables
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    /// Insert a variable only when the caller did not supply one.
    pub fn seed_variable(&mut self, name: &str, value: Value) {
        self.variables.entry(name.to_string()).or_insert(value);
    }

    pub fn replace_variables(&mut self, variables: HashMap<String, Value>) {
        self.variables = variables;
    }

    pub fn output(&self, node_id: &str, key: &str) -> Option<&Value> {
        self.outputs.get(node_id).and_then(|outputs| outputs.get(key))
    }

    pub fn has_outputs(&self, node_id: &str) -> bool {
        self.outputs.contains_key(node_id)
    }

    pub fn set_outputs(&mut self, node_id: impl Into<String>, outputs: HashMap<String, Value>) {
        self.outputs.insert(node_id.into(), outputs);
    }

    pub fn remove_outputs(&mut self, node_id: &str) {
        self.outputs.remove(node_id);
    }

    /// Look up a reference; `global` resolves against the variables.
    pub fn lookup(&self, reference: &ValueRef) -> Option<&Value> {
        self.get(&reference.node_id, &reference.output_key)
    }

    pub fn get(&self, node_id: &str, key: &str) -> Option<&Value> {
        if node_id == GLOBAL_NODE_ID {
            self.variable(key)
        } else {
            self.output(node_id, key)
        }
    }

    /// Variables whose value differs from `before`, including new ones.
    pub fn changed_variables(&self, before: &HashMap<String, Value>) -> HashMap<String, Value> {
        self.variables
            .iter()
            .filter(|(name, value)| before.get(*name) != Some(*value))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}
