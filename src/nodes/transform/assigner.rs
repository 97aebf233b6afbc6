//! Variable update node executor.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use crate::core::resolver::NodeInputs;
use crate::core::runtime_context::RuntimeContext;
use crate::core::variable_pool::VariablePool;
use crate::dsl::{NodeRunResult, NodeSchema};
use crate::error::NodeError;
use crate::nodes::executor::NodeExecutor;

/// Writes each declared input into the global variable of the same name.
pub struct VariableUpdateExecutor;

#[async_trait]
impl NodeExecutor for VariableUpdateExecutor {
    async fn execute(
        &self,
        node: &NodeSchema,
        inputs: &NodeInputs,
        _pool: &VariablePool,
        _context: &RuntimeContext,
    ) -> Result<NodeRunResult, NodeError> {
        let updates: HashMap<String, Value> = node
            .inputs
            .iter()
            .filter_map(|slot| {
                inputs
                    .get(&slot.key)
                    .map(|value| (slot.key.clone(), value.clone()))
            })
            .collect();
        let mut result = NodeRunResult::with_outputs(updates.clone());
        result.variable_updates = updates;
        Ok(result)
    }
}
