//! Data transformation node executors: HTTP, Code, Text, Variable update.
//!
//! One submodule per executor.

pub mod assigner;
pub mod code;
pub mod http;
pub mod text;

pub use assigner::VariableUpdateExecutor;
pub use code::CodeRunExecutor;
pub use http::HttpRequestExecutor;
pub use text::TextConcatExecutor;

use std::collections::HashMap;

use serde_json::Value;

use crate::dsl::{Cardinality, NodeSchema};
use crate::nodes::utils::extract_path;

/// Fill a node's dynamic output slots from a structured result. A slot
/// reads its `extract_path`, or its own key when no path is set.
pub(crate) fn dynamic_outputs(node: &NodeSchema, source: &Value) -> HashMap<String, Value> {
    node.outputs
        .iter()
        .filter(|slot| slot.cardinality == Cardinality::Dynamic)
        .filter_map(|slot| {
            let path = slot.extract_path.as_deref().unwrap_or(&slot.key);
            extract_path(source, path).map(|value| (slot.key.clone(), value.clone()))
        })
        .collect()
}
