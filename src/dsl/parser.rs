//! Parser: converts raw JSON text into [`WorkflowSchema`].

use super::schema::WorkflowSchema;
use crate::error::ValidationError;

/// Parse a JSON graph description. Edges without an id get a generated one
/// derived from their endpoints so every edge is addressable.
pub fn parse_graph(content: &str) -> Result<WorkflowSchema, ValidationError> {
    let mut schema: WorkflowSchema =
        serde_json::from_str(content).map_err(|e| ValidationError::Parse(e.to_string()))?;
    schema.assign_edge_ids();
    Ok(schema)
}
