//! Code sandbox boundary.
//!
//! The code-run node hands user code to an injected [`CodeSandbox`]; the
//! engine only shapes the request and maps the returned object to outputs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::NodeError;

/// Language of a code-run node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeLanguage {
    #[default]
    Javascript,
    Python,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxRequest {
    pub language: CodeLanguage,
    pub code: String,
    /// Resolved node inputs, passed to the code as its argument object.
    pub inputs: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxResult {
    /// Object returned by the code; its keys become node outputs.
    pub output: Value,
    #[serde(default)]
    pub logs: Vec<String>,
}

/// Code sandbox execution interface
#[async_trait::async_trait]
pub trait CodeSandbox: Send + Sync {
    async fn execute(&self, request: SandboxRequest) -> Result<SandboxResult, NodeError>;
}
