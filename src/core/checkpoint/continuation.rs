use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::core::run_state::RunState;
use crate::dsl::{EntryInput, WorkflowSchema};
use crate::error::WorkflowError;
use crate::nodes::human_input::InteractionRequest;

pub const CONTINUATION_VERSION: u32 = 1;

/// Everything needed to pick a suspended run back up: the graph, the root
/// run state and the pending interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Continuation {
    pub version: u32,
    pub schema: WorkflowSchema,
    pub state: RunState,
    pub suspended_node: String,
    pub request: InteractionRequest,
    pub entry: EntryInput,
    /// Node executions charged before the suspension.
    pub steps: usize,
}

impl Continuation {
    pub fn run_id(&self) -> &str {
        &self.state.run_id
    }

    /// Encode as an opaque, URL-safe token.
    pub fn to_token(&self) -> Result<String, WorkflowError> {
        let bytes = serde_json::to_vec(self)
            .map_err(|e| WorkflowError::InvalidContinuation(e.to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn from_token(token: &str) -> Result<Self, WorkflowError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|e| WorkflowError::InvalidContinuation(format!("bad encoding: {}", e)))?;
        let continuation: Continuation = serde_json::from_slice(&bytes)
            .map_err(|e| WorkflowError::InvalidContinuation(format!("bad payload: {}", e)))?;
        if continuation.version != CONTINUATION_VERSION {
            return Err(WorkflowError::InvalidContinuation(format!(
                "unsupported version {}",
                continuation.version
            )));
        }
        Ok(continuation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::variable_pool::VariablePool;
    use crate::dsl::{EdgeSchema, NodeKind, NodeSchema};
    use crate::graph::{build_graph, Scope};
    use crate::nodes::human_input::SelectOption;

    fn sample() -> Continuation {
        let schema = WorkflowSchema {
            nodes: vec![
                NodeSchema::new("start", NodeKind::Start),
                NodeSchema::new("pick", NodeKind::UserSelect),
            ],
            edges: vec![EdgeSchema::new("start", "pick")],
        };
        let graph = build_graph(schema.clone()).unwrap();
        Continuation {
            version: CONTINUATION_VERSION,
            state: RunState::new("run-1", Scope::Root, VariablePool::new(), &graph),
            schema,
            suspended_node: "pick".into(),
            request: InteractionRequest::UserSelect {
                description: "choose".into(),
                options: vec![SelectOption {
                    id: "a".into(),
                    value: "A".into(),
                }],
            },
            entry: EntryInput::query("hi"),
            steps: 2,
        }
    }

    #[test]
    fn test_token_roundtrip_preserves_state() {
        let continuation = sample();
        let token = continuation.to_token().unwrap();
        assert!(!token.contains('+') && !token.contains('/'));
        let decoded = Continuation::from_token(&token).unwrap();
        assert_eq!(decoded, continuation);
        assert_eq!(decoded.run_id(), "run-1");
    }

    #[test]
    fn test_garbage_token_rejected() {
        let err = Continuation::from_token("not a token!").unwrap_err();
        assert!(err.to_string().contains("Invalid continuation"));

        let err = Continuation::from_token(&URL_SAFE_NO_PAD.encode(b"{}")).unwrap_err();
        assert!(err.to_string().contains("bad payload"));
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let mut continuation = sample();
        continuation.version = 99;
        let token = continuation.to_token().unwrap();
        let err = Continuation::from_token(&token).unwrap_err();
        assert!(err.to_string().contains("unsupported version 99"));
    }
}
