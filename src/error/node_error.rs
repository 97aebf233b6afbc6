use thiserror::Error;

use super::ErrorKind;

/// Node-level errors
#[derive(Debug, Clone, Error)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Service not configured: {0}")]
    MissingService(String),
    #[error("Model error: {0}")]
    ModelError(String),
    #[error("Search error: {0}")]
    SearchError(String),
    #[error("HTTP error: {message}")]
    HttpError { status: Option<u16>, message: String },
    #[error("Sandbox error: {0}")]
    SandboxError(String),
    #[error("Timeout: external call exceeded {0}s")]
    Timeout(u64),
    #[error("Cancelled")]
    Cancelled,
    #[error("Input validation error: {0}")]
    InputValidationError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Sub-graph error: {message}")]
    SubGraphError { kind: ErrorKind, message: String },
    #[error("Execution error: {0}")]
    ExecutionError(String),
}

impl NodeError {
    /// Whether a retry of the same call could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            NodeError::ModelError(_) | NodeError::SearchError(_) | NodeError::Timeout(_) => true,
            NodeError::HttpError { status, .. } => match status {
                None => true,
                Some(code) => *code == 429 || *code >= 500,
            },
            _ => false,
        }
    }

    /// Whether a node declaring an error output may absorb this failure.
    pub fn is_catchable(&self) -> bool {
        match self {
            NodeError::Cancelled => false,
            NodeError::SubGraphError { kind, .. } => matches!(
                kind,
                ErrorKind::Executor | ErrorKind::Binding | ErrorKind::IterationLimit
            ),
            _ => true,
        }
    }

    /// Taxonomy bucket used when the error is recorded on a run.
    pub fn kind(&self) -> ErrorKind {
        match self {
            NodeError::Cancelled => ErrorKind::Cancelled,
            NodeError::SubGraphError { kind, .. } => *kind,
            _ => ErrorKind::Executor,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            NodeError::ConfigError(_) => "config_error",
            NodeError::MissingService(_) => "missing_service",
            NodeError::ModelError(_) => "model_error",
            NodeError::SearchError(_) => "search_error",
            NodeError::HttpError { .. } => "http_error",
            NodeError::SandboxError(_) => "sandbox_error",
            NodeError::Timeout(_) => "timeout",
            NodeError::Cancelled => "cancelled",
            NodeError::InputValidationError(_) => "input_validation_error",
            NodeError::SerializationError(_) => "serialization_error",
            NodeError::SubGraphError { .. } => "sub_graph_error",
            NodeError::ExecutionError(_) => "execution_error",
        }
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(e: serde_json::Error) -> Self {
        NodeError::SerializationError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_error_display() {
        assert_eq!(
            NodeError::ConfigError("bad".into()).to_string(),
            "Configuration error: bad"
        );
        assert_eq!(
            NodeError::HttpError {
                status: Some(502),
                message: "upstream".into()
            }
            .to_string(),
            "HTTP error: upstream"
        );
        assert_eq!(
            NodeError::Timeout(30).to_string(),
            "Timeout: external call exceeded 30s"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(NodeError::ModelError("x".into()).is_retryable());
        assert!(NodeError::Timeout(1).is_retryable());
        assert!(NodeError::HttpError {
            status: Some(503),
            message: String::new()
        }
        .is_retryable());
        assert!(!NodeError::HttpError {
            status: Some(404),
            message: String::new()
        }
        .is_retryable());
        assert!(!NodeError::ConfigError("x".into()).is_retryable());
        assert!(!NodeError::Cancelled.is_retryable());
    }

    #[test]
    fn test_catchable_excludes_run_level_failures() {
        assert!(NodeError::ExecutionError("x".into()).is_catchable());
        assert!(!NodeError::Cancelled.is_catchable());
        assert!(!NodeError::SubGraphError {
            kind: ErrorKind::MaxSteps,
            message: "x".into()
        }
        .is_catchable());
        assert!(NodeError::SubGraphError {
            kind: ErrorKind::Binding,
            message: "x".into()
        }
        .is_catchable());
    }

    #[test]
    fn test_from_serde_error() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let node_err: NodeError = err.into();
        assert_eq!(node_err.error_code(), "serialization_error");
    }
}
