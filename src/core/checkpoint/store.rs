use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::continuation::Continuation;
use crate::error::WorkflowError;

#[derive(Debug, thiserror::Error)]
pub enum RunStoreError {
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Continuation corrupted: {0}")]
    Corrupted(String),
}

impl From<RunStoreError> for WorkflowError {
    fn from(e: RunStoreError) -> Self {
        WorkflowError::Store(e.to_string())
    }
}

/// Keeps suspended runs by run id so callers can resume without holding
/// the token themselves.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn save(&self, run_id: &str, continuation: &Continuation) -> Result<(), RunStoreError>;
    async fn load(&self, run_id: &str) -> Result<Option<Continuation>, RunStoreError>;
    async fn delete(&self, run_id: &str) -> Result<(), RunStoreError>;
}

#[derive(Default)]
pub struct MemoryRunStore {
    data: tokio::sync::RwLock<HashMap<String, Continuation>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn save(&self, run_id: &str, continuation: &Continuation) -> Result<(), RunStoreError> {
        self.data
            .write()
            .await
            .insert(run_id.to_string(), continuation.clone());
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Option<Continuation>, RunStoreError> {
        Ok(self.data.read().await.get(run_id).cloned())
    }

    async fn delete(&self, run_id: &str) -> Result<(), RunStoreError> {
        self.data.write().await.remove(run_id);
        Ok(())
    }
}

pub struct FileRunStore {
    dir: PathBuf,
}

impl FileRunStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, RunStoreError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| RunStoreError::StorageError(e.to_string()))?;
        Ok(Self { dir })
    }

    /// Run ids name files directly, so anything that could leave `dir` is
    /// rejected.
    fn path_for(&self, run_id: &str) -> Result<PathBuf, RunStoreError> {
        if run_id.is_empty()
            || run_id.contains(['/', '\\', '\0'])
            || run_id.contains("..")
        {
            return Err(RunStoreError::StorageError(format!(
                "invalid run id '{}'",
                run_id
            )));
        }
        Ok(self.dir.join(format!("{}.continuation", run_id)))
    }
}

#[async_trait]
impl RunStore for FileRunStore {
    async fn save(&self, run_id: &str, continuation: &Continuation) -> Result<(), RunStoreError> {
        let bytes = serde_json::to_vec(continuation)
            .map_err(|e| RunStoreError::SerializationError(e.to_string()))?;
        tokio::fs::write(self.path_for(run_id)?, bytes)
            .await
            .map_err(|e| RunStoreError::StorageError(e.to_string()))
    }

    async fn load(&self, run_id: &str) -> Result<Option<Continuation>, RunStoreError> {
        let bytes = match tokio::fs::read(self.path_for(run_id)?).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RunStoreError::StorageError(e.to_string())),
        };
        let continuation = serde_json::from_slice::<Continuation>(&bytes)
            .map_err(|e| RunStoreError::Corrupted(e.to_string()))?;
        Ok(Some(continuation))
    }

    async fn delete(&self, run_id: &str) -> Result<(), RunStoreError> {
        match tokio::fs::remove_file(self.path_for(run_id)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RunStoreError::StorageError(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::checkpoint::CONTINUATION_VERSION;
    use crate::core::run_state::RunState;
    use crate::core::variable_pool::VariablePool;
    use crate::dsl::{EntryInput, NodeKind, NodeSchema, WorkflowSchema};
    use crate::graph::{build_graph, Scope};
    use crate::nodes::human_input::{FormField, InteractionRequest};
    use crate::dsl::ValueType;

    fn sample_continuation() -> Continuation {
        let schema = WorkflowSchema {
            nodes: vec![NodeSchema::new("start", NodeKind::Start)],
            edges: vec![],
        };
        let graph = build_graph(schema.clone()).unwrap();
        Continuation {
            version: CONTINUATION_VERSION,
            state: RunState::new("run-7", Scope::Root, VariablePool::new(), &graph),
            schema,
            suspended_node: "form".into(),
            request: InteractionRequest::FormInput {
                description: "details".into(),
                fields: vec![FormField {
                    key: "age".into(),
                    label: "Age".into(),
                    required: true,
                    value_type: ValueType::Number,
                }],
            },
            entry: EntryInput::default(),
            steps: 1,
        }
    }

    #[tokio::test]
    async fn test_memory_run_store_save_load_delete() {
        let store = MemoryRunStore::new();
        let continuation = sample_continuation();

        store.save("run-7", &continuation).await.unwrap();
        let loaded = store.load("run-7").await.unwrap();
        assert_eq!(loaded.unwrap().suspended_node, "form");

        store.delete("run-7").await.unwrap();
        assert!(store.load("run-7").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_run_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(dir.path()).unwrap();
        let continuation = sample_continuation();

        store.save("run-7", &continuation).await.unwrap();
        let loaded = store.load("run-7").await.unwrap().unwrap();
        assert_eq!(loaded, continuation);

        store.delete("run-7").await.unwrap();
        assert!(store.load("run-7").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_run_store_corrupted() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(dir.path()).unwrap();
        std::fs::write(dir.path().join("bad.continuation"), b"{oops").unwrap();
        let err = store.load("bad").await.unwrap_err();
        assert!(err.to_string().starts_with("Continuation corrupted"));
    }

    #[tokio::test]
    async fn test_file_run_store_delete_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(dir.path()).unwrap();
        store.delete("never-saved").await.unwrap();
    }

    #[tokio::test]
    async fn test_file_run_store_delete_reports_io_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(dir.path()).unwrap();
        // A directory where the file should be makes remove_file fail.
        std::fs::create_dir(dir.path().join("stuck.continuation")).unwrap();

        let err = store.delete("stuck").await.unwrap_err();
        assert!(matches!(err, RunStoreError::StorageError(_)));
        assert!(dir.path().join("stuck.continuation").exists());
    }

    #[tokio::test]
    async fn test_file_run_store_rejects_escaping_run_ids() {
        let root = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(root.path().join("runs")).unwrap();
        let continuation = sample_continuation();

        for run_id in ["../outside", "a/b", "a\\b", "..", ""] {
            let err = store.save(run_id, &continuation).await.unwrap_err();
            assert_eq!(err.to_string(), format!("Storage error: invalid run id '{}'", run_id));
            assert!(store.load(run_id).await.is_err());
            assert!(store.delete(run_id).await.is_err());
        }
        assert!(!root.path().join("outside.continuation").exists());
    }
}
