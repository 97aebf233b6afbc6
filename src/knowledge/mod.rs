//! Knowledge-base search boundary and rank fusion.

pub mod rrf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::NodeError;

pub use rrf::{estimate_tokens, reciprocal_rank_fusion, truncate_by_tokens, FusedItem};

/// One retrieved chunk. Serialized as an element of a `quote_list` output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    #[serde(default)]
    pub dataset_id: String,
    #[serde(default)]
    pub source_name: String,
    /// Primary chunk text.
    pub content: String,
    /// Optional paired answer text (Q&A style chunks).
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub dataset_ids: Vec<String>,
    pub query: String,
    /// Token ceiling for the returned list.
    pub limit: usize,
    #[serde(default)]
    pub similarity: Option<f64>,
    #[serde(default)]
    pub search_mode: Option<String>,
}

/// Injected retrieval collaborator. Results are ranked best first.
#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn search(&self, request: SearchRequest) -> Result<Vec<SearchResult>, NodeError>;
}
