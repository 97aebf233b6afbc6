//! Knowledge-base nodes: `knowledge-search` and `knowledge-merge`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::core::resolver::NodeInputs;
use crate::core::runtime_context::RuntimeContext;
use crate::core::variable_pool::VariablePool;
use crate::dsl::{NodeRunResult, NodeSchema, NodeUsage, SOURCE_HANDLE};
use crate::error::NodeError;
use crate::knowledge::{reciprocal_rank_fusion, truncate_by_tokens, SearchRequest};
use crate::nodes::executor::NodeExecutor;
use crate::nodes::utils::{input_array, input_text, parse_config};

pub const QUOTE_LIST_KEY: &str = "quote_list";
pub const RESULT_EMPTY_HANDLE: &str = "result-empty";
pub const RESULT_NOT_EMPTY_HANDLE: &str = "result-not-empty";

#[derive(Debug, Default, Deserialize)]
struct SearchConfig {
    #[serde(default)]
    dataset_ids: Vec<String>,
    /// Token ceiling for the returned quotes.
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    similarity: Option<f64>,
    #[serde(default)]
    search_mode: Option<String>,
}

pub struct KnowledgeSearchExecutor;

#[async_trait]
impl NodeExecutor for KnowledgeSearchExecutor {
    fn validate(&self, node: &NodeSchema) -> Result<(), NodeError> {
        let config: SearchConfig = parse_config(node)?;
        if config.dataset_ids.is_empty() {
            return Err(NodeError::ConfigError(
                "knowledge-search needs at least one dataset".to_string(),
            ));
        }
        Ok(())
    }

    async fn execute(
        &self,
        node: &NodeSchema,
        inputs: &NodeInputs,
        _pool: &VariablePool,
        context: &RuntimeContext,
    ) -> Result<NodeRunResult, NodeError> {
        let config: SearchConfig = parse_config(node)?;
        let search = context.services.search()?;
        let limit = config
            .limit
            .unwrap_or(context.config.default_quote_token_limit);

        let request = SearchRequest {
            dataset_ids: config.dataset_ids,
            query: input_text(inputs, "user_question"),
            limit,
            similarity: config.similarity,
            search_mode: config.search_mode,
        };
        let results = context.guard(search.search(request)).await?;
        let items = results
            .into_iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        let (quotes, tokens) = truncate_by_tokens(items, limit);

        let branch = if quotes.is_empty() {
            RESULT_EMPTY_HANDLE
        } else {
            RESULT_NOT_EMPTY_HANDLE
        };
        let mut result =
            NodeRunResult::with_outputs(HashMap::from([(QUOTE_LIST_KEY.to_string(), Value::Array(quotes))]))
                .select(vec![SOURCE_HANDLE.to_string(), branch.to_string()]);
        result.metadata = json!({ "tokens": tokens });
        result.usages.push(NodeUsage {
            node_id: node.id.clone(),
            node_name: node.display_name().to_string(),
            model: None,
            input_tokens: 0,
            output_tokens: 0,
            call_count: 1,
        });
        Ok(result)
    }
}

#[derive(Debug, Default, Deserialize)]
struct MergeConfig {
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    k: Option<f64>,
}

/// Fuses the ranked lists arriving on its dynamic `lists` input.
pub struct KnowledgeMergeExecutor;

#[async_trait]
impl NodeExecutor for KnowledgeMergeExecutor {
    fn validate(&self, node: &NodeSchema) -> Result<(), NodeError> {
        let config: MergeConfig = parse_config(node)?;
        match config.k {
            Some(k) if k.is_nan() || k < 0.0 => Err(NodeError::ConfigError(
                "rank constant k must be non-negative".to_string(),
            )),
            _ => Ok(()),
        }
    }

    async fn execute(
        &self,
        node: &NodeSchema,
        inputs: &NodeInputs,
        _pool: &VariablePool,
        context: &RuntimeContext,
    ) -> Result<NodeRunResult, NodeError> {
        let config: MergeConfig = parse_config(node)?;
        let limit = config
            .limit
            .unwrap_or(context.config.default_quote_token_limit);
        let k = config.k.unwrap_or(context.config.rrf_k);

        let lists: Vec<Vec<Value>> = input_array(inputs, "lists")
            .into_iter()
            .filter_map(|list| match list {
                Value::Array(items) => Some(items),
                _ => None,
            })
            .collect();
        let fused = reciprocal_rank_fusion(&lists, k);
        let (quotes, tokens) = truncate_by_tokens(fused.into_iter().map(|f| f.item).collect(), limit);

        let mut result = NodeRunResult::with_outputs(HashMap::from([(
            QUOTE_LIST_KEY.to_string(),
            Value::Array(quotes),
        )]));
        result.metadata = json!({ "lists": lists.len(), "tokens": tokens });
        Ok(result)
    }
}
