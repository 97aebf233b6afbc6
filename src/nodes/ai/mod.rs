//! Model-backed nodes. All of them go through the injected
//! [`ModelClient`](crate::llm::ModelClient) under the context's call guard.

mod chat;
mod classifier;
mod extractor;

pub use chat::ModelChatExecutor;
pub use classifier::ClassifierExecutor;
pub use extractor::FieldExtractorExecutor;

use serde_json::Value;

use crate::core::resolver::NodeInputs;
use crate::llm::types::ChatMessage;
use crate::nodes::utils::input_array;

/// Prior conversation from the `history` input. Entries that are not chat
/// messages are ignored.
pub(crate) fn history_messages(inputs: &NodeInputs) -> Vec<ChatMessage> {
    input_array(inputs, "history")
        .into_iter()
        .filter_map(|item| serde_json::from_value::<ChatMessage>(item).ok())
        .collect()
}

/// Render dataset quotes as a numbered reference block.
pub(crate) fn format_quotes(quotes: &[Value]) -> String {
    quotes
        .iter()
        .enumerate()
        .map(|(i, quote)| {
            let content = quote.get("content").and_then(Value::as_str).unwrap_or("");
            let answer = quote.get("answer").and_then(Value::as_str).unwrap_or("");
            if answer.is_empty() {
                format!("[{}] {}", i + 1, content)
            } else {
                format!("[{}] {}\n{}", i + 1, content, answer)
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
