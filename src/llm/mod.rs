//! Model client boundary.
//!
//! The engine never talks to a vendor API directly: chat, classification,
//! extraction and tool-agent nodes call an injected [`ModelClient`].

pub mod types;

use async_trait::async_trait;

use crate::error::NodeError;

pub use types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ChatRole, ModelConfig,
    TokenUsage, ToolCall, ToolDefinition,
};

/// Injected chat-completion collaborator.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn chat_completion(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, NodeError>;

    /// Streaming variant. `on_delta` receives text chunks as they arrive; the
    /// returned response carries the complete text.
    async fn chat_completion_stream(
        &self,
        request: ChatCompletionRequest,
        on_delta: &(dyn for<'a> Fn(&'a str) + Send + Sync),
    ) -> Result<ChatCompletionResponse, NodeError> {
        let response = self.chat_completion(request).await?;
        if !response.content.is_empty() {
            on_delta(&response.content);
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    struct EchoModel;

    #[async_trait]
    impl ModelClient for EchoModel {
        async fn chat_completion(
            &self,
            request: ChatCompletionRequest,
        ) -> Result<ChatCompletionResponse, NodeError> {
            let content = request
                .messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            Ok(ChatCompletionResponse {
                content,
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn test_default_stream_emits_whole_text_once() {
        let deltas = Mutex::new(Vec::new());
        let on_delta = |chunk: &str| deltas.lock().push(chunk.to_string());
        let request = ChatCompletionRequest::new(
            &ModelConfig::default(),
            vec![ChatMessage::user("hello there")],
        );

        let response = EchoModel
            .chat_completion_stream(request, &on_delta)
            .await
            .unwrap();
        assert_eq!(response.content, "hello there");
        assert_eq!(*deltas.lock(), vec!["hello there".to_string()]);
    }

    #[tokio::test]
    async fn test_default_stream_skips_empty_text() {
        let deltas = Mutex::new(Vec::new());
        let on_delta = |chunk: &str| deltas.lock().push(chunk.to_string());
        let request = ChatCompletionRequest::new(&ModelConfig::default(), Vec::new());

        let response = EchoModel
            .chat_completion_stream(request, &on_delta)
            .await
            .unwrap();
        assert!(response.content.is_empty());
        assert!(deltas.lock().is_empty());
    }
}
