use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;

use dagflow::llm::{ChatCompletionRequest, ChatCompletionResponse, ChatRole, ToolCall};
use dagflow::{
    parse_graph, EntryInput, GraphEngineEvent, ModelClient, NodeError, RunOutcome, WorkflowEngine,
};

/// Classifies by keyword; stands in for a real model service.
struct KeywordModel;

#[async_trait]
impl ModelClient for KeywordModel {
    async fn chat_completion(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, NodeError> {
        let question = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.to_lowercase())
            .unwrap_or_default();
        let category = if question.contains("hello") || question.contains("hi") {
            "greeting"
        } else {
            "other"
        };
        Ok(ChatCompletionResponse {
            tool_calls: vec![ToolCall {
                id: "call_0".to_string(),
                name: "classify_question".to_string(),
                arguments: json!({ "type": category }),
            }],
            model: "keyword".to_string(),
            ..Default::default()
        })
    }
}

const DEMO_GRAPH: &str = r#"{
  "nodes": [
    {"id": "start", "kind": "start"},
    {"id": "classify", "kind": "classifier",
     "inputs": [{"key": "user_question", "value_type": "string", "required": true,
                 "binding": {"type": "reference", "node_id": "start", "output_key": "user_question"}}],
     "config": {"categories": [{"id": "greeting", "value": "Greeting"}, {"id": "other", "value": "Anything else"}]}},
    {"id": "greet", "kind": "answer", "config": {"text": "Hello there! You said: {{$start.user_question$}}"}},
    {"id": "fallback", "kind": "answer", "config": {"text": "Let me look into that."}}
  ],
  "edges": [
    {"source": "start", "target": "classify"},
    {"source": "classify", "source_handle": "greeting", "target": "greet"},
    {"source": "classify", "source_handle": "other", "target": "fallback"}
  ]
}"#;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    println!("=== dagflow demo ===\n");

    let schema = match parse_graph(DEMO_GRAPH) {
        Ok(schema) => schema,
        Err(e) => {
            eprintln!("graph rejected: {}", e);
            return;
        }
    };

    let (tx, mut rx) = mpsc::channel(64);
    let engine = WorkflowEngine::builder()
        .model(Arc::new(KeywordModel))
        .event_sender(tx)
        .build();

    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                GraphEngineEvent::NodeSucceeded { node_id, .. } => println!("  [ok]   {}", node_id),
                GraphEngineEvent::NodeSkipped { node_id, .. } => println!("  [skip] {}", node_id),
                GraphEngineEvent::RunFinished { succeeded, .. } => {
                    println!("  [done] succeeded={}", succeeded)
                }
                _ => {}
            }
        }
    });

    let outcome = engine
        .start_run(schema, HashMap::new(), EntryInput::query("hello engine"))
        .await;
    drop(engine);
    let _ = printer.await;

    match outcome {
        Ok(RunOutcome::Completed(result)) => {
            println!("\nanswer: {}", result.answer_text);
            for error in &result.errors {
                println!("error: {}", error.message);
            }
        }
        Ok(RunOutcome::Suspended(suspension)) => {
            println!("\nwaiting for input at {}", suspension.node_id);
        }
        Err(e) => println!("\nrun rejected: {}", e),
    }
}
