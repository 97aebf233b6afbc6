#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use dagflow::core::{HttpClient, HttpRequest, HttpResponse, UsageSink};
use dagflow::knowledge::{SearchClient, SearchRequest, SearchResult};
use dagflow::llm::{ChatCompletionRequest, ChatCompletionResponse, ModelClient, ToolCall};
use dagflow::{
    Binding, Cardinality, EdgeSchema, FakeIdGenerator, FakeTimeProvider, InputSlot, NodeError,
    NodeKind, NodeSchema, NodeUsage, OutputSlot, ValueType, WorkflowEngine, WorkflowEngineBuilder,
};

// ================================
// Collaborator mocks
// ================================

/// Replays scripted responses, then repeats `fallback` forever.
pub struct ScriptedModel {
    responses: Mutex<VecDeque<ChatCompletionResponse>>,
    fallback: ChatCompletionResponse,
    pub requests: Mutex<Vec<ChatCompletionRequest>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<ChatCompletionResponse>, fallback: ChatCompletionResponse) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            fallback,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn always(response: ChatCompletionResponse) -> Self {
        Self::new(Vec::new(), response)
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn chat_completion(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, NodeError> {
        self.requests.lock().push(request);
        let next = self.responses.lock().pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }
}

pub fn text_response(text: &str) -> ChatCompletionResponse {
    ChatCompletionResponse {
        content: text.to_string(),
        model: "mock-model".to_string(),
        ..Default::default()
    }
}

pub fn tool_response(name: &str, arguments: Value) -> ChatCompletionResponse {
    ChatCompletionResponse {
        tool_calls: vec![ToolCall {
            id: format!("call_{}", name),
            name: name.to_string(),
            arguments,
        }],
        model: "mock-model".to_string(),
        ..Default::default()
    }
}

/// Returns a fixed ranked list per dataset id.
#[derive(Default)]
pub struct CannedSearch {
    pub lists: HashMap<String, Vec<SearchResult>>,
    pub queries: Mutex<Vec<SearchRequest>>,
}

impl CannedSearch {
    pub fn with(mut self, dataset: &str, ids: &[&str]) -> Self {
        let results = ids
            .iter()
            .map(|id| SearchResult {
                id: id.to_string(),
                dataset_id: dataset.to_string(),
                content: format!("chunk {}", id),
                ..Default::default()
            })
            .collect();
        self.lists.insert(dataset.to_string(), results);
        self
    }
}

#[async_trait]
impl SearchClient for CannedSearch {
    async fn search(&self, request: SearchRequest) -> Result<Vec<SearchResult>, NodeError> {
        let results = request
            .dataset_ids
            .iter()
            .flat_map(|id| self.lists.get(id).cloned().unwrap_or_default())
            .collect();
        self.queries.lock().push(request);
        Ok(results)
    }
}

/// Answers every request with the same response, optionally after a delay.
pub struct RecordingHttp {
    status: u16,
    body: String,
    delay: Option<Duration>,
    scripted: Mutex<VecDeque<u16>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    pub requests: Mutex<Vec<HttpRequest>>,
}

impl RecordingHttp {
    pub fn new(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
            delay: None,
            scripted: Mutex::new(VecDeque::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Answer the first calls with these statuses, then with the default one.
    pub fn first_statuses(self, statuses: &[u16]) -> Self {
        self.scripted.lock().extend(statuses.iter().copied());
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    /// Largest number of requests that were in flight at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpClient for RecordingHttp {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, NodeError> {
        self.requests.lock().push(request);
        let status = self.scripted.lock().pop_front().unwrap_or(self.status);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(HttpResponse {
            status,
            headers: HashMap::new(),
            body: self.body.clone(),
        })
    }
}

#[derive(Default)]
pub struct RecordingUsageSink {
    pub records: Mutex<Vec<(String, NodeUsage)>>,
    pub count: AtomicUsize,
}

impl UsageSink for RecordingUsageSink {
    fn record(&self, run_id: &str, usage: &NodeUsage) {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.records.lock().push((run_id.to_string(), usage.clone()));
    }
}

// ================================
// Graph helpers
// ================================

pub fn node(id: &str, kind: NodeKind) -> NodeSchema {
    NodeSchema::new(id, kind)
}

pub fn configured(id: &str, kind: NodeKind, config: Value) -> NodeSchema {
    let mut node = NodeSchema::new(id, kind);
    node.config = config;
    node
}

pub fn child(mut node: NodeSchema, parent: &str) -> NodeSchema {
    node.parent_id = Some(parent.to_string());
    node
}

pub fn answer(id: &str, text: &str) -> NodeSchema {
    configured(id, NodeKind::Answer, json!({ "text": text }))
}

/// Required input bound to another node's output.
pub fn reference(key: &str, value_type: ValueType, node_id: &str, output_key: &str) -> InputSlot {
    InputSlot {
        required: true,
        binding: Binding::Reference {
            node_id: node_id.to_string(),
            output_key: output_key.to_string(),
        },
        ..InputSlot::new(key, value_type)
    }
}

pub fn question_input() -> InputSlot {
    reference("user_question", ValueType::String, "start", "user_question")
}

pub fn with_input(mut node: NodeSchema, slot: InputSlot) -> NodeSchema {
    node.inputs.push(slot);
    node
}

pub fn error_output() -> OutputSlot {
    OutputSlot {
        cardinality: Cardinality::Error,
        ..OutputSlot::new("error", ValueType::String)
    }
}

pub fn edge(source: &str, target: &str) -> EdgeSchema {
    EdgeSchema::new(source, target)
}

pub fn branch(source: &str, handle: &str, target: &str) -> EdgeSchema {
    EdgeSchema::new(source, target).with_handles(handle, "target")
}

/// Engine builder with deterministic ids and clock.
pub fn engine_builder() -> WorkflowEngineBuilder {
    WorkflowEngine::builder()
        .id_generator(Arc::new(FakeIdGenerator::new("run")))
        .time_provider(Arc::new(FakeTimeProvider::new(1_700_000_000)))
}
