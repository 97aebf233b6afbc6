//! In-memory graph contract: nodes, edges, input bindings and output slots,
//! plus the result shape every executor returns.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RunError;
use crate::nodes::human_input::InteractionRequest;

/// Default source handle: active whenever the node completes normally.
pub const SOURCE_HANDLE: &str = "source";
/// Default target handle: a pure activation edge that binds no input.
pub const TARGET_HANDLE: &str = "target";
/// Source handle of a tool agent that marks an edge as a tool binding.
pub const TOOL_HANDLE: &str = "selected-tools";
/// Pseudo-node id whose outputs are the run's global variables.
pub const GLOBAL_NODE_ID: &str = "global";

/// Closed set of node kinds. Each kind maps to exactly one registered executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    Start,
    Answer,
    ModelChat,
    KnowledgeSearch,
    KnowledgeMerge,
    Classifier,
    FieldExtractor,
    HttpRequest,
    IfElse,
    Loop,
    LoopStart,
    LoopEnd,
    ToolAgent,
    RunTool,
    StopTool,
    VariableUpdate,
    UserSelect,
    FormInput,
    PluginInput,
    PluginOutput,
    TextConcat,
    CodeRun,
}

impl NodeKind {
    pub const ALL: [NodeKind; 22] = [
        NodeKind::Start,
        NodeKind::Answer,
        NodeKind::ModelChat,
        NodeKind::KnowledgeSearch,
        NodeKind::KnowledgeMerge,
        NodeKind::Classifier,
        NodeKind::FieldExtractor,
        NodeKind::HttpRequest,
        NodeKind::IfElse,
        NodeKind::Loop,
        NodeKind::LoopStart,
        NodeKind::LoopEnd,
        NodeKind::ToolAgent,
        NodeKind::RunTool,
        NodeKind::StopTool,
        NodeKind::VariableUpdate,
        NodeKind::UserSelect,
        NodeKind::FormInput,
        NodeKind::PluginInput,
        NodeKind::PluginOutput,
        NodeKind::TextConcat,
        NodeKind::CodeRun,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Start => "start",
            NodeKind::Answer => "answer",
            NodeKind::ModelChat => "model-chat",
            NodeKind::KnowledgeSearch => "knowledge-search",
            NodeKind::KnowledgeMerge => "knowledge-merge",
            NodeKind::Classifier => "classifier",
            NodeKind::FieldExtractor => "field-extractor",
            NodeKind::HttpRequest => "http-request",
            NodeKind::IfElse => "if-else",
            NodeKind::Loop => "loop",
            NodeKind::LoopStart => "loop-start",
            NodeKind::LoopEnd => "loop-end",
            NodeKind::ToolAgent => "tool-agent",
            NodeKind::RunTool => "run-tool",
            NodeKind::StopTool => "stop-tool",
            NodeKind::VariableUpdate => "variable-update",
            NodeKind::UserSelect => "user-select",
            NodeKind::FormInput => "form-input",
            NodeKind::PluginInput => "plugin-input",
            NodeKind::PluginOutput => "plugin-output",
            NodeKind::TextConcat => "text-concat",
            NodeKind::CodeRun => "code-run",
        }
    }

    /// Entry points of the root scope.
    pub fn is_root_entry(&self) -> bool {
        matches!(self, NodeKind::Start | NodeKind::PluginInput)
    }

    /// Kinds that suspend the run waiting for a human decision.
    pub fn is_interactive(&self) -> bool {
        matches!(self, NodeKind::UserSelect | NodeKind::FormInput)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared type of an input or output slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueType {
    #[default]
    Any,
    String,
    Number,
    Boolean,
    Object,
    ArrayString,
    ArrayNumber,
    ArrayBoolean,
    ArrayObject,
    ArrayAny,
    DatasetQuote,
}

impl ValueType {
    /// Scalar element type of an array type.
    pub fn element(&self) -> Option<ValueType> {
        match self {
            ValueType::ArrayString => Some(ValueType::String),
            ValueType::ArrayNumber => Some(ValueType::Number),
            ValueType::ArrayBoolean => Some(ValueType::Boolean),
            ValueType::ArrayObject | ValueType::DatasetQuote => Some(ValueType::Object),
            ValueType::ArrayAny => Some(ValueType::Any),
            _ => None,
        }
    }

    /// Exact structural match without any coercion.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ValueType::Any => true,
            ValueType::String => value.is_string(),
            ValueType::Number => value.is_number(),
            ValueType::Boolean => value.is_boolean(),
            ValueType::Object => value.is_object(),
            array_type => match (value.as_array(), array_type.element()) {
                (Some(items), Some(element)) => items.iter().all(|item| element.accepts(item)),
                _ => false,
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ValueType::Any => "any",
            ValueType::String => "string",
            ValueType::Number => "number",
            ValueType::Boolean => "boolean",
            ValueType::Object => "object",
            ValueType::ArrayString => "arrayString",
            ValueType::ArrayNumber => "arrayNumber",
            ValueType::ArrayBoolean => "arrayBoolean",
            ValueType::ArrayObject => "arrayObject",
            ValueType::ArrayAny => "arrayAny",
            ValueType::DatasetQuote => "datasetQuote",
        }
    }

    /// Describe the runtime shape of a value for mismatch messages.
    pub fn describe(value: &Value) -> &'static str {
        match value {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `(nodeId, outputKey)` pair. `node_id == "global"` addresses a variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueRef {
    pub node_id: String,
    pub output_key: String,
}

impl ValueRef {
    pub fn new(node_id: impl Into<String>, output_key: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            output_key: output_key.into(),
        }
    }

    pub fn is_global(&self) -> bool {
        self.node_id == GLOBAL_NODE_ID
    }
}

/// How an input slot obtains its value when no edge feeds it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Binding {
    Literal {
        value: Value,
    },
    Reference {
        node_id: String,
        output_key: String,
    },
    /// Caller-extensible set of references; resolves to an array.
    References {
        refs: Vec<ValueRef>,
    },
    #[default]
    Unbound,
}

impl Binding {
    pub fn is_bound(&self) -> bool {
        !matches!(self, Binding::Unbound)
    }

    /// Every node output this binding reads.
    pub fn refs(&self) -> Vec<ValueRef> {
        match self {
            Binding::Reference {
                node_id,
                output_key,
            } => vec![ValueRef::new(node_id.clone(), output_key.clone())],
            Binding::References { refs } => refs.clone(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSlot {
    pub key: String,
    #[serde(default)]
    pub value_type: ValueType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub binding: Binding,
    #[serde(default)]
    pub default: Option<Value>,
    /// Accepts several incoming edges and resolves to an array.
    #[serde(default)]
    pub dynamic: bool,
    /// Exposed as a parameter when the owning node is a tool entry.
    #[serde(default)]
    pub tool_param: bool,
    #[serde(default)]
    pub description: Option<String>,
}

impl InputSlot {
    pub fn new(key: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            key: key.into(),
            value_type,
            required: false,
            binding: Binding::Unbound,
            default: None,
            dynamic: false,
            tool_param: false,
            description: None,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic || matches!(self.binding, Binding::References { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// Fixed at design time.
    #[default]
    Static,
    /// Declared by the node instance, e.g. an extracted HTTP response field.
    Dynamic,
    /// Populated only when a caught failure routes through the node.
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSlot {
    pub key: String,
    #[serde(default)]
    pub value_type: ValueType,
    #[serde(default)]
    pub cardinality: Cardinality,
    #[serde(default)]
    pub default: Option<Value>,
    /// Dot path into a structured result, used by dynamic outputs.
    #[serde(default)]
    pub extract_path: Option<String>,
}

impl OutputSlot {
    pub fn new(key: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            key: key.into(),
            value_type,
            cardinality: Cardinality::Static,
            default: None,
            extract_path: None,
        }
    }
}

/// Retry configuration for transient executor failures
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub retry_interval_ms: u64,
}

fn default_version() -> String {
    "1".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSchema {
    pub id: String,
    pub kind: NodeKind,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub name: String,
    /// Loop node that owns this node's body membership.
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub inputs: Vec<InputSlot>,
    #[serde(default)]
    pub outputs: Vec<OutputSlot>,
    #[serde(default)]
    pub catch_error: bool,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub tool_description: Option<String>,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl NodeSchema {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind,
            version: default_version(),
            parent_id: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            catch_error: false,
            config: Value::Null,
            tool_description: None,
            retry: None,
        }
    }

    pub fn input(&self, key: &str) -> Option<&InputSlot> {
        self.inputs.iter().find(|slot| slot.key == key)
    }

    pub fn output(&self, key: &str) -> Option<&OutputSlot> {
        self.outputs.iter().find(|slot| slot.key == key)
    }

    /// The slot a caught failure is routed to, if this node catches errors.
    pub fn error_slot(&self) -> Option<&OutputSlot> {
        if !self.catch_error {
            return None;
        }
        self.outputs
            .iter()
            .find(|slot| slot.cardinality == Cardinality::Error)
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

fn default_source_handle() -> String {
    SOURCE_HANDLE.to_string()
}

fn default_target_handle() -> String {
    TARGET_HANDLE.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeSchema {
    #[serde(default)]
    pub id: String,
    pub source: String,
    #[serde(default = "default_source_handle")]
    pub source_handle: String,
    pub target: String,
    #[serde(default = "default_target_handle")]
    pub target_handle: String,
}

impl EdgeSchema {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        let mut edge = Self {
            id: String::new(),
            source: source.into(),
            source_handle: default_source_handle(),
            target: target.into(),
            target_handle: default_target_handle(),
        };
        edge.id = edge.derived_id();
        edge
    }

    pub fn with_handles(mut self, source_handle: &str, target_handle: &str) -> Self {
        self.source_handle = source_handle.to_string();
        self.target_handle = target_handle.to_string();
        self.id = self.derived_id();
        self
    }

    pub fn is_tool_edge(&self) -> bool {
        self.source_handle == TOOL_HANDLE
    }

    fn derived_id(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.source, self.source_handle, self.target, self.target_handle
        )
    }
}

/// A complete graph snapshot handed to the engine for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSchema {
    #[serde(default)]
    pub nodes: Vec<NodeSchema>,
    #[serde(default)]
    pub edges: Vec<EdgeSchema>,
}

impl WorkflowSchema {
    pub fn assign_edge_ids(&mut self) {
        for edge in &mut self.edges {
            if edge.id.is_empty() {
                edge.id = edge.derived_id();
            }
        }
    }
}

/// Caller-supplied input that seeds the root entry node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryInput {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub params: serde_json::Map<String, Value>,
}

impl EntryInput {
    pub fn query(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            params: serde_json::Map::new(),
        }
    }
}

/// Per-node usage metadata forwarded to the usage sink.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeUsage {
    pub node_id: String,
    pub node_name: String,
    #[serde(default)]
    pub model: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub call_count: u32,
}

/// Output of one executor invocation, committed by the dispatcher.
#[derive(Debug, Clone, Default)]
pub struct NodeRunResult {
    pub outputs: HashMap<String, Value>,
    /// Source handles this execution selects. `None` activates the default
    /// `source` handle plus every handle named after a produced output.
    pub selected_handles: Option<Vec<String>>,
    /// Free-form response metadata surfaced in the run result.
    pub metadata: Value,
    pub usages: Vec<NodeUsage>,
    pub variable_updates: HashMap<String, Value>,
    pub answer_text: Option<String>,
    pub final_outputs: HashMap<String, Value>,
    /// Non-fatal errors to surface alongside the node's outputs.
    pub reported_errors: Vec<RunError>,
    /// Set by interactive nodes: the run suspends instead of committing.
    pub interaction: Option<InteractionRequest>,
    /// Set by the stop-tool node: ends the enclosing tool loop.
    pub stop_requested: bool,
}

impl NodeRunResult {
    pub fn with_outputs(outputs: HashMap<String, Value>) -> Self {
        Self {
            outputs,
            ..Default::default()
        }
    }

    pub fn select(mut self, handles: Vec<String>) -> Self {
        self.selected_handles = Some(handles);
        self
    }
}
