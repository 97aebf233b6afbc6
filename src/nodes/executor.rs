use async_trait::async_trait;
use std::collections::HashMap;

use crate::core::resolver::NodeInputs;
use crate::core::runtime_context::RuntimeContext;
use crate::core::variable_pool::VariablePool;
use crate::dsl::{NodeKind, NodeRunResult, NodeSchema};
use crate::error::NodeError;

use super::agent::{RunToolExecutor, StopToolExecutor, ToolAgentExecutor};
use super::ai::{ClassifierExecutor, FieldExtractorExecutor, ModelChatExecutor};
use super::control_flow::{
    AnswerNodeExecutor, IfElseNodeExecutor, PluginInputExecutor, PluginOutputExecutor,
    StartNodeExecutor,
};
use super::flow::{LoopEndExecutor, LoopNodeExecutor, LoopStartExecutor};
use super::human_input::{FormInputExecutor, UserSelectExecutor};
use super::knowledge::{KnowledgeMergeExecutor, KnowledgeSearchExecutor};
use super::transform::{
    CodeRunExecutor, HttpRequestExecutor, TextConcatExecutor, VariableUpdateExecutor,
};

/// Trait for node execution. Each node kind implements this.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Check the node's kind-specific config before a run starts.
    fn validate(&self, _node: &NodeSchema) -> Result<(), NodeError> {
        Ok(())
    }

    /// Execute the node against its resolved inputs. `pool` is a snapshot
    /// taken when the node became runnable.
    async fn execute(
        &self,
        node: &NodeSchema,
        inputs: &NodeInputs,
        pool: &VariablePool,
        context: &RuntimeContext,
    ) -> Result<NodeRunResult, NodeError>;
}

/// Registry of node executors by node kind
pub struct NodeExecutorRegistry {
    executors: HashMap<NodeKind, Box<dyn NodeExecutor>>,
}

impl NodeExecutorRegistry {
    /// A registry with every built-in executor.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(NodeKind::Start, Box::new(StartNodeExecutor));
        registry.register(NodeKind::PluginInput, Box::new(PluginInputExecutor));
        registry.register(NodeKind::Answer, Box::new(AnswerNodeExecutor));
        registry.register(NodeKind::PluginOutput, Box::new(PluginOutputExecutor));
        registry.register(NodeKind::IfElse, Box::new(IfElseNodeExecutor));
        registry.register(NodeKind::Loop, Box::new(LoopNodeExecutor));
        registry.register(NodeKind::LoopStart, Box::new(LoopStartExecutor));
        registry.register(NodeKind::LoopEnd, Box::new(LoopEndExecutor));
        registry.register(NodeKind::ToolAgent, Box::new(ToolAgentExecutor));
        registry.register(NodeKind::RunTool, Box::new(RunToolExecutor));
        registry.register(NodeKind::StopTool, Box::new(StopToolExecutor));
        registry.register(NodeKind::ModelChat, Box::new(ModelChatExecutor));
        registry.register(NodeKind::Classifier, Box::new(ClassifierExecutor));
        registry.register(NodeKind::FieldExtractor, Box::new(FieldExtractorExecutor));
        registry.register(NodeKind::KnowledgeSearch, Box::new(KnowledgeSearchExecutor));
        registry.register(NodeKind::KnowledgeMerge, Box::new(KnowledgeMergeExecutor));
        registry.register(NodeKind::HttpRequest, Box::new(HttpRequestExecutor));
        registry.register(NodeKind::CodeRun, Box::new(CodeRunExecutor));
        registry.register(NodeKind::TextConcat, Box::new(TextConcatExecutor));
        registry.register(NodeKind::VariableUpdate, Box::new(VariableUpdateExecutor));
        registry.register(NodeKind::UserSelect, Box::new(UserSelectExecutor));
        registry.register(NodeKind::FormInput, Box::new(FormInputExecutor));
        registry
    }

    pub fn empty() -> Self {
        NodeExecutorRegistry {
            executors: HashMap::new(),
        }
    }

    /// Add or replace the executor for `kind`.
    pub fn register(&mut self, kind: NodeKind, executor: Box<dyn NodeExecutor>) {
        self.executors.insert(kind, executor);
    }

    pub fn get(&self, kind: NodeKind) -> Option<&dyn NodeExecutor> {
        self.executors.get(&kind).map(|e| e.as_ref())
    }
}

impl Default for NodeExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_registered() {
        let registry = NodeExecutorRegistry::new();
        for kind in NodeKind::ALL {
            assert!(registry.get(kind).is_some(), "missing executor for {}", kind);
        }
    }

    #[test]
    fn test_empty_registry() {
        assert!(NodeExecutorRegistry::empty().get(NodeKind::Start).is_none());
    }
}
