use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

use crate::core::resolver::NodeInputs;
use crate::core::runtime_context::RuntimeContext;
use crate::core::variable_pool::VariablePool;
use crate::dsl::{NodeRunResult, NodeSchema};
use crate::error::NodeError;
use crate::evaluator::{evaluate_cases, Case};
use crate::nodes::executor::NodeExecutor;
use crate::nodes::utils::{input_text, parse_config};
use crate::template::render;

pub const USER_QUESTION_KEY: &str = "user_question";

// ================================
// Start Node
// ================================

pub struct StartNodeExecutor;

#[async_trait]
impl NodeExecutor for StartNodeExecutor {
    async fn execute(
        &self,
        _node: &NodeSchema,
        _inputs: &NodeInputs,
        _pool: &VariablePool,
        context: &RuntimeContext,
    ) -> Result<NodeRunResult, NodeError> {
        let mut outputs: HashMap<String, Value> = context
            .entry
            .params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        outputs.insert(
            USER_QUESTION_KEY.to_string(),
            Value::String(context.entry.query.clone()),
        );
        Ok(NodeRunResult::with_outputs(outputs))
    }
}

// ================================
// Plugin Input Node
// ================================

pub struct PluginInputExecutor;

#[async_trait]
impl NodeExecutor for PluginInputExecutor {
    async fn execute(
        &self,
        _node: &NodeSchema,
        _inputs: &NodeInputs,
        _pool: &VariablePool,
        context: &RuntimeContext,
    ) -> Result<NodeRunResult, NodeError> {
        let outputs = context
            .entry
            .params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(NodeRunResult::with_outputs(outputs))
    }
}

// ================================
// Answer Node
// ================================

#[derive(Debug, Default, Deserialize)]
struct AnswerConfig {
    #[serde(default)]
    text: Option<String>,
}

pub struct AnswerNodeExecutor;

#[async_trait]
impl NodeExecutor for AnswerNodeExecutor {
    async fn execute(
        &self,
        node: &NodeSchema,
        inputs: &NodeInputs,
        pool: &VariablePool,
        _context: &RuntimeContext,
    ) -> Result<NodeRunResult, NodeError> {
        let config: AnswerConfig = parse_config(node)?;
        let text = match config.text {
            Some(template) => render(&template, pool, Some(inputs)),
            None => input_text(inputs, "text"),
        };

        let mut result = NodeRunResult::with_outputs(HashMap::from([(
            "answer".to_string(),
            Value::String(text.clone()),
        )]));
        result.answer_text = Some(text);
        Ok(result)
    }
}

// ================================
// Plugin Output Node
// ================================

pub struct PluginOutputExecutor;

#[async_trait]
impl NodeExecutor for PluginOutputExecutor {
    async fn execute(
        &self,
        _node: &NodeSchema,
        inputs: &NodeInputs,
        _pool: &VariablePool,
        _context: &RuntimeContext,
    ) -> Result<NodeRunResult, NodeError> {
        let mut result = NodeRunResult::with_outputs(inputs.clone());
        result.final_outputs = inputs.clone();
        Ok(result)
    }
}

// ================================
// IfElse Node
// ================================

#[derive(Debug, Default, Deserialize)]
struct IfElseConfig {
    #[serde(default)]
    cases: Vec<Case>,
}

pub struct IfElseNodeExecutor;

#[async_trait]
impl NodeExecutor for IfElseNodeExecutor {
    fn validate(&self, node: &NodeSchema) -> Result<(), NodeError> {
        parse_config::<IfElseConfig>(node).map(|_| ())
    }

    async fn execute(
        &self,
        node: &NodeSchema,
        inputs: &NodeInputs,
        _pool: &VariablePool,
        _context: &RuntimeContext,
    ) -> Result<NodeRunResult, NodeError> {
        let config: IfElseConfig = parse_config(node)?;
        let selected = evaluate_cases(&config.cases, inputs);

        let outputs = HashMap::from([(
            "selected_case".to_string(),
            Value::String(selected.clone()),
        )]);
        Ok(NodeRunResult::with_outputs(outputs).select(vec![selected]))
    }
}
