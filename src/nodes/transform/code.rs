//! Code node executor. The code itself runs in the injected sandbox.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::core::resolver::NodeInputs;
use crate::core::runtime_context::RuntimeContext;
use crate::core::variable_pool::VariablePool;
use crate::dsl::{NodeRunResult, NodeSchema};
use crate::error::NodeError;
use crate::nodes::executor::NodeExecutor;
use crate::nodes::utils::parse_config;
use crate::sandbox::{CodeLanguage, SandboxRequest};

#[derive(Debug, Default, Deserialize)]
struct CodeRunConfig {
    #[serde(default)]
    language: CodeLanguage,
    #[serde(default)]
    code: String,
}

pub struct CodeRunExecutor;

#[async_trait]
impl NodeExecutor for CodeRunExecutor {
    fn validate(&self, node: &NodeSchema) -> Result<(), NodeError> {
        let config: CodeRunConfig = parse_config(node)?;
        if config.code.trim().is_empty() {
            return Err(NodeError::ConfigError("code-run has no code".to_string()));
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
        let config: CodeRunConfig = parse_config(node)?;
        let sandbox = context.services.sandbox()?;

        let request = SandboxRequest {
            language: config.language,
            code: config.code,
            inputs: inputs.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        };
        let result = context.guard(sandbox.execute(request)).await?;

        let outputs: HashMap<String, Value> = match result.output {
            Value::Object(map) => map.into_iter().collect(),
            Value::Null => HashMap::new(),
            other => HashMap::from([("result".to_string(), other)]),
        };

        let mut run = NodeRunResult::with_outputs(outputs);
        run.metadata = json!({ "logs": result.logs });
        Ok(run)
    }
}
