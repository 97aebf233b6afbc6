//! Interactive nodes: `user-select` and `form-input`.
//!
//! Executing one of these never produces outputs. The executor returns an
//! [`InteractionRequest`], the dispatcher suspends the run and the caller
//! later resumes it with a matching [`UserInput`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::core::resolver::NodeInputs;
use crate::core::runtime_context::RuntimeContext;
use crate::core::variable_pool::VariablePool;
use crate::dsl::{NodeRunResult, NodeSchema, ValueType, SOURCE_HANDLE};
use crate::error::NodeError;
use crate::nodes::executor::NodeExecutor;
use crate::nodes::utils::parse_config;
use crate::template::render;

pub const SELECTED_OPTION_KEY: &str = "selected_option";
pub const FORM_DATA_KEY: &str = "form_data";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectOption {
    pub id: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    pub key: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub value_type: ValueType,
}

/// What the caller must answer before the run can continue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InteractionRequest {
    UserSelect {
        description: String,
        options: Vec<SelectOption>,
    },
    FormInput {
        description: String,
        fields: Vec<FormField>,
    },
}

/// The caller's answer to an [`InteractionRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserInput {
    /// Option id or option value of a user-select request.
    Select { option: String },
    Form { values: serde_json::Map<String, Value> },
}

/// Outputs and activated handles produced by applying a resume input.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionAnswer {
    pub outputs: HashMap<String, Value>,
    pub handles: Vec<String>,
}

impl InteractionRequest {
    /// Check `input` against this request and turn it into the node's
    /// outputs. Errors carry a message for `InvalidResumeInput`.
    pub fn answer(&self, input: &UserInput) -> Result<InteractionAnswer, String> {
        match (self, input) {
            (InteractionRequest::UserSelect { options, .. }, UserInput::Select { option }) => {
                let chosen = options
                    .iter()
                    .find(|o| &o.id == option)
                    .or_else(|| options.iter().find(|o| &o.value == option))
                    .ok_or_else(|| format!("unknown option '{}'", option))?;
                Ok(InteractionAnswer {
                    outputs: HashMap::from([(
                        SELECTED_OPTION_KEY.to_string(),
                        Value::String(chosen.value.clone()),
                    )]),
                    handles: vec![chosen.id.clone()],
                })
            }
            (InteractionRequest::FormInput { fields, .. }, UserInput::Form { values }) => {
                let mut outputs = HashMap::new();
                for field in fields {
                    match values.get(&field.key) {
                        None | Some(Value::Null) if field.required => {
                            return Err(format!("missing required field '{}'", field.key));
                        }
                        None | Some(Value::Null) => {
                            outputs.insert(field.key.clone(), Value::Null);
                        }
                        Some(value) if !field.value_type.accepts(value) => {
                            return Err(format!(
                                "field '{}' expects {}, got {}",
                                field.key,
                                field.value_type,
                                ValueType::describe(value)
                            ));
                        }
                        Some(value) => {
                            outputs.insert(field.key.clone(), value.clone());
                        }
                    }
                }
                outputs.insert(FORM_DATA_KEY.to_string(), Value::Object(values.clone()));
                Ok(InteractionAnswer {
                    outputs,
                    handles: vec![SOURCE_HANDLE.to_string()],
                })
            }
            (InteractionRequest::UserSelect { .. }, _) => {
                Err("expected a select input".to_string())
            }
            (InteractionRequest::FormInput { .. }, _) => Err("expected a form input".to_string()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct UserSelectConfig {
    #[serde(default)]
    description: String,
    #[serde(default)]
    options: Vec<SelectOption>,
}

#[derive(Debug, Default, Deserialize)]
struct FormInputConfig {
    #[serde(default)]
    description: String,
    #[serde(default)]
    fields: Vec<FormField>,
}

pub struct UserSelectExecutor;

#[async_trait]
impl NodeExecutor for UserSelectExecutor {
    fn validate(&self, node: &NodeSchema) -> Result<(), NodeError> {
        let config: UserSelectConfig = parse_config(node)?;
        if config.options.is_empty() {
            return Err(NodeError::ConfigError("user-select needs at least one option".into()));
        }
        Ok(())
    }

    async fn execute(
        &self,
        node: &NodeSchema,
        inputs: &NodeInputs,
        pool: &VariablePool,
        _context: &RuntimeContext,
    ) -> Result<NodeRunResult, NodeError> {
        let config: UserSelectConfig = parse_config(node)?;
        Ok(NodeRunResult {
            interaction: Some(InteractionRequest::UserSelect {
                description: render(&config.description, pool, Some(inputs)),
                options: config.options,
            }),
            ..Default::default()
        })
    }
}

pub struct FormInputExecutor;

#[async_trait]
impl NodeExecutor for FormInputExecutor {
    fn validate(&self, node: &NodeSchema) -> Result<(), NodeError> {
        let config: FormInputConfig = parse_config(node)?;
        if config.fields.is_empty() {
            return Err(NodeError::ConfigError("form-input needs at least one field".into()));
        }
        Ok(())
    }

    async fn execute(
        &self,
        node: &NodeSchema,
        inputs: &NodeInputs,
        pool: &VariablePool,
        _context: &RuntimeContext,
    ) -> Result<NodeRunResult, NodeError> {
        let config: FormInputConfig = parse_config(node)?;
        Ok(NodeRunResult {
            interaction: Some(InteractionRequest::FormInput {
                description: render(&config.description, pool, Some(inputs)),
                fields: config.fields,
            }),
            ..Default::default()
        })
    }
}
