use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::resolver::NodeInputs;
use crate::template::value_to_text;

/// Handle activated when no case matches.
pub const ELSE_CASE: &str = "else";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    Contains,
    NotContains,
    StartWith,
    EndWith,
    Is,
    IsNot,
    Empty,
    NotEmpty,
    Equal,
    NotEqual,
    #[serde(alias = ">")]
    Gt,
    #[serde(alias = "<")]
    Lt,
    #[serde(alias = ">=")]
    Ge,
    #[serde(alias = "<=")]
    Le,
    Null,
    NotNull,
}

/// One atomic comparison: the resolved input `input` against `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub input: String,
    pub operator: ComparisonOperator,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub case_id: String,
    #[serde(default)]
    pub logical_operator: LogicalOperator,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Evaluate if/else cases in order, returning the case_id of the first
/// matching case, or [`ELSE_CASE`] if none matches.
pub fn evaluate_cases(cases: &[Case], inputs: &NodeInputs) -> String {
    cases
        .iter()
        .find(|case| evaluate_case(case, inputs))
        .map(|case| case.case_id.clone())
        .unwrap_or_else(|| ELSE_CASE.to_string())
}

/// Evaluate a single case (AND/OR logic). A case without conditions never
/// matches.
pub fn evaluate_case(case: &Case, inputs: &NodeInputs) -> bool {
    if case.conditions.is_empty() {
        return false;
    }
    match case.logical_operator {
        LogicalOperator::And => case.conditions.iter().all(|c| evaluate_condition(c, inputs)),
        LogicalOperator::Or => case.conditions.iter().any(|c| evaluate_condition(c, inputs)),
    }
}

pub fn evaluate_condition(cond: &Condition, inputs: &NodeInputs) -> bool {
    let actual = inputs.get(&cond.input).unwrap_or(&Value::Null);
    let expected = &cond.value;

    match cond.operator {
        ComparisonOperator::Contains => contains(actual, expected),
        ComparisonOperator::NotContains => !contains(actual, expected),
        ComparisonOperator::StartWith => {
            value_to_text(actual).starts_with(&value_to_text(expected))
        }
        ComparisonOperator::EndWith => value_to_text(actual).ends_with(&value_to_text(expected)),

        ComparisonOperator::Is => value_to_text(actual) == value_to_text(expected),
        ComparisonOperator::IsNot => value_to_text(actual) != value_to_text(expected),

        ComparisonOperator::Empty => is_empty(actual),
        ComparisonOperator::NotEmpty => !is_empty(actual),

        ComparisonOperator::Equal => compare(actual, expected, |a, b| (a - b).abs() < f64::EPSILON),
        ComparisonOperator::NotEqual => {
            !compare(actual, expected, |a, b| (a - b).abs() < f64::EPSILON)
        }
        ComparisonOperator::Gt => compare(actual, expected, |a, b| a > b),
        ComparisonOperator::Lt => compare(actual, expected, |a, b| a < b),
        ComparisonOperator::Ge => compare(actual, expected, |a, b| a >= b),
        ComparisonOperator::Le => compare(actual, expected, |a, b| a <= b),

        ComparisonOperator::Null => actual.is_null(),
        ComparisonOperator::NotNull => !actual.is_null(),
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Array(items) => Some(items.len() as f64),
        _ => None,
    }
}

fn compare(actual: &Value, expected: &Value, op: impl Fn(f64, f64) -> bool) -> bool {
    match (as_f64(actual), as_f64(expected)) {
        (Some(a), Some(b)) => op(a, b),
        _ => false,
    }
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::String(s) => s.contains(&value_to_text(expected)),
        Value::Array(items) => {
            let needle = value_to_text(expected);
            items.iter().any(|item| item == expected || value_to_text(item) == needle)
        }
        Value::Object(map) => map.contains_key(&value_to_text(expected)),
        _ => false,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
