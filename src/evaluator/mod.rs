pub mod condition;

pub use condition::{
    evaluate_case, evaluate_cases, evaluate_condition, Case, ComparisonOperator, Condition,
    LogicalOperator, ELSE_CASE,
};
