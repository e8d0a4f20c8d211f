//! Declarative condition model and evaluation.
//!
//! A [`Condition`] is a single-operator predicate over a context field
//! (`clusterPhase in ["Provisioning", "Ready"]`). Rule sets list conditions
//! that AND together; an empty list is vacuously true.
//!
//! Evaluation keeps the engine's two error bands apart:
//!
//! - A malformed field path is a *parse* error ([`PathError`]) - config bug,
//!   returned as `Err` immediately.
//! - Operator-level problems (nil `in` sequence, non-numeric comparison,
//!   mismatched `contains` types) are recorded on the per-condition outcome;
//!   the condition counts as failed and evaluation continues so the whole
//!   rule set can be reported.
//!
//! # Examples
//!
//! ```rust
//! use hyperfleet_adapter::context::EvaluationContext;
//! use hyperfleet_adapter::criteria::{evaluate_conditions, Condition, Operator};
//! use serde_json::json;
//!
//! let ctx = EvaluationContext::builder()
//!     .with_var("clusterPhase", json!("Ready"))
//!     .with_var("vpcId", json!("vpc-12345"))
//!     .build();
//!
//! let conditions = vec![
//!     Condition::new("clusterPhase", Operator::In, json!(["Provisioning", "Ready"])),
//!     Condition::exists("vpcId"),
//! ];
//!
//! let outcome = evaluate_conditions(&ctx, &conditions).unwrap();
//! assert!(outcome.matched);
//! assert_eq!(outcome.first_failure, None);
//! ```

mod compile;
mod operators;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::EvaluationContext;
use crate::extract::PathError;

pub use compile::{compile_conditions, CompileError};
pub use operators::{apply_operator, value_contains, value_exists, OperatorError};

/// Comparison operator of a [`Condition`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    Equals,
    NotEquals,
    In,
    NotIn,
    Contains,
    GreaterThan,
    LessThan,
    Exists,
}

impl Operator {
    /// Config-facing spelling, matching the serde representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Equals => "equals",
            Operator::NotEquals => "notEquals",
            Operator::In => "in",
            Operator::NotIn => "notIn",
            Operator::Contains => "contains",
            Operator::GreaterThan => "greaterThan",
            Operator::LessThan => "lessThan",
            Operator::Exists => "exists",
        }
    }
}

/// Single-operator predicate over a context field.
///
/// `value` is the expected operand; `exists` ignores it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Field path into the evaluation context (dot path or `{...}` query).
    pub field: String,
    /// Comparison operator.
    pub operator: Operator,
    /// Expected operand; absent for `exists`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl Condition {
    /// Builds a condition with an operand.
    pub fn new(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value: Some(value),
        }
    }

    /// Builds an `exists` condition (no operand).
    pub fn exists(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            operator: Operator::Exists,
            value: None,
        }
    }
}

/// Recorded result of one condition.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConditionOutcome {
    /// Position of the condition in its rule set.
    pub index: usize,
    /// Field path as written.
    pub field: String,
    /// Operator applied.
    pub operator: Operator,
    /// Whether the condition held.
    pub matched: bool,
    /// Operator-level failure, if one occurred.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate result of evaluating an ordered condition list (implicit AND).
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CriteriaOutcome {
    /// True iff every condition matched. Empty lists are true.
    pub matched: bool,
    /// Per-condition records in evaluation order.
    pub outcomes: Vec<ConditionOutcome>,
    /// Index of the first non-matching condition, when any.
    pub first_failure: Option<usize>,
}

/// Evaluates `conditions` against `ctx` with AND semantics.
///
/// Every condition is evaluated and recorded even after a failure, so skip
/// decisions can be reported with the full picture. Only malformed field
/// paths abort with an error.
pub fn evaluate_conditions(
    ctx: &EvaluationContext,
    conditions: &[Condition],
) -> Result<CriteriaOutcome, PathError> {
    let mut outcomes = Vec::with_capacity(conditions.len());
    let mut first_failure = None;

    for (index, condition) in conditions.iter().enumerate() {
        let field = ctx.extract(&condition.field)?;
        let expected = condition.value.clone().unwrap_or(Value::Null);
        let (matched, error) = match apply_operator(condition.operator, &field.value, &expected) {
            Ok(matched) => (matched, None),
            Err(err) => (false, Some(err.to_string())),
        };
        if !matched && first_failure.is_none() {
            first_failure = Some(index);
        }
        outcomes.push(ConditionOutcome {
            index,
            field: condition.field.clone(),
            operator: condition.operator,
            matched,
            error,
        });
    }

    Ok(CriteriaOutcome {
        matched: first_failure.is_none(),
        outcomes,
        first_failure,
    })
}
