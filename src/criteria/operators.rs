//! Pure operator functions over tagged JSON values.
//!
//! Every operator branches on the value's tag, never on a host type, so the
//! same semantics apply to event payloads, captures, and template inputs.

use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

use super::Operator;
use crate::extract::value_kind;

/// Operator-level failure. These are runtime-band: they fail the condition
/// that raised them without aborting rule-set evaluation.
#[derive(Clone, Debug, Error, Diagnostic, PartialEq, Eq)]
pub enum OperatorError {
    /// `in`/`notIn` require a sequence operand.
    #[error("operator {operator} requires a sequence operand, got {found}")]
    #[diagnostic(code(hyperfleet::criteria::sequence_operand))]
    SequenceOperand {
        operator: &'static str,
        found: &'static str,
    },

    /// `contains` over incompatible operand types.
    #[error("contains is undefined for {haystack} / {needle}")]
    #[diagnostic(code(hyperfleet::criteria::contains_types))]
    ContainsTypes {
        haystack: &'static str,
        needle: &'static str,
    },

    /// Numeric comparison over a non-numeric operand.
    #[error("operator {operator} requires numeric operands, got {found}")]
    #[diagnostic(code(hyperfleet::criteria::non_numeric))]
    NonNumeric {
        operator: &'static str,
        found: &'static str,
    },
}

/// Applies `operator` to `(field, expected)`.
pub fn apply_operator(
    operator: Operator,
    field: &Value,
    expected: &Value,
) -> Result<bool, OperatorError> {
    match operator {
        Operator::Equals => Ok(deep_equal(field, expected)),
        Operator::NotEquals => Ok(!deep_equal(field, expected)),
        Operator::In => member_of(field, expected, "in"),
        Operator::NotIn => member_of(field, expected, "notIn").map(|m| !m),
        Operator::Contains => value_contains(field, expected),
        Operator::GreaterThan => compare(field, expected, "greaterThan").map(|o| o > 0.0),
        Operator::LessThan => compare(field, expected, "lessThan").map(|o| o < 0.0),
        Operator::Exists => Ok(value_exists(field)),
    }
}

/// Structural deep equality with numeric coercion, so `5` equals `5.0` and
/// `null == null` holds while `null == non-null` does not.
#[must_use]
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| deep_equal(x, y))
        }
        (Value::Object(xm), Value::Object(ym)) => {
            xm.len() == ym.len()
                && xm
                    .iter()
                    .all(|(k, v)| ym.get(k).is_some_and(|w| deep_equal(v, w)))
        }
        _ => a == b,
    }
}

fn member_of(field: &Value, expected: &Value, operator: &'static str) -> Result<bool, OperatorError> {
    match expected {
        Value::Array(items) => Ok(items.iter().any(|item| deep_equal(field, item))),
        other => Err(OperatorError::SequenceOperand {
            operator,
            found: value_kind(other),
        }),
    }
}

/// `contains`, dispatched on the haystack's tag:
/// string → substring, sequence → element equality, mapping → key presence.
pub fn value_contains(haystack: &Value, needle: &Value) -> Result<bool, OperatorError> {
    match (haystack, needle) {
        (Value::String(h), Value::String(n)) => Ok(h.contains(n.as_str())),
        (Value::Array(items), n) => Ok(items.iter().any(|item| deep_equal(item, n))),
        (Value::Object(map), Value::String(key)) => Ok(map.contains_key(key)),
        (h, n) => Err(OperatorError::ContainsTypes {
            haystack: value_kind(h),
            needle: value_kind(n),
        }),
    }
}

fn compare(field: &Value, expected: &Value, operator: &'static str) -> Result<f64, OperatorError> {
    let left = as_numeric(field).ok_or(OperatorError::NonNumeric {
        operator,
        found: value_kind(field),
    })?;
    let right = as_numeric(expected).ok_or(OperatorError::NonNumeric {
        operator,
        found: value_kind(expected),
    })?;
    Ok(left - right)
}

fn as_numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// `exists`: non-null and not the empty form of its tag. Empty strings,
/// sequences, and mappings do not exist; `false` and `0` do.
#[must_use]
pub fn value_exists(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}
