//! Compilation of condition lists into a single expression.
//!
//! Rule sets may be declared as conditions or as one expression; compiling
//! conditions to the expression language gives both declarations a uniform
//! execution path. The compiled form is the AND of one parenthesized term
//! per condition, in declaration order.

use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

use super::{Condition, Operator};
use crate::extract::{PathError, PathQuery, Step};

/// Failure to express a condition list in the expression language.
#[derive(Clone, Debug, Error, Diagnostic, PartialEq)]
pub enum CompileError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Path(#[from] PathError),

    /// Wildcards, ranges, and filters have no expression-language
    /// counterpart; such paths stay on the condition evaluator.
    #[error("path {path:?} uses selectors that cannot compile to an expression")]
    #[diagnostic(code(hyperfleet::criteria::uncompilable_path))]
    UnsupportedPath { path: String },

    /// The operator requires an operand the condition did not provide.
    #[error("operator {operator} requires a value")]
    #[diagnostic(code(hyperfleet::criteria::missing_operand))]
    MissingOperand { operator: &'static str },
}

/// Compiles `conditions` to one expression string. An empty list compiles
/// to `true`.
pub fn compile_conditions(conditions: &[Condition]) -> Result<String, CompileError> {
    if conditions.is_empty() {
        return Ok("true".to_string());
    }
    let terms = conditions
        .iter()
        .map(compile_condition)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(terms.join(" && "))
}

fn compile_condition(condition: &Condition) -> Result<String, CompileError> {
    let reference = member_reference(&condition.field)?;
    let operand = || -> Result<&Value, CompileError> {
        condition
            .value
            .as_ref()
            .ok_or(CompileError::MissingOperand {
                operator: condition.operator.as_str(),
            })
    };

    let term = match condition.operator {
        Operator::Equals => format!("({reference} == {})", literal(operand()?)),
        Operator::NotEquals => format!("({reference} != {})", literal(operand()?)),
        Operator::In => format!("({reference} in {})", literal(operand()?)),
        Operator::NotIn => format!("(!({reference} in {}))", literal(operand()?)),
        Operator::Contains => {
            let value = operand()?;
            match value {
                // Substring semantics only exist as a string method; other
                // operands fall back to membership.
                Value::String(_) => format!("({reference}.contains({}))", literal(value)),
                _ => format!("({} in {reference})", literal(value)),
            }
        }
        Operator::GreaterThan => format!("({reference} > {})", literal(operand()?)),
        Operator::LessThan => format!("({reference} < {})", literal(operand()?)),
        Operator::Exists => {
            if reference.contains('.') {
                format!("(has({reference}))")
            } else {
                // Top-level variables cannot take has(); spell out the
                // non-null and non-empty check instead.
                format!(
                    "({reference} != null && {reference} != '' && {reference} != [] && {reference} != {{}})"
                )
            }
        }
    };
    Ok(term)
}

// A path is expressible only when it is a plain chain of child accesses.
fn member_reference(path: &str) -> Result<String, CompileError> {
    let query = PathQuery::parse(path)?;
    let mut parts = Vec::with_capacity(query.steps().len());
    for step in query.steps() {
        match step {
            Step::Child(name) => parts.push(name.clone()),
            _ => {
                return Err(CompileError::UnsupportedPath {
                    path: path.to_string(),
                })
            }
        }
    }
    Ok(parts.join("."))
}

fn literal(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote(s),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(literal).collect();
            format!("[{}]", inner.join(", "))
        }
        Value::Object(map) => {
            let inner: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", quote(k), literal(v)))
                .collect();
            format!("{{{}}}", inner.join(", "))
        }
    }
}

fn quote(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}'")
}
