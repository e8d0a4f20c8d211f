//! Expression evaluation over the evaluation context.
//!
//! Rule sets and captures may use a general expression language (CEL) in
//! place of condition lists: literals, member access, indexing, arithmetic,
//! comparisons, boolean logic, `in`, `has(...)`, list/map construction, and
//! the built-in `contains`/`size` predicates.
//!
//! # Caching & invalidation
//!
//! Compiling an expression is much more expensive than running it, so a
//! [`CachedEvaluator`] keeps one compiled program per expression text and
//! one set of variable bindings per context *version*. When the context's
//! version moves (a capture stored a new variable), the bindings are rebuilt
//! lazily on the next evaluation - newly added variables resolve without
//! "undeclared reference" errors, and untouched contexts pay nothing.
//!
//! # Evaluation modes
//!
//! - **Strict** ([`CachedEvaluator::evaluate_strict`]): parse *and* runtime
//!   errors surface as [`ExprError`].
//! - **Safe** ([`CachedEvaluator::evaluate_safe`]): parse errors still
//!   surface (they are config bugs), but runtime errors - missing key, null
//!   access, type mismatch - are captured on the returned [`SafeOutcome`]
//!   with a machine-readable [`EvalReason`], leaving policy to the caller.

mod convert;

use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::context::EvaluationContext;
use crate::criteria::value_exists;

pub(crate) use convert::{cel_type_name, cel_to_json, json_to_cel};

/// Why an evaluation failed, as a short machine-readable tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalReason {
    FieldNotFound,
    NullAccess,
    TypeMismatch,
    ParseFailure,
    Other,
}

impl fmt::Display for EvalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            EvalReason::FieldNotFound => "field not found",
            EvalReason::NullAccess => "null value access",
            EvalReason::TypeMismatch => "type mismatch",
            EvalReason::ParseFailure => "parse error",
            EvalReason::Other => "evaluation error",
        };
        f.write_str(tag)
    }
}

/// Expression failure surfaced as an error (parse band always; runtime band
/// only in strict mode).
#[derive(Clone, Debug, Error, Diagnostic)]
pub enum ExprError {
    #[error("failed to parse expression {expression:?}: {message}")]
    #[diagnostic(
        code(hyperfleet::expr::parse),
        help("Expressions are validated at config load; fix the adapter config.")
    )]
    Parse { expression: String, message: String },

    #[error("expression {expression:?} failed: {message}")]
    #[diagnostic(code(hyperfleet::expr::execution))]
    Execution {
        expression: String,
        reason: EvalReason,
        message: String,
    },
}

impl ExprError {
    /// Reason tag for this failure.
    #[must_use]
    pub fn reason(&self) -> EvalReason {
        match self {
            ExprError::Parse { .. } => EvalReason::ParseFailure,
            ExprError::Execution { reason, .. } => *reason,
        }
    }
}

/// Safe-mode evaluation result.
#[derive(Clone, Debug, Serialize)]
pub struct SafeOutcome {
    /// Evaluated value (`Null` on runtime failure).
    pub value: Value,
    /// Boolean truth of the result: its own value for booleans, otherwise
    /// "present and non-empty".
    pub matched: bool,
    /// Type tag of the evaluated value.
    pub value_type: String,
    /// The expression as evaluated.
    pub expression: String,
    /// Runtime error message, when the evaluation failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Machine-readable failure tag, when the evaluation failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<EvalReason>,
}

struct Bindings {
    version: u64,
    vars: Vec<(String, cel::Value)>,
}

/// Expression evaluator bound to one [`EvaluationContext`].
///
/// Cheap to clone the handle it wraps; the evaluator itself is kept per
/// event and shared behind the orchestrator.
pub struct CachedEvaluator {
    ctx: EvaluationContext,
    programs: Mutex<FxHashMap<String, Arc<cel::Program>>>,
    bindings: Mutex<Option<Arc<Bindings>>>,
}

impl CachedEvaluator {
    /// Creates an evaluator over `ctx`. Nothing is compiled until the first
    /// evaluation.
    #[must_use]
    pub fn new(ctx: EvaluationContext) -> Self {
        Self {
            ctx,
            programs: Mutex::new(FxHashMap::default()),
            bindings: Mutex::new(None),
        }
    }

    /// The context this evaluator reads from.
    #[must_use]
    pub fn context(&self) -> &EvaluationContext {
        &self.ctx
    }

    /// Strict evaluation: every failure is an error.
    pub fn evaluate_strict(&self, expression: &str) -> Result<Value, ExprError> {
        let program = self.program(expression)?;
        let bindings = self.current_bindings();
        let result = run(&program, &bindings).map_err(|err| ExprError::Execution {
            expression: expression.to_string(),
            reason: classify(&err),
            message: err,
        })?;
        Ok(cel_to_json(&result))
    }

    /// Safe evaluation: parse errors are errors, runtime errors land on the
    /// outcome.
    pub fn evaluate_safe(&self, expression: &str) -> Result<SafeOutcome, ExprError> {
        let program = self.program(expression)?;
        let bindings = self.current_bindings();
        match run(&program, &bindings) {
            Ok(result) => {
                let value = cel_to_json(&result);
                let matched = match &result {
                    cel::Value::Bool(b) => *b,
                    _ => value_exists(&value),
                };
                Ok(SafeOutcome {
                    matched,
                    value_type: cel_type_name(&result).to_string(),
                    value,
                    expression: expression.to_string(),
                    error: None,
                    reason: None,
                })
            }
            Err(message) => Ok(SafeOutcome {
                value: Value::Null,
                matched: false,
                value_type: "null".to_string(),
                expression: expression.to_string(),
                reason: Some(classify(&message)),
                error: Some(message),
            }),
        }
    }

    /// Evaluates a rule-set predicate: the result must be boolean-true for a
    /// match. Non-boolean results follow the `matched` convention.
    pub fn matches(&self, expression: &str) -> Result<bool, ExprError> {
        Ok(self.evaluate_safe(expression)?.matched)
    }

    fn program(&self, expression: &str) -> Result<Arc<cel::Program>, ExprError> {
        let mut programs = self.programs.lock();
        if let Some(found) = programs.get(expression) {
            return Ok(Arc::clone(found));
        }
        let compiled = cel::Program::compile(expression).map_err(|err| ExprError::Parse {
            expression: expression.to_string(),
            message: err.to_string(),
        })?;
        let program = Arc::new(compiled);
        programs.insert(expression.to_string(), Arc::clone(&program));
        Ok(program)
    }

    // Rebuild variable bindings iff the context version moved since the last
    // evaluation. This is what makes late-registered captures visible.
    fn current_bindings(&self) -> Arc<Bindings> {
        let version = self.ctx.version();
        let mut guard = self.bindings.lock();
        if let Some(bound) = guard.as_ref() {
            if bound.version == version {
                return Arc::clone(bound);
            }
        }
        let vars = self
            .ctx
            .snapshot()
            .into_iter()
            .map(|(name, value)| (name, json_to_cel(&value)))
            .collect();
        let rebuilt = Arc::new(Bindings { version, vars });
        *guard = Some(Arc::clone(&rebuilt));
        rebuilt
    }
}

fn run(program: &cel::Program, bindings: &Bindings) -> Result<cel::Value, String> {
    let mut context = cel::Context::default();
    for (name, value) in &bindings.vars {
        context.add_variable_from_value(name.clone(), value.clone());
    }
    program.execute(&context).map_err(|err| err.to_string())
}

// The engine classifies runtime failures by message shape; the underlying
// error type is version-sensitive while its messages are stable.
fn classify(message: &str) -> EvalReason {
    let lower = message.to_lowercase();
    if lower.contains("no such key") || lower.contains("undeclared reference") {
        EvalReason::FieldNotFound
    } else if lower.contains("null") {
        EvalReason::NullAccess
    } else if lower.contains("unexpected type")
        || lower.contains("not comparable")
        || lower.contains("unsupported")
    {
        EvalReason::TypeMismatch
    } else {
        EvalReason::Other
    }
}
