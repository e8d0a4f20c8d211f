//! Safe field extraction over untyped JSON trees.
//!
//! Adapter configs address event data with either a bare dot path
//! (`status.phase`) or a delimited path expression
//! (`{.spec.nodes[*].name}`) supporting child access, indexing, wildcards,
//! ranges, and filter predicates.
//!
//! Errors come in two bands and never mix:
//!
//! - **Parse errors** ([`PathError`]) mean the path itself is malformed - a
//!   config bug, reported eagerly.
//! - **Runtime absence** (missing key, null parent, empty filter result) is
//!   *not* an error: it yields a [`FieldResult`] holding `Null`, so callers
//!   can apply capture defaults without catching control-flow errors.
//!   Structural misuse (indexing a scalar, filtering a map) is recorded in
//!   [`FieldResult::error`] instead of aborting the walk.
//!
//! A result of exactly one element is unwrapped; multiple matches become an
//! ordered JSON array.
//!
//! # Examples
//!
//! ```rust
//! use hyperfleet_adapter::extract::extract_value;
//! use serde_json::json;
//!
//! let tree = json!({
//!     "cluster": {"phase": "Ready"},
//!     "pools": [{"name": "a", "size": 3}, {"name": "b", "size": 5}],
//! });
//!
//! // Dot path
//! let got = extract_value(&tree, "cluster.phase").unwrap();
//! assert_eq!(got.value, json!("Ready"));
//!
//! // Wildcard fan-out
//! let got = extract_value(&tree, "{.pools[*].name}").unwrap();
//! assert_eq!(got.value, json!(["a", "b"]));
//!
//! // Filter predicate
//! let got = extract_value(&tree, "{.pools[?(@.name=='b')].size}").unwrap();
//! assert_eq!(got.value, json!(5));
//!
//! // Absence is not an error
//! let got = extract_value(&tree, "cluster.region").unwrap();
//! assert!(got.value.is_null());
//! assert!(got.error.is_none());
//! ```

mod parser;

use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

pub use parser::{FilterOp, FilterPred, PathQuery, Step};

/// Outcome of resolving a parsed path against a tree.
///
/// `value` is `Null` when nothing matched. `error` carries a structural
/// misuse encountered during the walk (e.g. indexing a string); absence
/// alone never sets it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldResult {
    /// Extracted value; `Null` when the path matched nothing.
    pub value: Value,
    /// Structural misuse encountered while walking, if any.
    pub error: Option<ExtractFailure>,
}

impl FieldResult {
    /// True when the path matched nothing and no misuse occurred.
    #[must_use]
    pub fn is_missing(&self) -> bool {
        self.value.is_null() && self.error.is_none()
    }

    /// Returns the extracted value, or `fallback` when nothing matched.
    #[must_use]
    pub fn value_or(self, fallback: Value) -> Value {
        if self.value.is_null() {
            fallback
        } else {
            self.value
        }
    }
}

/// Structural misuse during a path walk. Distinct from [`PathError`]: the
/// path parsed fine, but the tree shape did not admit the requested step.
#[derive(Clone, Debug, Error, Diagnostic, PartialEq, Eq)]
pub enum ExtractFailure {
    /// An index or range step hit a non-sequence value.
    #[error("cannot index into {found}")]
    #[diagnostic(code(hyperfleet::extract::not_indexable))]
    NotIndexable { found: &'static str },

    /// A filter step hit a non-sequence value.
    #[error("cannot filter {found}")]
    #[diagnostic(code(hyperfleet::extract::not_filterable))]
    NotFilterable { found: &'static str },

    /// A wildcard step hit a scalar.
    #[error("cannot expand wildcard over {found}")]
    #[diagnostic(code(hyperfleet::extract::not_expandable))]
    NotExpandable { found: &'static str },
}

/// Malformed path syntax. Always a configuration bug; surfaced eagerly at
/// load time and never converted into a runtime `Null`.
#[derive(Clone, Debug, Error, Diagnostic, PartialEq, Eq)]
pub enum PathError {
    #[error("empty field path")]
    #[diagnostic(
        code(hyperfleet::extract::empty_path),
        help("Conditions and captures require a non-empty field path.")
    )]
    Empty,

    #[error("unclosed path expression: {path}")]
    #[diagnostic(
        code(hyperfleet::extract::delimiter),
        help("Path expressions must be wrapped in balanced '{{' and '}}'.")
    )]
    Delimiter { path: String },

    #[error("unexpected token at offset {pos}: expected '.' or '[', found {found:?}")]
    #[diagnostic(code(hyperfleet::extract::step))]
    Step { pos: usize, found: char },

    #[error("empty child segment at offset {pos}")]
    #[diagnostic(code(hyperfleet::extract::empty_segment))]
    EmptySegment { pos: usize },

    #[error("unterminated selector starting at offset {pos}")]
    #[diagnostic(code(hyperfleet::extract::selector))]
    UnterminatedSelector { pos: usize },

    #[error("invalid index {token:?} at offset {pos}")]
    #[diagnostic(code(hyperfleet::extract::index))]
    Index { pos: usize, token: String },

    #[error("invalid range {token:?} at offset {pos}")]
    #[diagnostic(code(hyperfleet::extract::range))]
    Range { pos: usize, token: String },

    #[error("invalid filter at offset {pos}: {message}")]
    #[diagnostic(code(hyperfleet::extract::filter))]
    Filter { pos: usize, message: String },
}

/// Parses `path` and resolves it against `tree`.
///
/// Parse failures return `Err`; see [`FieldResult`] for the runtime
/// semantics of the `Ok` branch.
pub fn extract_value(tree: &Value, path: &str) -> Result<FieldResult, PathError> {
    Ok(PathQuery::parse(path)?.resolve(tree))
}

pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

impl PathQuery {
    /// Resolves this query against `tree`.
    #[must_use]
    pub fn resolve(&self, tree: &Value) -> FieldResult {
        let mut current: Vec<&Value> = vec![tree];
        let mut failure: Option<ExtractFailure> = None;

        for step in self.steps() {
            let mut next: Vec<&Value> = Vec::new();
            for node in &current {
                match step {
                    Step::Child(name) => {
                        if let Value::Object(map) = node {
                            if let Some(v) = map.get(name.as_str()) {
                                next.push(v);
                            }
                        }
                        // Null or scalar parent: absence, keep walking others.
                    }
                    Step::Index(i) => match node {
                        Value::Array(items) => {
                            if let Some(v) = items.get(*i) {
                                next.push(v);
                            }
                        }
                        Value::Null => {}
                        other => {
                            failure.get_or_insert(ExtractFailure::NotIndexable {
                                found: value_kind(other),
                            });
                        }
                    },
                    Step::Range(from, to) => match node {
                        Value::Array(items) => {
                            let lo = from.unwrap_or(0).min(items.len());
                            let hi = to.unwrap_or(items.len()).min(items.len());
                            if lo < hi {
                                next.extend(items[lo..hi].iter());
                            }
                        }
                        Value::Null => {}
                        other => {
                            failure.get_or_insert(ExtractFailure::NotIndexable {
                                found: value_kind(other),
                            });
                        }
                    },
                    Step::Wildcard => match node {
                        Value::Array(items) => next.extend(items.iter()),
                        Value::Object(map) => next.extend(map.values()),
                        Value::Null => {}
                        other => {
                            failure.get_or_insert(ExtractFailure::NotExpandable {
                                found: value_kind(other),
                            });
                        }
                    },
                    Step::Filter(pred) => match node {
                        Value::Array(items) => {
                            next.extend(items.iter().filter(|item| pred.matches(item)));
                        }
                        Value::Null => {}
                        other => {
                            failure.get_or_insert(ExtractFailure::NotFilterable {
                                found: value_kind(other),
                            });
                        }
                    },
                }
            }
            current = next;
            if current.is_empty() {
                break;
            }
        }

        let value = match current.len() {
            0 => Value::Null,
            1 => current[0].clone(),
            _ => Value::Array(current.into_iter().cloned().collect()),
        };
        FieldResult {
            value,
            error: failure,
        }
    }
}
