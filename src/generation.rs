//! Generation gating: the engine's sole idempotency token.
//!
//! Every managed resource and every manifest inside a bundle carries a
//! `hyperfleet.io/generation` annotation, an integer ≥ 1 assigned upstream
//! per logical entity version. Apply decisions compare generations
//! numerically: equal means skip, unequal means update - including
//! downgrades, which stay allowed so operators can roll back.

use miette::Diagnostic;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Namespaced annotation key stamped on every managed resource.
pub const GENERATION_ANNOTATION: &str = "hyperfleet.io/generation";

/// Side-effect verdict for one resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyOperation {
    Create,
    Update,
    Skip,
}

impl fmt::Display for ApplyOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApplyOperation::Create => "create",
            ApplyOperation::Update => "update",
            ApplyOperation::Skip => "skip",
        };
        f.write_str(s)
    }
}

/// Engine-computed verdict on whether to create, update, or skip.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ApplyDecision {
    pub operation: ApplyOperation,
    pub reason: String,
    pub new_generation: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_generation: Option<i64>,
}

/// Computes the apply decision for a desired generation against what exists.
///
/// `existing` is `None` when the resource was not found.
///
/// ```rust
/// use hyperfleet_adapter::generation::{decide, ApplyOperation};
///
/// assert_eq!(decide(7, None).operation, ApplyOperation::Create);
/// assert_eq!(decide(7, Some(7)).operation, ApplyOperation::Skip);
/// assert_eq!(decide(7, Some(7)).reason, "generation 7 unchanged");
/// // Downgrades update too: rollback support.
/// assert_eq!(decide(3, Some(7)).operation, ApplyOperation::Update);
/// ```
#[must_use]
pub fn decide(new_generation: i64, existing: Option<i64>) -> ApplyDecision {
    match existing {
        None => ApplyDecision {
            operation: ApplyOperation::Create,
            reason: "resource not found".to_string(),
            new_generation,
            existing_generation: None,
        },
        Some(current) if current == new_generation => ApplyDecision {
            operation: ApplyOperation::Skip,
            reason: format!("generation {new_generation} unchanged"),
            new_generation,
            existing_generation: Some(current),
        },
        Some(current) => ApplyDecision {
            operation: ApplyOperation::Update,
            reason: format!("generation {current}→{new_generation}"),
            new_generation,
            existing_generation: Some(current),
        },
    }
}

/// Invalid or absent generation annotation. Always a config/template bug;
/// never a retryable runtime condition.
#[derive(Clone, Debug, Error, Diagnostic, PartialEq, Eq)]
pub enum GenerationError {
    #[error("manifest {name:?} carries no {GENERATION_ANNOTATION} annotation")]
    #[diagnostic(
        code(hyperfleet::generation::missing),
        help("Templates must stamp a generation annotation on every manifest.")
    )]
    Missing { name: String },

    #[error("manifest {name:?} has unparsable generation {raw:?}")]
    #[diagnostic(code(hyperfleet::generation::unparsable))]
    Unparsable { name: String, raw: String },

    #[error("manifest {name:?} has non-positive generation {value}")]
    #[diagnostic(code(hyperfleet::generation::not_positive))]
    NotPositive { name: String, value: i64 },
}

/// Reads and validates the generation annotation of a manifest.
///
/// The annotation value may be a JSON integer or a numeric string; anything
/// else, or a value < 1, fails validation.
pub fn generation_of(manifest: &Value) -> Result<i64, GenerationError> {
    let name = manifest_name(manifest);
    let raw = manifest
        .pointer("/metadata/annotations")
        .and_then(|a| a.get(GENERATION_ANNOTATION))
        .ok_or_else(|| GenerationError::Missing { name: name.clone() })?;

    let value = match raw {
        Value::Number(n) => n.as_i64().ok_or_else(|| GenerationError::Unparsable {
            name: name.clone(),
            raw: n.to_string(),
        })?,
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| GenerationError::Unparsable {
                name: name.clone(),
                raw: s.clone(),
            })?,
        other => {
            return Err(GenerationError::Unparsable {
                name,
                raw: other.to_string(),
            })
        }
    };

    if value < 1 {
        return Err(GenerationError::NotPositive { name, value });
    }
    Ok(value)
}

/// Picks the latest object from a discovery result: highest generation
/// first, ties broken by name ascending for determinism.
#[must_use]
pub fn latest_by_generation(objects: &[Value]) -> Option<&Value> {
    objects.iter().max_by(|a, b| {
        let ga = generation_of(a).unwrap_or(0);
        let gb = generation_of(b).unwrap_or(0);
        // Name comparison is reversed so that max_by prefers the
        // lexicographically smaller name on generation ties.
        ga.cmp(&gb)
            .then_with(|| manifest_name(b).cmp(&manifest_name(a)))
    })
}

/// `metadata.name` of a manifest, or an empty string when absent.
#[must_use]
pub fn manifest_name(manifest: &Value) -> String {
    manifest
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
