//! Manifest rendering from the evaluation context.
//!
//! Templates are manifest trees with `${variable}` placeholders in string
//! positions - substitution is by named context variable, never positional.
//! A placeholder that is the *entire* string splices the variable's typed
//! value into the tree; placeholders embedded in longer strings interpolate
//! textually.
//!
//! After substitution the renderer stamps the generation annotation (taken
//! from the context's `generation` variable) on the top-level object and on
//! every nested manifest, then validates that every stamped value is a
//! positive integer. A template that renders without a valid generation is
//! a config bug and fails the render; nothing is ever applied unstamped.

use miette::Diagnostic;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::TemplateSpec;
use crate::context::EvaluationContext;
use crate::extract::PathError;
use crate::generation::{self, GenerationError, GENERATION_ANNOTATION};

/// Context variable the renderer reads the generation from.
pub const GENERATION_VARIABLE: &str = "generation";

/// Rendering failure. All variants are config/template bugs, never retried.
#[derive(Debug, Error, Diagnostic)]
pub enum TemplateError {
    #[error("template {template:?} references unset variable {variable:?}")]
    #[diagnostic(
        code(hyperfleet::template::missing_variable),
        help("Capture the variable (with a default if needed) before rendering.")
    )]
    MissingVariable { template: String, variable: String },

    #[error("template {template:?} has a malformed placeholder")]
    #[diagnostic(code(hyperfleet::template::placeholder))]
    Placeholder {
        template: String,
        #[source]
        source: PathError,
    },

    #[error("context variable {GENERATION_VARIABLE:?} is missing or not a positive integer")]
    #[diagnostic(
        code(hyperfleet::template::generation_unavailable),
        help("The upstream event must supply the generation for this entity version.")
    )]
    GenerationUnavailable,

    #[error(transparent)]
    #[diagnostic(transparent)]
    Generation(#[from] GenerationError),

    #[error("failed to serialize rendered manifest: {0}")]
    #[diagnostic(code(hyperfleet::template::serialize))]
    Serialize(#[from] serde_json::Error),
}

/// Structural summary of a rendered manifest, for logging and status
/// reporting.
#[derive(Clone, Debug, serde::Serialize)]
pub struct RenderSummary {
    pub kind: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub generation: i64,
    pub size_bytes: usize,
    pub nested_manifests: usize,
}

/// A fully rendered, generation-stamped manifest ready for transport apply.
#[derive(Clone, Debug)]
pub struct RenderedManifest {
    /// Template this came from.
    pub template: String,
    /// Target kind, opaque to the engine.
    pub kind: String,
    /// Rendered tree.
    pub manifest: Value,
    /// JSON bytes of the rendered tree.
    pub bytes: Vec<u8>,
    /// Structural summary.
    pub summary: RenderSummary,
}

/// Renders `template` against `ctx`.
pub fn render(
    template: &TemplateSpec,
    ctx: &EvaluationContext,
) -> Result<RenderedManifest, TemplateError> {
    let mut manifest = substitute(&template.manifest, template, ctx)?;

    let generation = context_generation(ctx)?;
    stamp(&mut manifest, generation);
    let mut nested = 0usize;
    if let Some(Value::Array(items)) = manifest.pointer_mut("/spec/manifests") {
        nested = items.len();
        for item in items {
            stamp(item, generation);
        }
    }

    // Validate after stamping: guards manifests whose shape kept the stamp
    // from landing (non-object metadata and the like).
    let generation = generation::generation_of(&manifest)?;
    if let Some(Value::Array(items)) = manifest.pointer("/spec/manifests") {
        for item in items {
            generation::generation_of(item)?;
        }
    }

    let bytes = serde_json::to_vec(&manifest)?;
    let summary = RenderSummary {
        kind: template.kind.clone(),
        name: generation::manifest_name(&manifest),
        namespace: manifest
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .map(str::to_string),
        generation,
        size_bytes: bytes.len(),
        nested_manifests: nested,
    };

    Ok(RenderedManifest {
        template: template.name.clone(),
        kind: template.kind.clone(),
        manifest,
        bytes,
        summary,
    })
}

fn context_generation(ctx: &EvaluationContext) -> Result<i64, TemplateError> {
    let (value, found) = ctx.get(GENERATION_VARIABLE);
    if !found {
        return Err(TemplateError::GenerationUnavailable);
    }
    let generation = match &value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
    .ok_or(TemplateError::GenerationUnavailable)?;
    if generation < 1 {
        return Err(TemplateError::GenerationUnavailable);
    }
    Ok(generation)
}

// Annotations are stamped as strings, matching how annotation maps travel
// on the wire.
fn stamp(manifest: &mut Value, generation: i64) {
    let Value::Object(root) = manifest else {
        return;
    };
    let metadata = root
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(meta) = metadata {
        let annotations = meta
            .entry("annotations")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(ann) = annotations {
            ann.insert(
                GENERATION_ANNOTATION.to_string(),
                Value::String(generation.to_string()),
            );
        }
    }
}

fn substitute(
    node: &Value,
    template: &TemplateSpec,
    ctx: &EvaluationContext,
) -> Result<Value, TemplateError> {
    match node {
        Value::String(s) => substitute_string(s, template, ctx),
        Value::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|item| substitute(item, template, ctx))
                .collect::<Result<_, _>>()?,
        )),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), substitute(v, template, ctx)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn substitute_string(
    raw: &str,
    template: &TemplateSpec,
    ctx: &EvaluationContext,
) -> Result<Value, TemplateError> {
    // Whole-string placeholder: splice the typed value.
    if let Some(variable) = sole_placeholder(raw) {
        let value = lookup(variable, template, ctx)?;
        return Ok(value);
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated placeholder: leave the text as written.
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let variable = after[..end].trim();
        let value = lookup(variable, template, ctx)?;
        out.push_str(&stringify(&value)?);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(Value::String(out))
}

fn sole_placeholder(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    let inner = trimmed.strip_prefix("${")?.strip_suffix('}')?;
    if inner.contains("${") {
        return None;
    }
    Some(inner.trim())
}

fn lookup(
    variable: &str,
    template: &TemplateSpec,
    ctx: &EvaluationContext,
) -> Result<Value, TemplateError> {
    let result = ctx
        .extract(variable)
        .map_err(|source| TemplateError::Placeholder {
            template: template.name.clone(),
            source,
        })?;
    if result.value.is_null() {
        return Err(TemplateError::MissingVariable {
            template: template.name.clone(),
            variable: variable.to_string(),
        });
    }
    Ok(result.value)
}

fn stringify(value: &Value) -> Result<String, TemplateError> {
    Ok(match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => serde_json::to_string(other)?,
    })
}
