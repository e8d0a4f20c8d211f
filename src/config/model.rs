//! Serde model for adapter YAML. The engine consumes exactly this subset;
//! anything else in the file is rejected by `deny_unknown_fields` so typos
//! fail at load instead of silently disabling a rule.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::criteria::Condition;

/// Raw adapter document as it appears on disk. Validated and indexed into
/// [`super::Adapter`] by the loader.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct AdapterDoc {
    pub name: String,
    #[serde(default)]
    pub event_type_prefix: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub rules: Vec<RuleSet>,
    #[serde(default)]
    pub captures: Vec<CaptureSet>,
    #[serde(default)]
    pub templates: Vec<TemplateSpec>,
    #[serde(default)]
    pub enrich: Option<EnrichSpec>,
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
}

/// Multi-document file: a list of adapters under one key.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ConfigDoc {
    pub adapters: Vec<AdapterDoc>,
}

/// A named rule set: ordered conditions (implicit AND) *or* one expression.
/// Declaring both is a load-time error; declaring neither means "always
/// true".
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RuleSet {
    pub name: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub expression: Option<String>,
}

/// A named list of captures, referenced from tasks.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CaptureSet {
    pub name: String,
    pub items: Vec<Capture>,
}

/// One capture: extract a value (by field path *or* expression, exactly one)
/// and store it back into the evaluation context under `name`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Capture {
    pub name: String,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub expression: Option<String>,
    /// Fallback when the source yields nothing.
    #[serde(default)]
    pub default: Option<Value>,
}

/// A named resource blueprint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TemplateSpec {
    pub name: String,
    /// Target kind, opaque to the engine.
    pub kind: String,
    /// Manifest tree with `${variable}` placeholders in string positions.
    pub manifest: Value,
}

/// Optional fleet-state enrichment: fetch the cluster named by the context
/// variable at `cluster_ref` and inject it under `key`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EnrichSpec {
    pub cluster_ref: String,
    #[serde(default = "default_enrich_key")]
    pub key: String,
}

fn default_enrich_key() -> String {
    "cluster".to_string()
}

/// A unit of work: preconditions gate it, captures feed it, templates are
/// rendered and applied through the target transport, postconditions are
/// evaluated and reported.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TaskSpec {
    pub name: String,
    #[serde(default)]
    pub preconditions: Vec<String>,
    #[serde(default)]
    pub captures: Vec<String>,
    #[serde(default)]
    pub templates: Vec<String>,
    #[serde(default)]
    pub postconditions: Vec<String>,
    pub target: TargetSpec,
}

/// Where a task's rendered manifests go.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TargetSpec {
    pub transport: TransportKind,
    /// Context variable holding the consumer cluster id. Required for the
    /// shipper transport.
    #[serde(default)]
    pub cluster_ref: Option<String>,
}

/// Transport backend selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Direct API-server transport.
    Api,
    /// Workload-shipper transport (bundles per consumer cluster).
    Shipper,
}
