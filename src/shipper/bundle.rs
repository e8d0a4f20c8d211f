//! Bundle envelope: one consumer-addressed unit of manifests.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::generation::GENERATION_ANNOTATION;

/// Kind string of the bundle envelope itself.
pub const BUNDLE_KIND: &str = "Bundle";

/// Object metadata carried by a bundle envelope.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "FxHashMap::is_empty")]
    pub labels: FxHashMap<String, String>,
    #[serde(default, skip_serializing_if = "FxHashMap::is_empty")]
    pub annotations: FxHashMap<String, String>,
}

/// Bundle payload: the manifests to deliver to the consumer cluster.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleSpec {
    #[serde(default)]
    pub manifests: Vec<Value>,
}

/// A workload-shipper envelope addressed to one consumer cluster.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: BundleSpec,
}

fn default_api_version() -> String {
    "work.hyperfleet.io/v1".to_string()
}

fn default_kind() -> String {
    BUNDLE_KIND.to_string()
}

impl Bundle {
    /// Wraps manifests into a named bundle, carrying the generation
    /// annotation.
    #[must_use]
    pub fn new(name: impl Into<String>, generation: i64, manifests: Vec<Value>) -> Self {
        let mut annotations = FxHashMap::default();
        annotations.insert(GENERATION_ANNOTATION.to_string(), generation.to_string());
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata: ObjectMeta {
                name: name.into(),
                annotations,
                ..ObjectMeta::default()
            },
            spec: BundleSpec { manifests },
        }
    }

    /// Parses a bundle from its JSON form.
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.clone())
    }

    /// Serializes to the JSON form the store traffics in.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
