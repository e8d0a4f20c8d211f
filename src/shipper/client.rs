//! Bundle client: generation-gated apply and in-bundle discovery.

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use super::{BundleStore, ShipperError, BUNDLE_KIND};
use crate::generation::{self, decide, ApplyOperation};
use crate::transport::DiscoveryCriteria;

/// Result of a bundle apply.
#[derive(Clone, Debug)]
pub struct ApplyReport {
    /// The bundle as the shipper now sees it.
    pub object: Value,
    pub operation: ApplyOperation,
    pub reason: String,
}

/// Client over a [`BundleStore`], owning the engine-side semantics:
/// generation validation, apply decisions, skip-without-write, merge-patch
/// updates, and discovery inside bundles.
#[derive(Clone)]
pub struct BundleClient {
    store: Arc<dyn BundleStore>,
}

impl BundleClient {
    #[must_use]
    pub fn new(store: Arc<dyn BundleStore>) -> Self {
        Self { store }
    }

    /// Creates a bundle outright. Most callers want [`apply`](Self::apply).
    pub async fn create(&self, consumer: &str, bundle: &Value) -> Result<Value, ShipperError> {
        validate_generations(bundle)?;
        self.store.create(consumer, bundle).await
    }

    pub async fn get(&self, consumer: &str, name: &str) -> Result<Value, ShipperError> {
        self.store.get(consumer, name).await
    }

    pub async fn patch(
        &self,
        consumer: &str,
        name: &str,
        patch: &Value,
    ) -> Result<Value, ShipperError> {
        self.store.patch(consumer, name, patch).await
    }

    pub async fn delete(&self, consumer: &str, name: &str) -> Result<(), ShipperError> {
        self.store.delete(consumer, name).await
    }

    pub async fn list(&self, consumer: &str) -> Result<Vec<Value>, ShipperError> {
        self.store.list(consumer).await
    }

    /// Applies a bundle idempotently.
    ///
    /// 1. Validate generation annotations (envelope and every embedded
    ///    manifest) - fatal, nothing is written on failure.
    /// 2. Fetch the existing bundle; absent → create.
    /// 3. Equal generations → skip, returning the existing object
    ///    unchanged.
    /// 4. Different generations (either direction) → merge-patch of
    ///    metadata labels/annotations and spec.
    pub async fn apply(&self, consumer: &str, bundle: &Value) -> Result<ApplyReport, ShipperError> {
        let new_generation = validate_generations(bundle)?;
        let name = generation::manifest_name(bundle);
        if name.is_empty() {
            return Err(ShipperError::UnnamedBundle);
        }

        let existing = match self.store.get(consumer, &name).await {
            Ok(found) => Some(found),
            Err(ShipperError::NotFound) => None,
            Err(other) => return Err(other),
        };

        let decision = decide(
            new_generation,
            existing
                .as_ref()
                // An existing object with a broken annotation is treated as
                // generation 0 so the next apply repairs it.
                .map(|obj| generation::generation_of(obj).unwrap_or(0)),
        );
        debug!(
            consumer,
            bundle = %name,
            operation = %decision.operation,
            reason = %decision.reason,
            "bundle apply decision"
        );

        let object = match decision.operation {
            ApplyOperation::Create => self.store.create(consumer, bundle).await?,
            ApplyOperation::Skip => existing.unwrap_or_else(|| bundle.clone()),
            ApplyOperation::Update => {
                let patch = json!({
                    "metadata": {
                        "labels": bundle.pointer("/metadata/labels").cloned().unwrap_or(Value::Null),
                        "annotations": bundle.pointer("/metadata/annotations").cloned().unwrap_or(Value::Null),
                    },
                    "spec": bundle.get("spec").cloned().unwrap_or(Value::Null),
                });
                self.store.patch(consumer, &name, &patch).await?
            }
        };

        Ok(ApplyReport {
            object,
            operation: decision.operation,
            reason: decision.reason,
        })
    }

    /// Searches inside a consumer's bundles.
    ///
    /// When `kind` is the bundle envelope type itself, matching runs over
    /// the envelopes; otherwise every embedded manifest of the requested
    /// kind is matched against `criteria`.
    pub async fn discover_in_bundle(
        &self,
        consumer: &str,
        kind: &str,
        criteria: &DiscoveryCriteria,
    ) -> Result<Vec<Value>, ShipperError> {
        let bundles = self.store.list(consumer).await?;
        if kind == BUNDLE_KIND {
            return Ok(bundles
                .into_iter()
                .filter(|bundle| criteria.matches(bundle))
                .collect());
        }

        let mut found = Vec::new();
        for bundle in &bundles {
            let Some(manifests) = bundle.pointer("/spec/manifests").and_then(Value::as_array)
            else {
                continue;
            };
            for manifest in manifests {
                let manifest_kind = manifest.get("kind").and_then(Value::as_str).unwrap_or("");
                if manifest_kind == kind && criteria.matches(manifest) {
                    found.push(manifest.clone());
                }
            }
        }
        Ok(found)
    }
}

// Bundle-level annotation plus every embedded manifest must validate before
// anything touches the wire.
fn validate_generations(bundle: &Value) -> Result<i64, ShipperError> {
    let bundle_generation = generation::generation_of(bundle)?;
    if let Some(manifests) = bundle.pointer("/spec/manifests").and_then(Value::as_array) {
        for manifest in manifests {
            generation::generation_of(manifest)?;
        }
    }
    Ok(bundle_generation)
}
