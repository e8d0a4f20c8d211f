//! Wire seam for bundle CRUD.
//!
//! [`BundleStore`] is the boundary behind which the shipper's own protocol
//! lives; the engine never sees past it. The HTTP implementation talks to
//! the shipper's control-plane peer through the retrying client. The
//! in-memory implementation backs tests and local runs.

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::Arc;

use super::ShipperError;
use crate::httpclient::{RequestOptions, RetryingClient};

/// CRUD over bundles, scoped by `(consumer, bundle name)`.
#[async_trait]
pub trait BundleStore: Send + Sync {
    async fn create(&self, consumer: &str, bundle: &Value) -> Result<Value, ShipperError>;
    async fn get(&self, consumer: &str, name: &str) -> Result<Value, ShipperError>;
    async fn patch(&self, consumer: &str, name: &str, patch: &Value) -> Result<Value, ShipperError>;
    async fn delete(&self, consumer: &str, name: &str) -> Result<(), ShipperError>;
    async fn list(&self, consumer: &str) -> Result<Vec<Value>, ShipperError>;
}

/// Bundle CRUD over the shipper's HTTP control-plane peer.
#[derive(Clone, Debug)]
pub struct HttpBundleStore {
    client: RetryingClient,
}

impl HttpBundleStore {
    #[must_use]
    pub fn new(client: RetryingClient) -> Self {
        Self { client }
    }

    fn collection(consumer: &str) -> String {
        format!("/api/hyperfleet-shipper/v1/consumers/{consumer}/bundles")
    }

    fn item(consumer: &str, name: &str) -> String {
        format!("{}/{name}", Self::collection(consumer))
    }
}

#[async_trait]
impl BundleStore for HttpBundleStore {
    async fn create(&self, consumer: &str, bundle: &Value) -> Result<Value, ShipperError> {
        let response = self
            .client
            .post(
                &Self::collection(consumer),
                RequestOptions::new().with_json(bundle.clone()),
            )
            .await
            .map_err(ShipperError::from_api)?;
        Ok(response.json_value()?)
    }

    async fn get(&self, consumer: &str, name: &str) -> Result<Value, ShipperError> {
        let response = self
            .client
            .get(&Self::item(consumer, name), RequestOptions::new())
            .await
            .map_err(ShipperError::from_api)?;
        Ok(response.json_value()?)
    }

    async fn patch(&self, consumer: &str, name: &str, patch: &Value) -> Result<Value, ShipperError> {
        let response = self
            .client
            .patch(
                &Self::item(consumer, name),
                RequestOptions::new()
                    .with_header("Content-Type", "application/merge-patch+json")
                    .with_json(patch.clone()),
            )
            .await
            .map_err(ShipperError::from_api)?;
        Ok(response.json_value()?)
    }

    async fn delete(&self, consumer: &str, name: &str) -> Result<(), ShipperError> {
        self.client
            .delete(&Self::item(consumer, name), RequestOptions::new())
            .await
            .map_err(ShipperError::from_api)?;
        Ok(())
    }

    async fn list(&self, consumer: &str) -> Result<Vec<Value>, ShipperError> {
        let response = self
            .client
            .get(&Self::collection(consumer), RequestOptions::new())
            .await
            .map_err(ShipperError::from_api)?;
        let body = response.json_value()?;
        match body.get("items") {
            Some(Value::Array(items)) => Ok(items.clone()),
            _ => Ok(Vec::new()),
        }
    }
}

/// In-memory bundle store for tests and local runs. Applies merge-patch
/// semantics the same way the control plane does.
#[derive(Clone, Debug, Default)]
pub struct InMemoryBundleStore {
    bundles: Arc<Mutex<FxHashMap<(String, String), Value>>>,
    writes: Arc<Mutex<u64>>,
}

impl InMemoryBundleStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of side-effecting calls (create + patch + delete) observed.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        *self.writes.lock()
    }

    fn key(consumer: &str, name: &str) -> (String, String) {
        (consumer.to_string(), name.to_string())
    }
}

#[async_trait]
impl BundleStore for InMemoryBundleStore {
    async fn create(&self, consumer: &str, bundle: &Value) -> Result<Value, ShipperError> {
        let name = bundle
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .ok_or(ShipperError::UnnamedBundle)?;
        *self.writes.lock() += 1;
        self.bundles
            .lock()
            .insert(Self::key(consumer, name), bundle.clone());
        Ok(bundle.clone())
    }

    async fn get(&self, consumer: &str, name: &str) -> Result<Value, ShipperError> {
        self.bundles
            .lock()
            .get(&Self::key(consumer, name))
            .cloned()
            .ok_or(ShipperError::NotFound)
    }

    async fn patch(&self, consumer: &str, name: &str, patch: &Value) -> Result<Value, ShipperError> {
        let mut bundles = self.bundles.lock();
        let existing = bundles
            .get_mut(&Self::key(consumer, name))
            .ok_or(ShipperError::NotFound)?;
        merge_patch(existing, patch);
        *self.writes.lock() += 1;
        Ok(existing.clone())
    }

    async fn delete(&self, consumer: &str, name: &str) -> Result<(), ShipperError> {
        let removed = self.bundles.lock().remove(&Self::key(consumer, name));
        if removed.is_none() {
            return Err(ShipperError::NotFound);
        }
        *self.writes.lock() += 1;
        Ok(())
    }

    async fn list(&self, consumer: &str) -> Result<Vec<Value>, ShipperError> {
        Ok(self
            .bundles
            .lock()
            .iter()
            .filter(|((c, _), _)| c == consumer)
            .map(|(_, v)| v.clone())
            .collect())
    }
}

// RFC 7386 merge patch: objects merge recursively, null deletes, anything
// else replaces.
fn merge_patch(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(patch_map) => {
            if !target.is_object() {
                *target = Value::Object(serde_json::Map::new());
            }
            let Some(target_map) = target.as_object_mut() else {
                return;
            };
            for (key, patch_value) in patch_map {
                if patch_value.is_null() {
                    target_map.remove(key);
                } else {
                    let slot = target_map.entry(key.clone()).or_insert(Value::Null);
                    merge_patch(slot, patch_value);
                }
            }
        }
        other => *target = other.clone(),
    }
}
