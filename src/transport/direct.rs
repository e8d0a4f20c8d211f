//! Direct API-server transport.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::{
    ApplyOptions, DiscoveryCriteria, Transport, TransportApplyResult, TransportContext,
    TransportError,
};
use crate::generation::{self, decide, ApplyOperation};
use crate::httpclient::{RequestOptions, RetryingClient};

/// Transport that translates apply/get/discover into API-server verbs.
/// Carries no extra routing information: the API server is a single sink.
#[derive(Clone, Debug)]
pub struct DirectApiTransport {
    client: RetryingClient,
    api_version: String,
}

impl DirectApiTransport {
    #[must_use]
    pub fn new(client: RetryingClient) -> Self {
        Self {
            client,
            api_version: "v1".to_string(),
        }
    }

    #[must_use]
    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    fn collection(&self, kind: &str, namespace: Option<&str>) -> String {
        let kind = kind.to_lowercase();
        match namespace {
            Some(ns) => format!("/apis/{}/namespaces/{ns}/{kind}", self.api_version),
            None => format!("/apis/{}/{kind}", self.api_version),
        }
    }

    fn item(&self, kind: &str, namespace: Option<&str>, name: &str) -> String {
        format!("{}/{name}", self.collection(kind, namespace))
    }

    fn options(&self, target: &TransportContext) -> RequestOptions {
        let mut opts = RequestOptions::new();
        if let Some(trace) = target.trace {
            opts = opts.with_trace(trace);
        }
        if let Some(cancel) = &target.cancel {
            opts = opts.with_cancellation(cancel.clone());
        }
        opts
    }
}

#[async_trait]
impl Transport for DirectApiTransport {
    async fn apply(
        &self,
        manifest: &[u8],
        options: &ApplyOptions,
        target: &TransportContext,
    ) -> Result<TransportApplyResult, TransportError> {
        let manifest: Value = serde_json::from_slice(manifest)?;
        let new_generation = generation::generation_of(&manifest)?;

        let kind = manifest
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or("resources")
            .to_string();
        let namespace = manifest
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .map(str::to_string);
        let name = options
            .name
            .clone()
            .unwrap_or_else(|| generation::manifest_name(&manifest));

        let existing = match self
            .get(&kind, namespace.as_deref(), &name, target)
            .await
        {
            Ok(found) => Some(found),
            Err(TransportError::NotFound) => None,
            Err(other) => return Err(other),
        };

        let decision = decide(
            new_generation,
            existing
                .as_ref()
                .map(|obj| generation::generation_of(obj).unwrap_or(0)),
        );
        debug!(kind, name, operation = %decision.operation, reason = %decision.reason, "api apply decision");

        let object = match decision.operation {
            ApplyOperation::Create => {
                let response = self
                    .client
                    .post(
                        &self.collection(&kind, namespace.as_deref()),
                        self.options(target).with_json(manifest.clone()),
                    )
                    .await
                    .map_err(TransportError::from_api)?;
                response.json_value().unwrap_or(manifest)
            }
            ApplyOperation::Skip => existing.unwrap_or(manifest),
            ApplyOperation::Update => {
                let patch = json!({
                    "metadata": {
                        "labels": manifest.pointer("/metadata/labels").cloned().unwrap_or(Value::Null),
                        "annotations": manifest.pointer("/metadata/annotations").cloned().unwrap_or(Value::Null),
                    },
                    "spec": manifest.get("spec").cloned().unwrap_or(Value::Null),
                });
                let response = self
                    .client
                    .patch(
                        &self.item(&kind, namespace.as_deref(), &name),
                        self.options(target)
                            .with_header("Content-Type", "application/merge-patch+json")
                            .with_json(patch),
                    )
                    .await
                    .map_err(TransportError::from_api)?;
                response.json_value().unwrap_or(manifest)
            }
        };

        Ok(TransportApplyResult {
            operation: decision.operation,
            reason: decision.reason,
            object,
        })
    }

    async fn get(
        &self,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
        target: &TransportContext,
    ) -> Result<Value, TransportError> {
        let response = self
            .client
            .get(&self.item(kind, namespace, name), self.options(target))
            .await
            .map_err(TransportError::from_api)?;
        Ok(response.json_value().unwrap_or(Value::Null))
    }

    async fn discover(
        &self,
        kind: &str,
        criteria: &DiscoveryCriteria,
        target: &TransportContext,
    ) -> Result<Vec<Value>, TransportError> {
        let mut opts = self.options(target);
        if let Some(namespace) = &criteria.namespace {
            opts = opts.with_query("namespace", namespace);
        }
        if let Some(name) = &criteria.name {
            opts = opts.with_query("name", name);
        }
        if !criteria.label_selector.is_empty() {
            let mut pairs: Vec<String> = criteria
                .label_selector
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            pairs.sort();
            opts = opts.with_query("labelSelector", pairs.join(","));
        }

        let response = self
            .client
            .get(&self.collection(kind, None), opts)
            .await
            .map_err(TransportError::from_api)?;
        let body = response.json_value().unwrap_or(Value::Null);
        let items = match body.get("items") {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        // Server-side filtering is advisory; enforce the criteria locally
        // so both backends behave identically.
        Ok(items
            .into_iter()
            .filter(|item| criteria.matches(item))
            .collect())
    }
}
