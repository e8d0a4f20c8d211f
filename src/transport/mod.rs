//! Transport abstraction over side-effect sinks.
//!
//! The apply/get/discover interface is the engine's stable seam: any
//! backend that can answer "not found", create, and update-via-merge-patch
//! plugs in. Two backends ship here - the direct API server and the
//! workload shipper - and callers treat them identically because both
//! surface the canonical [`TransportError::NotFound`] sentinel.
//!
//! Backend-specific routing data (the consumer cluster for the shipper)
//! travels in the opaque [`TransportContext`] supplied per call.

mod direct;
mod shipper_backend;

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::generation::{ApplyOperation, GenerationError};
use crate::httpclient::ApiError;
use crate::trace::TraceContext;

pub use direct::DirectApiTransport;
pub use shipper_backend::ShipperTransport;

/// Per-call routing descriptor supplied by the orchestrator.
///
/// The shipper backend requires a non-empty [`consumer`](Self::consumer);
/// the direct backend ignores it. Cancellation and trace context ride along
/// so every backend honors the per-event deadline and correlation.
#[derive(Clone, Debug, Default)]
pub struct TransportContext {
    /// Target cluster identity for consumer-scoped backends.
    pub consumer: Option<String>,
    /// Trace to propagate on outgoing calls.
    pub trace: Option<TraceContext>,
    /// Per-event cancellation token.
    pub cancel: Option<CancellationToken>,
}

impl TransportContext {
    /// Context routed at a consumer cluster.
    #[must_use]
    pub fn for_consumer(consumer: impl Into<String>) -> Self {
        Self {
            consumer: Some(consumer.into()),
            ..Self::default()
        }
    }
}

/// Options for an apply call.
#[derive(Clone, Debug, Default)]
pub struct ApplyOptions {
    /// Overrides the manifest's own name as the addressable object name.
    pub name: Option<String>,
}

/// Result of an apply: what happened and why.
#[derive(Clone, Debug)]
pub struct TransportApplyResult {
    pub operation: ApplyOperation,
    pub reason: String,
    /// The object as the backend now sees it.
    pub object: Value,
}

/// Discovery filter: all present fields must match.
#[derive(Clone, Debug, Default)]
pub struct DiscoveryCriteria {
    pub namespace: Option<String>,
    pub name: Option<String>,
    pub label_selector: FxHashMap<String, String>,
}

impl DiscoveryCriteria {
    /// True when `manifest` satisfies every present filter.
    #[must_use]
    pub fn matches(&self, manifest: &Value) -> bool {
        if let Some(name) = &self.name {
            let got = manifest.pointer("/metadata/name").and_then(Value::as_str);
            if got != Some(name.as_str()) {
                return false;
            }
        }
        if let Some(namespace) = &self.namespace {
            let got = manifest
                .pointer("/metadata/namespace")
                .and_then(Value::as_str);
            if got != Some(namespace.as_str()) {
                return false;
            }
        }
        if !self.label_selector.is_empty() {
            let Some(labels) = manifest
                .pointer("/metadata/labels")
                .and_then(Value::as_object)
            else {
                return false;
            };
            for (key, expected) in &self.label_selector {
                if labels.get(key).and_then(Value::as_str) != Some(expected.as_str()) {
                    return false;
                }
            }
        }
        true
    }
}

/// Transport failure. `NotFound` is canonical across backends.
#[derive(Debug, Error, Diagnostic)]
pub enum TransportError {
    /// Canonical not-found sentinel shared by every backend.
    #[error("resource not found")]
    #[diagnostic(code(hyperfleet::transport::not_found))]
    NotFound,

    /// Invalid or missing generation annotation; config/template bug.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Validation(#[from] GenerationError),

    /// The shipper backend was called without a consumer cluster.
    #[error("shipper transport requires a consumer cluster in the transport context")]
    #[diagnostic(
        code(hyperfleet::transport::missing_consumer),
        help("Set target.clusterRef on the task so the orchestrator can resolve the consumer.")
    )]
    MissingConsumer,

    /// Manifest bytes that did not parse as a JSON object.
    #[error("manifest is not a JSON object: {0}")]
    #[diagnostic(code(hyperfleet::transport::manifest_shape))]
    ManifestShape(#[from] serde_json::Error),

    /// HTTP failure after retries, classified by the caller via predicates.
    #[error("api call failed")]
    #[diagnostic(code(hyperfleet::transport::api))]
    Api(#[source] ApiError),

    /// Wire-level failure from the shipper driver, reported verbatim.
    #[error("shipper transport failure: {0}")]
    #[diagnostic(code(hyperfleet::transport::dial))]
    Dial(String),
}

impl TransportError {
    /// Maps an HTTP failure, preserving the canonical not-found sentinel.
    #[must_use]
    pub fn from_api(err: ApiError) -> Self {
        if err.is_not_found() {
            TransportError::NotFound
        } else {
            TransportError::Api(err)
        }
    }

    /// True when retrying the whole event may help.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Api(err) => err.is_retryable() || err.is_cancelled(),
            TransportError::Dial(_) => true,
            _ => false,
        }
    }
}

/// Uniform sink interface: apply a manifest, fetch an object, discover
/// matching objects.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Applies rendered manifest bytes, generation-gated.
    async fn apply(
        &self,
        manifest: &[u8],
        options: &ApplyOptions,
        target: &TransportContext,
    ) -> Result<TransportApplyResult, TransportError>;

    /// Fetches one object, or the canonical not-found.
    async fn get(
        &self,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
        target: &TransportContext,
    ) -> Result<Value, TransportError>;

    /// Lists objects matching `criteria`.
    async fn discover(
        &self,
        kind: &str,
        criteria: &DiscoveryCriteria,
        target: &TransportContext,
    ) -> Result<Vec<Value>, TransportError>;
}
