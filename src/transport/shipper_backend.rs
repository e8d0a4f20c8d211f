//! Workload-shipper transport backend.

use async_trait::async_trait;
use serde_json::Value;

use super::{
    ApplyOptions, DiscoveryCriteria, Transport, TransportApplyResult, TransportContext,
    TransportError,
};
use crate::shipper::{BundleClient, ShipperError, BUNDLE_KIND};

/// Transport that wraps manifests into consumer-addressed bundles.
///
/// Every call requires a non-empty consumer cluster in the transport
/// context; not-found maps onto the canonical sentinel so callers never
/// branch on the backend.
#[derive(Clone)]
pub struct ShipperTransport {
    client: BundleClient,
}

impl ShipperTransport {
    #[must_use]
    pub fn new(client: BundleClient) -> Self {
        Self { client }
    }

    fn consumer<'a>(target: &'a TransportContext) -> Result<&'a str, TransportError> {
        match target.consumer.as_deref() {
            Some(consumer) if !consumer.trim().is_empty() => Ok(consumer),
            _ => Err(TransportError::MissingConsumer),
        }
    }
}

fn from_shipper(err: ShipperError) -> TransportError {
    match err {
        ShipperError::NotFound => TransportError::NotFound,
        ShipperError::Validation(inner) => TransportError::Validation(inner),
        ShipperError::Decode(inner) => TransportError::ManifestShape(inner),
        ShipperError::Api(inner) => TransportError::Api(inner),
        ShipperError::Dial(message) => TransportError::Dial(message),
        ShipperError::UnnamedBundle => TransportError::Dial(err.to_string()),
    }
}

#[async_trait]
impl Transport for ShipperTransport {
    async fn apply(
        &self,
        manifest: &[u8],
        _options: &ApplyOptions,
        target: &TransportContext,
    ) -> Result<TransportApplyResult, TransportError> {
        let consumer = Self::consumer(target)?;
        let bundle: Value = serde_json::from_slice(manifest)?;
        let report = self
            .client
            .apply(consumer, &bundle)
            .await
            .map_err(from_shipper)?;
        Ok(TransportApplyResult {
            operation: report.operation,
            reason: report.reason,
            object: report.object,
        })
    }

    async fn get(
        &self,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
        target: &TransportContext,
    ) -> Result<Value, TransportError> {
        let consumer = Self::consumer(target)?;
        if kind == BUNDLE_KIND {
            return self
                .client
                .get(consumer, name)
                .await
                .map_err(from_shipper);
        }
        let criteria = DiscoveryCriteria {
            namespace: namespace.map(str::to_string),
            name: Some(name.to_string()),
            ..DiscoveryCriteria::default()
        };
        let found = self
            .client
            .discover_in_bundle(consumer, kind, &criteria)
            .await
            .map_err(from_shipper)?;
        found.into_iter().next().ok_or(TransportError::NotFound)
    }

    async fn discover(
        &self,
        kind: &str,
        criteria: &DiscoveryCriteria,
        target: &TransportContext,
    ) -> Result<Vec<Value>, TransportError> {
        let consumer = Self::consumer(target)?;
        self.client
            .discover_in_bundle(consumer, kind, criteria)
            .await
            .map_err(from_shipper)
    }
}
