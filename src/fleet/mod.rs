//! HyperFleet API client: cluster state for enrichment, status reporting
//! back from the orchestrator.
//!
//! All calls ride the retrying client, so fleet outages follow the engine's
//! single retry policy and surface as [`ApiError`] with full context.

use serde_json::Value;

use crate::httpclient::{ApiError, ClientConfig, ClientBuildError, RequestOptions, RetryingClient};
use crate::settings::FleetSettings;

/// Typed client for the fleet management API.
#[derive(Clone, Debug)]
pub struct FleetClient {
    client: RetryingClient,
    api_version: String,
}

impl FleetClient {
    /// Wraps an already-built retrying client.
    #[must_use]
    pub fn new(client: RetryingClient, api_version: impl Into<String>) -> Self {
        Self {
            client,
            api_version: api_version.into(),
        }
    }

    /// Builds a client from fleet settings (base URL, API version,
    /// auth header, user agent).
    pub fn from_settings(settings: &FleetSettings) -> Result<Self, ClientBuildError> {
        let mut config = ClientConfig::new(settings.base_url.clone());
        config.user_agent = settings.user_agent.clone();
        if let Some(token) = &settings.token {
            config
                .default_headers
                .push(("Authorization".to_string(), format!("Bearer {token}")));
        }
        Ok(Self::new(
            RetryingClient::new(config)?,
            settings.api_version.clone(),
        ))
    }

    /// The underlying retrying client, shared with transports that target
    /// the same API.
    #[must_use]
    pub fn http(&self) -> &RetryingClient {
        &self.client
    }

    fn path(&self, suffix: &str) -> String {
        format!("/api/hyperfleet/{}/{}", self.api_version, suffix.trim_start_matches('/'))
    }

    /// Fetches one cluster by id, for context enrichment.
    pub async fn get_cluster(
        &self,
        cluster_id: &str,
        opts: RequestOptions,
    ) -> Result<Value, ApiError> {
        let response = self
            .client
            .get(&self.path(&format!("clusters/{cluster_id}")), opts)
            .await?;
        Ok(response.json_value().unwrap_or(Value::Null))
    }

    /// Posts a structured status payload to a caller-provided endpoint.
    pub async fn post_status(
        &self,
        endpoint: &str,
        payload: &Value,
        opts: RequestOptions,
    ) -> Result<(), ApiError> {
        self.client
            .post(&self.path(endpoint), opts.with_json(payload.clone()))
            .await?;
        Ok(())
    }

    /// Replaces a status document at a caller-provided endpoint.
    pub async fn put_status(
        &self,
        endpoint: &str,
        payload: &Value,
        opts: RequestOptions,
    ) -> Result<(), ApiError> {
        self.client
            .put(&self.path(endpoint), opts.with_json(payload.clone()))
            .await?;
        Ok(())
    }
}
