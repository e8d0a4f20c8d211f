//! Retryable HTTP client shared by the fleet API and transport backends.
//!
//! Wraps a long-lived `reqwest::Client` with:
//!
//! - bounded retries on transport errors and on 408/429/5xx responses
//!   (2xx/3xx/other-4xx never retry),
//! - pluggable backoff (exponential, linear, constant) with ±10% jitter
//!   clamped to a maximum delay,
//! - cancellation checks before each attempt and during backoff sleeps,
//! - a per-attempt tracing span with W3C `traceparent` header injection,
//! - default `User-Agent` and `Content-Type: application/json` handling,
//! - a typed [`ApiError`] carrying method, URL, status, body, attempt count
//!   and elapsed duration.
//!
//! Clients are cheap to clone and safe to share across tasks.

mod backoff;
mod error;

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, Instrument};

use crate::trace::{TraceContext, TRACEPARENT_HEADER};

pub use backoff::BackoffStrategy;
pub use error::{find_api_error, retryable_status, ApiError};
pub use reqwest::Method;

/// Client-level configuration. Per-request overrides are applied through
/// [`RequestOptions`].
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base URL every request path is joined onto.
    pub base_url: String,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Total attempts; values below 1 are normalized to 1.
    pub retry_attempts: u32,
    pub backoff: BackoffStrategy,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Headers applied to every request (per-request headers win).
    pub default_headers: Vec<(String, String)>,
    /// Overrides the derived `User-Agent` when set.
    pub user_agent: Option<String>,
}

impl ClientConfig {
    /// Sensible defaults for `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(30),
            retry_attempts: 3,
            backoff: BackoffStrategy::Exponential,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            default_headers: Vec::new(),
            user_agent: None,
        }
    }
}

/// Per-request overrides, built with option-style methods.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    headers: Vec<(String, String)>,
    query: Vec<(String, String)>,
    body: Option<Value>,
    timeout: Option<Duration>,
    retry_attempts: Option<u32>,
    cancel: Option<CancellationToken>,
    trace: Option<TraceContext>,
}

impl RequestOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = Some(attempts);
        self
    }

    /// Attach the per-event cancellation token; checked before every attempt
    /// and while sleeping between attempts.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Propagate an existing trace; a fresh one is started otherwise.
    #[must_use]
    pub fn with_trace(mut self, trace: TraceContext) -> Self {
        self.trace = Some(trace);
        self
    }
}

/// Response of a successful (2xx) call.
#[derive(Clone, Debug)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ApiResponse {
    /// Deserializes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Body as a JSON value, `Null` when empty.
    pub fn json_value(&self) -> Result<Value, serde_json::Error> {
        if self.body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&self.body)
    }
}

/// Failure to construct a client. Startup-time only.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum ClientBuildError {
    #[error("failed to build HTTP client: {0}")]
    #[diagnostic(code(hyperfleet::http::build))]
    Build(#[from] reqwest::Error),
}

/// Long-lived retrying HTTP client.
#[derive(Clone, Debug)]
pub struct RetryingClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl RetryingClient {
    /// Builds a client from `config`. The underlying connection pool is
    /// shared by all clones.
    pub fn new(config: ClientConfig) -> Result<Self, ClientBuildError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self { http, config })
    }

    /// The configuration this client was built with.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn get(&self, path: &str, opts: RequestOptions) -> Result<ApiResponse, ApiError> {
        self.request(Method::GET, path, opts).await
    }

    pub async fn post(&self, path: &str, opts: RequestOptions) -> Result<ApiResponse, ApiError> {
        self.request(Method::POST, path, opts).await
    }

    pub async fn put(&self, path: &str, opts: RequestOptions) -> Result<ApiResponse, ApiError> {
        self.request(Method::PUT, path, opts).await
    }

    pub async fn patch(&self, path: &str, opts: RequestOptions) -> Result<ApiResponse, ApiError> {
        self.request(Method::PATCH, path, opts).await
    }

    pub async fn delete(&self, path: &str, opts: RequestOptions) -> Result<ApiResponse, ApiError> {
        self.request(Method::DELETE, path, opts).await
    }

    /// Performs a request with retry, backoff, cancellation, and tracing.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        opts: RequestOptions,
    ) -> Result<ApiResponse, ApiError> {
        let url = join_url(&self.config.base_url, path);
        let attempts = opts.retry_attempts.unwrap_or(self.config.retry_attempts).max(1);
        let timeout = opts.timeout.unwrap_or(self.config.timeout);
        let trace = opts.trace.unwrap_or_default();
        let started = Instant::now();

        for attempt in 1..=attempts {
            if let Some(cancel) = &opts.cancel {
                if cancel.is_cancelled() {
                    return Err(ApiError::cancelled(
                        method.as_str(),
                        &url,
                        attempt - 1,
                        started.elapsed(),
                    ));
                }
            }

            let span = info_span!(
                "http_request",
                http.method = %method,
                url = %url,
                attempt,
                trace_id = %trace.trace_id_hex(),
            );
            let outcome = self
                .attempt(&method, &url, &opts, timeout, &trace)
                .instrument(span)
                .await;
            metrics::counter!("hyperfleet_http_attempts_total", "method" => method.to_string())
                .increment(1);

            match outcome {
                Ok(response) if response.status().is_success() => {
                    let status = response.status().as_u16();
                    let body = response.bytes().await.map_err(|err| {
                        ApiError::from_transport(
                            method.as_str(),
                            &url,
                            err,
                            attempt,
                            started.elapsed(),
                        )
                    })?;
                    return Ok(ApiResponse {
                        status,
                        body: body.to_vec(),
                    });
                }
                Ok(response) => {
                    let status = response.status();
                    if retryable_status(status.as_u16()) && attempt < attempts {
                        debug!(status = status.as_u16(), attempt, "retrying on status");
                    } else {
                        let body = response.text().await.unwrap_or_default();
                        return Err(ApiError::from_status(
                            method.as_str(),
                            &url,
                            status,
                            body,
                            attempt,
                            started.elapsed(),
                        ));
                    }
                }
                Err(err) => {
                    if attempt >= attempts {
                        return Err(ApiError::from_transport(
                            method.as_str(),
                            &url,
                            err,
                            attempt,
                            started.elapsed(),
                        ));
                    }
                    debug!(error = %err, attempt, "retrying on transport error");
                }
            }

            let delay =
                self.config
                    .backoff
                    .jittered_delay(self.config.base_delay, self.config.max_delay, attempt);
            if let Some(cancel) = &opts.cancel {
                tokio::select! {
                    () = cancel.cancelled() => {
                        return Err(ApiError::cancelled(
                            method.as_str(),
                            &url,
                            attempt,
                            started.elapsed(),
                        ));
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            } else {
                tokio::time::sleep(delay).await;
            }
        }

        // Unreachable: the loop always returns on its last attempt.
        Err(ApiError::cancelled(
            method.as_str(),
            &url,
            attempts,
            started.elapsed(),
        ))
    }

    async fn attempt(
        &self,
        method: &Method,
        url: &str,
        opts: &RequestOptions,
        timeout: Duration,
        trace: &TraceContext,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let mut builder = self.http.request(method.clone(), url).timeout(timeout);

        let mut has_user_agent = false;
        let mut has_content_type = false;
        for (name, value) in self
            .config
            .default_headers
            .iter()
            .chain(opts.headers.iter())
        {
            if name.eq_ignore_ascii_case("user-agent") {
                has_user_agent = true;
            }
            if name.eq_ignore_ascii_case("content-type") {
                has_content_type = true;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !has_user_agent {
            let agent = self
                .config
                .user_agent
                .clone()
                .unwrap_or_else(default_user_agent);
            builder = builder.header("User-Agent", agent);
        }
        if opts.body.is_some() && !has_content_type {
            builder = builder.header("Content-Type", "application/json");
        }
        // A fresh span id per attempt, within the caller's trace.
        builder = builder.header(TRACEPARENT_HEADER, trace.child().traceparent());

        if !opts.query.is_empty() {
            builder = builder.query(&opts.query);
        }
        if let Some(body) = &opts.body {
            builder = builder.body(serde_json::to_vec(body).unwrap_or_default());
        }

        builder.send().await
    }
}

/// `User-Agent` derived from the crate version; overridable per client.
#[must_use]
pub fn default_user_agent() -> String {
    format!("hyperfleet-adapter/{}", env!("CARGO_PKG_VERSION"))
}

fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}
