//! Rich API error type with status-code classification.

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

/// Failure of an HTTP call after all retries were spent (or the call was
/// cancelled / rejected outright).
///
/// Carries enough context to be logged once and classified by the caller
/// without re-parsing anything: method, URL, final status, response body,
/// attempt count, and total elapsed time.
#[derive(Debug)]
pub struct ApiError {
    /// HTTP method of the failed call.
    pub method: String,
    /// Full request URL.
    pub url: String,
    /// Final response status, when a response was received.
    pub status_code: Option<u16>,
    /// Canonical reason phrase of the final status.
    pub status: Option<String>,
    /// Response body of the final attempt, when one was read.
    pub body: Option<String>,
    /// Number of attempts performed.
    pub attempts: u32,
    /// Total elapsed time across attempts and backoff sleeps.
    pub duration: Duration,
    /// Underlying transport error, when the failure was not status-shaped.
    pub inner: Option<Box<dyn StdError + Send + Sync>>,
    pub(crate) timed_out: bool,
    pub(crate) cancelled: bool,
}

impl ApiError {
    pub(crate) fn from_status(
        method: &str,
        url: &str,
        status: reqwest::StatusCode,
        body: String,
        attempts: u32,
        duration: Duration,
    ) -> Self {
        Self {
            method: method.to_string(),
            url: url.to_string(),
            status_code: Some(status.as_u16()),
            status: status.canonical_reason().map(str::to_string),
            body: Some(body),
            attempts,
            duration,
            inner: None,
            timed_out: status == reqwest::StatusCode::REQUEST_TIMEOUT,
            cancelled: false,
        }
    }

    pub(crate) fn from_transport(
        method: &str,
        url: &str,
        inner: reqwest::Error,
        attempts: u32,
        duration: Duration,
    ) -> Self {
        let timed_out = inner.is_timeout();
        Self {
            method: method.to_string(),
            url: url.to_string(),
            status_code: None,
            status: None,
            body: None,
            attempts,
            duration,
            inner: Some(Box::new(inner)),
            timed_out,
            cancelled: false,
        }
    }

    pub(crate) fn cancelled(method: &str, url: &str, attempts: u32, duration: Duration) -> Self {
        Self {
            method: method.to_string(),
            url: url.to_string(),
            status_code: None,
            status: None,
            body: None,
            attempts,
            duration,
            inner: None,
            timed_out: false,
            cancelled: true,
        }
    }

    /// True for attempt timeouts and `408 Request Timeout` responses.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.timed_out
    }

    /// True when the call was abandoned because its context was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status_code.is_some_and(|s| (500..600).contains(&s))
    }

    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.status_code.is_some_and(|s| (400..500).contains(&s))
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.status_code == Some(404)
    }

    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        self.status_code == Some(401)
    }

    #[must_use]
    pub fn is_forbidden(&self) -> bool {
        self.status_code == Some(403)
    }

    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        self.status_code == Some(429)
    }

    #[must_use]
    pub fn is_bad_request(&self) -> bool {
        self.status_code == Some(400)
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        self.status_code == Some(409)
    }

    /// True when retrying this error can help: transport failures,
    /// timeouts, 408/429, and 5xx.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self.status_code {
            Some(code) => retryable_status(code),
            None => !self.cancelled,
        }
    }
}

/// Retry policy over status codes: 408, 429, and all 5xx.
#[must_use]
pub fn retryable_status(code: u16) -> bool {
    code == 408 || code == 429 || (500..600).contains(&code)
}

/// Walks an error's source chain looking for an [`ApiError`].
#[must_use]
pub fn find_api_error<'a>(
    err: &'a (dyn StdError + 'static),
) -> Option<&'a ApiError> {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(api) = e.downcast_ref::<ApiError>() {
            return Some(api);
        }
        current = e.source();
    }
    None
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} failed after {} attempt(s) in {:?}",
            self.method, self.url, self.attempts, self.duration
        )?;
        if self.cancelled {
            return write!(f, ": cancelled");
        }
        if let Some(code) = self.status_code {
            write!(f, ": status {code}")?;
            if let Some(reason) = &self.status {
                write!(f, " {reason}")?;
            }
        } else if let Some(inner) = &self.inner {
            write!(f, ": {inner}")?;
        }
        Ok(())
    }
}

impl StdError for ApiError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}
