//! W3C trace-context identifiers.
//!
//! One representation serves both jobs: correlation fields on per-event
//! logging spans, and `traceparent` injection on outgoing HTTP requests.
//! Events that arrive carrying a `traceparent` extension keep their trace;
//! everything else starts a fresh one.

use serde::Serialize;
use std::fmt;

/// Header name for W3C trace propagation.
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// A trace/span id pair in W3C trace-context form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TraceContext {
    trace_id: u128,
    span_id: u64,
}

impl TraceContext {
    /// Starts a fresh trace with random non-zero ids.
    #[must_use]
    pub fn new() -> Self {
        Self {
            trace_id: rand::random::<u128>() | 1,
            span_id: rand::random::<u64>() | 1,
        }
    }

    /// Derives a child span within the same trace.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: rand::random::<u64>() | 1,
        }
    }

    /// Parses a `traceparent` header value (`00-<trace>-<span>-<flags>`).
    #[must_use]
    pub fn parse(header: &str) -> Option<Self> {
        let mut parts = header.trim().split('-');
        let version = parts.next()?;
        if version != "00" {
            return None;
        }
        let trace_id = u128::from_str_radix(parts.next()?, 16).ok()?;
        let span_id = u64::from_str_radix(parts.next()?, 16).ok()?;
        parts.next()?;
        if trace_id == 0 || span_id == 0 {
            return None;
        }
        Some(Self { trace_id, span_id })
    }

    /// Renders the `traceparent` header value for this context, sampled.
    #[must_use]
    pub fn traceparent(&self) -> String {
        format!("00-{:032x}-{:016x}-01", self.trace_id, self.span_id)
    }

    /// Lowercase hex trace id (32 chars).
    #[must_use]
    pub fn trace_id_hex(&self) -> String {
        format!("{:032x}", self.trace_id)
    }

    /// Lowercase hex span id (16 chars).
    #[must_use]
    pub fn span_id_hex(&self) -> String {
        format!("{:016x}", self.span_id)
    }
}

impl Default for TraceContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.trace_id_hex(), self.span_id_hex())
    }
}
