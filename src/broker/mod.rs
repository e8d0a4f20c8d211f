//! Inbound event model and the broker seam.
//!
//! Concrete pub/sub and message-queue drivers live outside this crate; the
//! engine consumes them through the [`Subscriber`] interface and settles
//! every delivery with exactly one ack or nack. The in-memory driver in
//! [`memory`] backs tests and local runs, and doubles as the reference
//! implementation for the delivery contract.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::settings::BrokerSettings;

/// Content type every event must declare for its payload.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Cloud-event envelope. `id` doubles as the idempotency/correlation key.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloudEvent {
    #[serde(default = "default_specversion")]
    pub specversion: String,
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    pub time: DateTime<Utc>,
    #[serde(default = "default_content_type")]
    pub datacontenttype: String,
    /// Opaque JSON payload; its schema is adapter-specific.
    pub data: Value,
    /// Extension attributes (`traceparent` travels here).
    #[serde(default, skip_serializing_if = "FxHashMap::is_empty")]
    pub extensions: FxHashMap<String, String>,
}

fn default_specversion() -> String {
    "1.0".to_string()
}

fn default_content_type() -> String {
    JSON_CONTENT_TYPE.to_string()
}

impl CloudEvent {
    /// Builds a well-formed event with a fresh id and current timestamp.
    #[must_use]
    pub fn new(event_type: impl Into<String>, source: impl Into<String>, data: Value) -> Self {
        Self {
            specversion: default_specversion(),
            id: uuid::Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            source: source.into(),
            time: Utc::now(),
            datacontenttype: default_content_type(),
            data,
            extensions: FxHashMap::default(),
        }
    }

    /// Checks the required attributes of the envelope.
    pub fn validate(&self) -> Result<(), EventError> {
        for (attribute, value) in [
            ("specversion", &self.specversion),
            ("id", &self.id),
            ("type", &self.event_type),
            ("source", &self.source),
        ] {
            if value.trim().is_empty() {
                return Err(EventError::MissingAttribute { attribute });
            }
        }
        if self.datacontenttype != JSON_CONTENT_TYPE {
            return Err(EventError::ContentType {
                found: self.datacontenttype.clone(),
            });
        }
        Ok(())
    }

    /// `traceparent` extension, when the producer propagated one.
    #[must_use]
    pub fn traceparent(&self) -> Option<&str> {
        self.extensions.get("traceparent").map(String::as_str)
    }
}

/// Malformed inbound event.
#[derive(Clone, Debug, Error, Diagnostic, PartialEq, Eq)]
pub enum EventError {
    #[error("event is missing required attribute {attribute:?}")]
    #[diagnostic(code(hyperfleet::broker::missing_attribute))]
    MissingAttribute { attribute: &'static str },

    #[error("unsupported datacontenttype {found:?}, expected {JSON_CONTENT_TYPE:?}")]
    #[diagnostic(code(hyperfleet::broker::content_type))]
    ContentType { found: String },
}

/// Outcome the handler reports for one delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckDecision {
    /// Processing finished (successfully or fatally); do not redeliver.
    Ack,
    /// Retryable failure; the broker redelivers per its own policy.
    Nack,
}

/// Settles one delivery. Implemented per driver.
#[async_trait]
pub trait Settler: Send {
    async fn settle(self: Box<Self>, decision: AckDecision);
}

/// One in-flight delivery: the event plus its settle callback.
pub struct Delivery {
    pub event: CloudEvent,
    settler: Box<dyn Settler>,
}

impl Delivery {
    /// Packages an event with its driver-side settle callback.
    #[must_use]
    pub fn new(event: CloudEvent, settler: Box<dyn Settler>) -> Self {
        Self { event, settler }
    }

    /// Settles the delivery. Consumes it: exactly one decision per event.
    pub async fn settle(self, decision: AckDecision) {
        self.settler.settle(decision).await;
    }
}

/// Broker-side failure.
#[derive(Clone, Debug, Error, Diagnostic)]
pub enum BrokerError {
    #[error("unknown broker driver {name:?}")]
    #[diagnostic(
        code(hyperfleet::broker::unknown_driver),
        help("External drivers must be registered on the BrokerRegistry before use.")
    )]
    UnknownDriver { name: String },

    #[error("subscription {subscription:?} is closed")]
    #[diagnostic(code(hyperfleet::broker::closed))]
    Closed { subscription: String },

    #[error("broker failure: {message}")]
    #[diagnostic(code(hyperfleet::broker::driver))]
    Driver { message: String },
}

/// Source of deliveries for one subscription.
///
/// `next` resolves with `None` once the subscription is closed and drained.
/// Implementations must tolerate concurrent `next` calls: the worker pool
/// pulls with up to `parallelism` outstanding deliveries.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Waits for the next delivery.
    async fn next(&self) -> Result<Option<Delivery>, BrokerError>;

    /// Stops delivery; in-flight events may still settle.
    async fn close(&self) -> Result<(), BrokerError>;

    /// Subscription name, for correlation fields.
    fn subscription(&self) -> &str;
}

impl std::fmt::Debug for dyn Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("subscription", &self.subscription())
            .finish()
    }
}

type DriverFn =
    Arc<dyn Fn(&BrokerSettings) -> Result<Arc<dyn Subscriber>, BrokerError> + Send + Sync>;

/// Registry of broker drivers, keyed by `BROKER_TYPE`.
///
/// The in-memory driver is always present; real pub/sub and MQ drivers are
/// registered by the embedding process.
#[derive(Clone)]
pub struct BrokerRegistry {
    drivers: FxHashMap<String, DriverFn>,
}

impl Default for BrokerRegistry {
    fn default() -> Self {
        let mut registry = Self {
            drivers: FxHashMap::default(),
        };
        registry.register("memory", |settings| {
            let broker = memory::MemoryBroker::new(64);
            Ok(Arc::new(broker.subscriber(&settings.subscription_id)) as Arc<dyn Subscriber>)
        });
        registry
    }
}

impl BrokerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a driver constructor.
    pub fn register<F>(&mut self, name: impl Into<String>, driver: F)
    where
        F: Fn(&BrokerSettings) -> Result<Arc<dyn Subscriber>, BrokerError> + Send + Sync + 'static,
    {
        self.drivers.insert(name.into(), Arc::new(driver));
    }

    /// Creates a subscriber for the configured driver.
    pub fn create(&self, settings: &BrokerSettings) -> Result<Arc<dyn Subscriber>, BrokerError> {
        let driver = self
            .drivers
            .get(&settings.broker_type)
            .ok_or_else(|| BrokerError::UnknownDriver {
                name: settings.broker_type.clone(),
            })?;
        driver(settings)
    }
}
