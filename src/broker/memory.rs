//! In-process broker driver over bounded flume channels.
//!
//! Used by tests and local runs. Honors the delivery contract exactly:
//! bounded buffering gives backpressure, nack re-enqueues for redelivery,
//! and close stops delivery while letting in-flight events settle.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{AckDecision, BrokerError, CloudEvent, Delivery, Settler, Subscriber};

/// Counters exposed for assertions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BrokerStats {
    pub published: u64,
    pub delivered: u64,
    pub acked: u64,
    pub nacked: u64,
}

/// Bounded in-memory broker.
#[derive(Clone)]
pub struct MemoryBroker {
    tx: flume::Sender<CloudEvent>,
    rx: flume::Receiver<CloudEvent>,
    stats: Arc<Mutex<BrokerStats>>,
}

impl MemoryBroker {
    /// Creates a broker buffering at most `capacity` undelivered events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = flume::bounded(capacity);
        Self {
            tx,
            rx,
            stats: Arc::new(Mutex::new(BrokerStats::default())),
        }
    }

    /// Publishes one event; awaits buffer space when full.
    pub async fn publish(&self, event: CloudEvent) -> Result<(), BrokerError> {
        self.stats.lock().published += 1;
        self.tx
            .send_async(event)
            .await
            .map_err(|err| BrokerError::Driver {
                message: err.to_string(),
            })
    }

    /// Creates a subscriber over this broker's queue.
    #[must_use]
    pub fn subscriber(&self, subscription: impl Into<String>) -> MemorySubscriber {
        MemorySubscriber {
            subscription: subscription.into(),
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            stats: Arc::clone(&self.stats),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Snapshot of the broker counters.
    #[must_use]
    pub fn stats(&self) -> BrokerStats {
        *self.stats.lock()
    }

    /// Number of events waiting for delivery.
    #[must_use]
    pub fn backlog(&self) -> usize {
        self.rx.len()
    }
}

/// Subscriber half of the in-memory broker.
#[derive(Clone)]
pub struct MemorySubscriber {
    subscription: String,
    tx: flume::Sender<CloudEvent>,
    rx: flume::Receiver<CloudEvent>,
    stats: Arc<Mutex<BrokerStats>>,
    closed: Arc<AtomicBool>,
}

struct MemorySettler {
    event: CloudEvent,
    tx: flume::Sender<CloudEvent>,
    stats: Arc<Mutex<BrokerStats>>,
}

#[async_trait]
impl Settler for MemorySettler {
    async fn settle(self: Box<Self>, decision: AckDecision) {
        match decision {
            AckDecision::Ack => {
                self.stats.lock().acked += 1;
            }
            AckDecision::Nack => {
                self.stats.lock().nacked += 1;
                // Redelivery policy of this driver: straight back onto the
                // queue.
                let _ = self.tx.send_async(self.event).await;
            }
        }
    }
}

#[async_trait]
impl Subscriber for MemorySubscriber {
    async fn next(&self) -> Result<Option<Delivery>, BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(None);
        }
        match self.rx.recv_async().await {
            Ok(event) => {
                self.stats.lock().delivered += 1;
                let settler = MemorySettler {
                    event: event.clone(),
                    tx: self.tx.clone(),
                    stats: Arc::clone(&self.stats),
                };
                Ok(Some(Delivery::new(event, Box::new(settler))))
            }
            Err(_) => Ok(None),
        }
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn subscription(&self) -> &str {
        &self.subscription
    }
}
