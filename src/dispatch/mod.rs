//! Event dispatcher: bounded worker pool between the broker and the
//! orchestrator.
//!
//! Scheduling model: `parallelism` workers (default 1), each pulling one
//! delivery at a time - the pool never pre-fetches beyond its size, which
//! is what backpressures the broker. Every event gets a cancellation token
//! derived from the shutdown root, a deadline, and a correlation span
//! (event id, trace/span ids, subscription, cluster once extracted by the
//! orchestrator).
//!
//! Ack policy: handler success acks, retryable failure nacks, fatal
//! failure acks with error telemetry so poison events cannot wedge the
//! queue. Panics are recovered, logged, and converted to nack.
//!
//! Shutdown: readiness flips to false first, workers stop pulling, in-
//! flight events get a bounded grace period, then the subscriber closes.

use futures_util::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::broker::{AckDecision, BrokerError, BrokerRegistry, Delivery, Subscriber};
use crate::health::HealthState;
use crate::reconcile::Orchestrator;
use crate::settings::BrokerSettings;
use crate::trace::TraceContext;

/// Dispatcher tuning.
#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    /// Worker pool size; also the backpressure bound.
    pub parallelism: usize,
    /// Per-event deadline.
    pub event_timeout: Duration,
    /// How long in-flight events may drain after shutdown starts.
    pub shutdown_grace: Duration,
    /// Bounded retries for subscriber creation.
    pub subscribe_attempts: u32,
    /// Fixed delay between subscribe attempts.
    pub subscribe_delay: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            parallelism: 1,
            event_timeout: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(30),
            subscribe_attempts: 3,
            subscribe_delay: Duration::from_secs(2),
        }
    }
}

/// Counters for one dispatcher run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub processed: u64,
    pub acked: u64,
    pub nacked: u64,
    pub panicked: u64,
    pub timed_out: u64,
}

/// Dispatcher failure: subscribing never succeeded, or shutdown raced it.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum DispatchError {
    #[error("failed to subscribe after {attempts} attempt(s)")]
    #[diagnostic(code(hyperfleet::dispatch::subscribe))]
    Subscribe {
        attempts: u32,
        #[source]
        source: BrokerError,
    },

    #[error("dispatcher cancelled before subscribing")]
    #[diagnostic(code(hyperfleet::dispatch::cancelled))]
    Cancelled,
}

/// Bounded-concurrency event dispatcher.
pub struct Dispatcher {
    orchestrator: Arc<Orchestrator>,
    config: DispatcherConfig,
    health: Option<Arc<HealthState>>,
    stats: Arc<Mutex<DispatchReport>>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>, config: DispatcherConfig) -> Self {
        Self {
            orchestrator,
            config,
            health: None,
            stats: Arc::new(Mutex::new(DispatchReport::default())),
        }
    }

    /// Wires the health surface so readiness tracks the broker check and
    /// the shutdown flag.
    #[must_use]
    pub fn with_health(mut self, health: Arc<HealthState>) -> Self {
        self.health = Some(health);
        self
    }

    /// Counters observed so far.
    #[must_use]
    pub fn report(&self) -> DispatchReport {
        *self.stats.lock()
    }

    /// Runs the pool until `shutdown` fires, then drains within the grace
    /// period and closes the subscriber.
    pub async fn run(
        &self,
        registry: &BrokerRegistry,
        settings: &BrokerSettings,
        shutdown: CancellationToken,
    ) -> Result<DispatchReport, DispatchError> {
        let subscriber = self.subscribe(registry, settings, &shutdown).await?;
        if let Some(health) = &self.health {
            health.set_check("broker", true, None);
        }
        info!(
            subscription = subscriber.subscription(),
            parallelism = self.config.parallelism,
            "dispatcher started"
        );

        let mut workers = JoinSet::new();
        for worker_id in 0..self.config.parallelism.max(1) {
            let worker = Worker {
                orchestrator: Arc::clone(&self.orchestrator),
                subscriber: Arc::clone(&subscriber),
                stats: Arc::clone(&self.stats),
                event_timeout: self.config.event_timeout,
                shutdown: shutdown.clone(),
                worker_id,
            };
            workers.spawn(worker.run());
        }

        shutdown.cancelled().await;
        if let Some(health) = &self.health {
            health.begin_shutdown();
        }
        info!("dispatcher shutting down, draining in-flight events");

        let drain = async {
            while workers.join_next().await.is_some() {}
        };
        if tokio::time::timeout(self.config.shutdown_grace, drain)
            .await
            .is_err()
        {
            warn!(
                grace = ?self.config.shutdown_grace,
                "grace period elapsed, aborting remaining workers"
            );
            workers.abort_all();
            while workers.join_next().await.is_some() {}
        }

        if let Err(err) = subscriber.close().await {
            warn!(error = %err, "subscriber close failed");
        }
        if let Some(health) = &self.health {
            health.set_check("broker", false, Some("closed".to_string()));
        }
        Ok(self.report())
    }

    // Subscriber creation with bounded retries and cancellation-aware
    // sleeps between attempts.
    async fn subscribe(
        &self,
        registry: &BrokerRegistry,
        settings: &BrokerSettings,
        shutdown: &CancellationToken,
    ) -> Result<Arc<dyn Subscriber>, DispatchError> {
        let attempts = self.config.subscribe_attempts.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            if shutdown.is_cancelled() {
                return Err(DispatchError::Cancelled);
            }
            match registry.create(settings) {
                Ok(subscriber) => return Ok(subscriber),
                Err(err) => {
                    warn!(attempt, error = %err, "subscriber creation failed");
                    last_err = Some(err);
                }
            }
            if attempt < attempts {
                tokio::select! {
                    () = shutdown.cancelled() => return Err(DispatchError::Cancelled),
                    () = tokio::time::sleep(self.config.subscribe_delay) => {}
                }
            }
        }
        Err(DispatchError::Subscribe {
            attempts,
            source: last_err.unwrap_or(BrokerError::Driver {
                message: "no attempt was made".to_string(),
            }),
        })
    }
}

struct Worker {
    orchestrator: Arc<Orchestrator>,
    subscriber: Arc<dyn Subscriber>,
    stats: Arc<Mutex<DispatchReport>>,
    event_timeout: Duration,
    shutdown: CancellationToken,
    worker_id: usize,
}

impl Worker {
    async fn run(self) {
        loop {
            let delivery = tokio::select! {
                () = self.shutdown.cancelled() => break,
                next = self.subscriber.next() => match next {
                    Ok(Some(delivery)) => delivery,
                    Ok(None) => break,
                    Err(err) => {
                        warn!(worker = self.worker_id, error = %err, "subscriber receive failed");
                        break;
                    }
                },
            };
            self.handle(delivery).await;
        }
    }

    async fn handle(&self, delivery: Delivery) {
        let event = delivery.event.clone();
        let trace = event
            .traceparent()
            .and_then(TraceContext::parse)
            .map(|parent| parent.child())
            .unwrap_or_default();
        let cancel = self.shutdown.child_token();

        let span = info_span!(
            "event",
            event_id = %event.id,
            trace_id = %trace.trace_id_hex(),
            span_id = %trace.span_id_hex(),
            subscription = self.subscriber.subscription(),
            worker = self.worker_id,
        );

        let orchestrator = Arc::clone(&self.orchestrator);
        let work = AssertUnwindSafe(async { orchestrator.process(&event, &cancel, trace).await })
            .catch_unwind();

        let decision = match tokio::time::timeout(self.event_timeout, work)
            .instrument(span)
            .await
        {
            Err(_elapsed) => {
                cancel.cancel();
                warn!(event_id = %event.id, timeout = ?self.event_timeout, "event deadline exceeded");
                self.stats.lock().timed_out += 1;
                AckDecision::Nack
            }
            Ok(Err(panic)) => {
                error!(
                    event_id = %event.id,
                    panic = %panic_message(&panic),
                    "event handler panicked"
                );
                self.stats.lock().panicked += 1;
                AckDecision::Nack
            }
            Ok(Ok(outcome)) => outcome.ack_decision(),
        };

        {
            let mut stats = self.stats.lock();
            stats.processed += 1;
            match decision {
                AckDecision::Ack => stats.acked += 1,
                AckDecision::Nack => stats.nacked += 1,
            }
        }
        delivery.settle(decision).await;
    }
}

/// Cancels `token` when the process receives SIGINT (or SIGTERM on unix).
/// Spawn this next to [`Dispatcher::run`]; the dispatcher handles the rest
/// of the drain.
pub async fn cancel_on_signal(token: CancellationToken) {
    #[cfg(unix)]
    {
        let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(term) => term,
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                token.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    token.cancel();
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_string()
    }
}
