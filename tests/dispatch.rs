mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use hyperfleet_adapter::broker::memory::MemoryBroker;
use hyperfleet_adapter::broker::{BrokerRegistry, Subscriber};
use hyperfleet_adapter::dispatch::{DispatchError, Dispatcher, DispatcherConfig};
use hyperfleet_adapter::generation::GenerationError;
use hyperfleet_adapter::health::HealthState;
use hyperfleet_adapter::reconcile::Orchestrator;
use hyperfleet_adapter::settings::BrokerSettings;
use hyperfleet_adapter::transport::{
    ApplyOptions, DiscoveryCriteria, Transport, TransportApplyResult, TransportContext,
    TransportError,
};

use common::{cluster_event, sample_registry, shipper_orchestrator};

fn test_settings(parallelism: usize) -> BrokerSettings {
    BrokerSettings {
        broker_type: "test".to_string(),
        subscription_id: "sub-1".to_string(),
        topic: "clusters".to_string(),
        parallelism,
    }
}

fn registry_for(broker: &MemoryBroker) -> BrokerRegistry {
    let mut registry = BrokerRegistry::new();
    let broker = broker.clone();
    registry.register("test", move |settings| {
        Ok(Arc::new(broker.subscriber(settings.subscription_id.clone())) as Arc<dyn Subscriber>)
    });
    registry
}

fn quick_config(parallelism: usize) -> DispatcherConfig {
    DispatcherConfig {
        parallelism,
        event_timeout: Duration::from_secs(5),
        shutdown_grace: Duration::from_secs(5),
        subscribe_attempts: 3,
        subscribe_delay: Duration::from_millis(10),
    }
}

async fn wait_for(mut probe: impl FnMut() -> bool) {
    for _ in 0..200 {
        if probe() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached within timeout");
}

#[tokio::test]
async fn successful_events_are_acked() {
    let broker = MemoryBroker::new(16);
    let (orchestrator, store) = shipper_orchestrator();
    let dispatcher = Arc::new(Dispatcher::new(orchestrator, quick_config(2)));
    let shutdown = CancellationToken::new();

    broker.publish(cluster_event("Ready", 1)).await.unwrap();

    let run = {
        let dispatcher = Arc::clone(&dispatcher);
        let registry = registry_for(&broker);
        let settings = test_settings(2);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { dispatcher.run(&registry, &settings, shutdown).await })
    };

    wait_for(|| dispatcher.report().acked >= 1).await;
    shutdown.cancel();
    let report = run.await.unwrap().unwrap();

    assert_eq!(report.acked, 1);
    assert_eq!(report.nacked, 0);
    assert_eq!(broker.stats().acked, 1);
    assert_eq!(store.write_count(), 1);
}

// Fails retryably a fixed number of times, then delegates to the real
// shipper transport.
struct FlakyTransport {
    inner: Arc<dyn Transport>,
    remaining_failures: AtomicU32,
}

#[async_trait]
impl Transport for FlakyTransport {
    async fn apply(
        &self,
        manifest: &[u8],
        options: &ApplyOptions,
        target: &TransportContext,
    ) -> Result<TransportApplyResult, TransportError> {
        if self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TransportError::Dial("transient link loss".to_string()));
        }
        self.inner.apply(manifest, options, target).await
    }

    async fn get(
        &self,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
        target: &TransportContext,
    ) -> Result<Value, TransportError> {
        self.inner.get(kind, namespace, name, target).await
    }

    async fn discover(
        &self,
        kind: &str,
        criteria: &DiscoveryCriteria,
        target: &TransportContext,
    ) -> Result<Vec<Value>, TransportError> {
        self.inner.discover(kind, criteria, target).await
    }
}

#[tokio::test]
async fn retryable_failures_nack_and_redeliver() {
    use hyperfleet_adapter::shipper::{BundleClient, InMemoryBundleStore};
    use hyperfleet_adapter::transport::ShipperTransport;

    let store = InMemoryBundleStore::new();
    let real = ShipperTransport::new(BundleClient::new(Arc::new(store.clone())));
    let flaky = FlakyTransport {
        inner: Arc::new(real),
        remaining_failures: AtomicU32::new(1),
    };
    let orchestrator = Arc::new(
        Orchestrator::builder()
            .with_registry(sample_registry())
            .with_shipper_transport(Arc::new(flaky))
            .build(),
    );

    let broker = MemoryBroker::new(16);
    let dispatcher = Arc::new(Dispatcher::new(orchestrator, quick_config(1)));
    let shutdown = CancellationToken::new();
    broker.publish(cluster_event("Ready", 3)).await.unwrap();

    let run = {
        let dispatcher = Arc::clone(&dispatcher);
        let registry = registry_for(&broker);
        let settings = test_settings(1);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { dispatcher.run(&registry, &settings, shutdown).await })
    };

    // First delivery nacks, redelivery succeeds.
    wait_for(|| dispatcher.report().acked >= 1).await;
    shutdown.cancel();
    let report = run.await.unwrap().unwrap();

    assert_eq!(report.nacked, 1);
    assert_eq!(report.acked, 1);
    assert_eq!(broker.stats().nacked, 1);
    assert_eq!(store.write_count(), 1);
}

struct PanickyTransport;

#[async_trait]
impl Transport for PanickyTransport {
    async fn apply(
        &self,
        _manifest: &[u8],
        _options: &ApplyOptions,
        _target: &TransportContext,
    ) -> Result<TransportApplyResult, TransportError> {
        panic!("transport exploded");
    }

    async fn get(
        &self,
        _kind: &str,
        _namespace: Option<&str>,
        _name: &str,
        _target: &TransportContext,
    ) -> Result<Value, TransportError> {
        Err(TransportError::NotFound)
    }

    async fn discover(
        &self,
        _kind: &str,
        _criteria: &DiscoveryCriteria,
        _target: &TransportContext,
    ) -> Result<Vec<Value>, TransportError> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn panics_are_recovered_and_nacked() {
    let orchestrator = Arc::new(
        Orchestrator::builder()
            .with_registry(sample_registry())
            .with_shipper_transport(Arc::new(PanickyTransport))
            .build(),
    );

    let broker = MemoryBroker::new(16);
    let dispatcher = Arc::new(Dispatcher::new(orchestrator, quick_config(1)));
    let shutdown = CancellationToken::new();
    broker.publish(cluster_event("Ready", 1)).await.unwrap();

    let run = {
        let dispatcher = Arc::clone(&dispatcher);
        let registry = registry_for(&broker);
        let settings = test_settings(1);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { dispatcher.run(&registry, &settings, shutdown).await })
    };

    wait_for(|| dispatcher.report().panicked >= 1).await;
    shutdown.cancel();
    let report = run.await.unwrap().unwrap();

    assert!(report.panicked >= 1);
    assert!(report.nacked >= 1);
    assert_eq!(report.acked, 0);
}

struct BrokenTemplateTransport;

#[async_trait]
impl Transport for BrokenTemplateTransport {
    async fn apply(
        &self,
        _manifest: &[u8],
        _options: &ApplyOptions,
        _target: &TransportContext,
    ) -> Result<TransportApplyResult, TransportError> {
        Err(TransportError::Validation(GenerationError::Missing {
            name: "web".to_string(),
        }))
    }

    async fn get(
        &self,
        _kind: &str,
        _namespace: Option<&str>,
        _name: &str,
        _target: &TransportContext,
    ) -> Result<Value, TransportError> {
        Err(TransportError::NotFound)
    }

    async fn discover(
        &self,
        _kind: &str,
        _criteria: &DiscoveryCriteria,
        _target: &TransportContext,
    ) -> Result<Vec<Value>, TransportError> {
        Ok(Vec::new())
    }
}

// Fatal (non-retryable) failures ack so poison events cannot wedge the
// queue.
#[tokio::test]
async fn fatal_failures_are_acked() {
    let orchestrator = Arc::new(
        Orchestrator::builder()
            .with_registry(sample_registry())
            .with_shipper_transport(Arc::new(BrokenTemplateTransport))
            .build(),
    );

    let broker = MemoryBroker::new(16);
    let dispatcher = Arc::new(Dispatcher::new(orchestrator, quick_config(1)));
    let shutdown = CancellationToken::new();
    broker.publish(cluster_event("Ready", 1)).await.unwrap();

    let run = {
        let dispatcher = Arc::clone(&dispatcher);
        let registry = registry_for(&broker);
        let settings = test_settings(1);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { dispatcher.run(&registry, &settings, shutdown).await })
    };

    wait_for(|| dispatcher.report().acked >= 1).await;
    shutdown.cancel();
    let report = run.await.unwrap().unwrap();

    assert_eq!(report.acked, 1);
    assert_eq!(report.nacked, 0);
    assert_eq!(broker.stats().nacked, 0);
}

#[tokio::test]
async fn subscribe_failures_are_bounded() {
    let mut registry = BrokerRegistry::new();
    let attempts_seen = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts_seen);
    registry.register("test", move |_settings| {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(hyperfleet_adapter::broker::BrokerError::Driver {
            message: "connection refused".to_string(),
        })
    });

    let (orchestrator, _store) = shipper_orchestrator();
    let dispatcher = Dispatcher::new(orchestrator, quick_config(1));

    let err = dispatcher
        .run(&registry, &test_settings(1), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Subscribe { attempts: 3, .. }));
    assert_eq!(attempts_seen.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn shutdown_flips_readiness_and_drains() {
    let broker = MemoryBroker::new(16);
    let (orchestrator, _store) = shipper_orchestrator();
    let health = Arc::new(HealthState::new());
    health.set_check("config", true, None);

    let dispatcher = Arc::new(
        Dispatcher::new(orchestrator, quick_config(1)).with_health(Arc::clone(&health)),
    );
    let shutdown = CancellationToken::new();

    let run = {
        let dispatcher = Arc::clone(&dispatcher);
        let registry = registry_for(&broker);
        let settings = test_settings(1);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { dispatcher.run(&registry, &settings, shutdown).await })
    };

    // Broker check registers once subscribed.
    wait_for(|| health.readiness().0).await;

    shutdown.cancel();
    run.await.unwrap().unwrap();
    assert!(health.is_shutting_down());
    assert!(!health.readiness().0);
}
