use serde_json::json;

use hyperfleet_adapter::broker::memory::MemoryBroker;
use hyperfleet_adapter::broker::{
    AckDecision, BrokerError, BrokerRegistry, CloudEvent, EventError, Subscriber,
};
use hyperfleet_adapter::settings::BrokerSettings;

fn settings(broker_type: &str) -> BrokerSettings {
    BrokerSettings {
        broker_type: broker_type.to_string(),
        subscription_id: "sub-1".to_string(),
        topic: "clusters".to_string(),
        parallelism: 1,
    }
}

#[test]
fn envelope_validation_checks_required_attributes() {
    let good = CloudEvent::new("com.hyperfleet.cluster.updated", "src", json!({}));
    good.validate().unwrap();

    let mut no_type = good.clone();
    no_type.event_type = String::new();
    assert!(matches!(
        no_type.validate(),
        Err(EventError::MissingAttribute { attribute: "type" })
    ));

    let mut bad_content = good.clone();
    bad_content.datacontenttype = "application/xml".to_string();
    assert!(matches!(
        bad_content.validate(),
        Err(EventError::ContentType { .. })
    ));
}

#[test]
fn envelope_serde_uses_cloud_event_field_names() {
    let mut event = CloudEvent::new("com.x.y", "src", json!({"a": 1}));
    event
        .extensions
        .insert("traceparent".to_string(), "00-abc-def-01".to_string());

    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value["type"], "com.x.y");
    assert_eq!(value["specversion"], "1.0");
    assert_eq!(value["datacontenttype"], "application/json");

    let parsed: CloudEvent = serde_json::from_value(value).unwrap();
    assert_eq!(parsed, event);
    assert_eq!(parsed.traceparent(), Some("00-abc-def-01"));
}

#[tokio::test]
async fn ack_consumes_and_nack_redelivers() {
    let broker = MemoryBroker::new(8);
    let subscriber = broker.subscriber("sub-1");

    broker
        .publish(CloudEvent::new("com.x", "src", json!({"n": 1})))
        .await
        .unwrap();

    let first = subscriber.next().await.unwrap().expect("delivery");
    let id = first.event.id.clone();
    first.settle(AckDecision::Nack).await;

    // Nack put it back on the queue.
    let second = subscriber.next().await.unwrap().expect("redelivery");
    assert_eq!(second.event.id, id);
    second.settle(AckDecision::Ack).await;

    let stats = broker.stats();
    assert_eq!(stats.published, 1);
    assert_eq!(stats.delivered, 2);
    assert_eq!(stats.nacked, 1);
    assert_eq!(stats.acked, 1);
    assert_eq!(broker.backlog(), 0);
}

#[tokio::test]
async fn closed_subscriber_stops_delivering() {
    let broker = MemoryBroker::new(8);
    let subscriber = broker.subscriber("sub-1");
    subscriber.close().await.unwrap();
    assert!(subscriber.next().await.unwrap().is_none());
}

#[tokio::test]
async fn registry_builds_memory_driver_and_rejects_unknown() {
    let registry = BrokerRegistry::new();

    let subscriber = registry.create(&settings("memory")).unwrap();
    assert_eq!(subscriber.subscription(), "sub-1");

    let err = registry.create(&settings("kafka")).unwrap_err();
    assert!(matches!(err, BrokerError::UnknownDriver { .. }));
}
