mod common;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use hyperfleet_adapter::broker::AckDecision;
use hyperfleet_adapter::generation::{ApplyOperation, GENERATION_ANNOTATION};
use hyperfleet_adapter::reconcile::{EventDisposition, TaskDisposition};
use hyperfleet_adapter::shipper::BundleStore;
use hyperfleet_adapter::trace::TraceContext;

use common::{cluster_event, shipper_orchestrator};

#[tokio::test]
async fn precondition_passes_and_create_happens() {
    let (orchestrator, store) = shipper_orchestrator();
    let event = cluster_event("Ready", 1);

    let outcome = orchestrator
        .process(&event, &CancellationToken::new(), TraceContext::new())
        .await;

    assert_eq!(outcome.disposition, EventDisposition::Completed);
    assert_eq!(outcome.ack_decision(), AckDecision::Ack);
    assert_eq!(outcome.adapter.as_deref(), Some("cluster-provisioner"));

    let task = &outcome.tasks[0];
    assert_eq!(task.disposition, TaskDisposition::Completed);
    assert_eq!(task.resources.len(), 1);
    assert_eq!(task.resources[0].operation, Some(ApplyOperation::Create));

    // The rendered bundle landed in the consumer's store, stamped with the
    // event's generation.
    let bundle = store.get("c-42", "cluster-c-42").await.unwrap();
    assert_eq!(
        bundle
            .pointer("/metadata/annotations")
            .and_then(|a| a.get(GENERATION_ANNOTATION)),
        Some(&json!("1"))
    );
    // The capture default filled the missing region.
    assert_eq!(
        bundle.pointer("/spec/manifests/0/data/region"),
        Some(&json!("us-east-1"))
    );
    assert_eq!(
        bundle.pointer("/spec/manifests/0/data/clusterId"),
        Some(&json!("c-42"))
    );

    // Postcondition `nodeCount > 0` held and was reported.
    assert_eq!(task.postconditions.len(), 1);
    assert!(task.postconditions[0].matched);
}

#[tokio::test]
async fn redelivery_is_idempotent() {
    let (orchestrator, store) = shipper_orchestrator();
    let event = cluster_event("Ready", 7);

    let first = orchestrator
        .process(&event, &CancellationToken::new(), TraceContext::new())
        .await;
    assert_eq!(
        first.tasks[0].resources[0].operation,
        Some(ApplyOperation::Create)
    );

    // Same event, same generation: the broker redelivered.
    let second = orchestrator
        .process(&event, &CancellationToken::new(), TraceContext::new())
        .await;
    assert_eq!(second.disposition, EventDisposition::Completed);
    assert_eq!(
        second.tasks[0].resources[0].operation,
        Some(ApplyOperation::Skip)
    );
    assert_eq!(
        second.tasks[0].resources[0].reason,
        "generation 7 unchanged"
    );

    // Exactly one underlying write across both deliveries.
    assert_eq!(store.write_count(), 1);
}

#[tokio::test]
async fn terminating_cluster_is_skipped() {
    let (orchestrator, store) = shipper_orchestrator();
    let event = cluster_event("Terminating", 1);

    let outcome = orchestrator
        .process(&event, &CancellationToken::new(), TraceContext::new())
        .await;

    assert_eq!(outcome.disposition, EventDisposition::Completed);
    assert_eq!(outcome.ack_decision(), AckDecision::Ack);
    let task = &outcome.tasks[0];
    assert_eq!(task.disposition, TaskDisposition::Skipped);
    assert_eq!(task.skipped_by.as_deref(), Some("provisionable"));
    assert!(task.resources.is_empty());
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn generation_upgrade_updates_in_place() {
    let (orchestrator, store) = shipper_orchestrator();

    orchestrator
        .process(
            &cluster_event("Ready", 1),
            &CancellationToken::new(),
            TraceContext::new(),
        )
        .await;
    let outcome = orchestrator
        .process(
            &cluster_event("Ready", 2),
            &CancellationToken::new(),
            TraceContext::new(),
        )
        .await;

    let resource = &outcome.tasks[0].resources[0];
    assert_eq!(resource.operation, Some(ApplyOperation::Update));
    assert_eq!(resource.reason, "generation 1→2");
    assert_eq!(store.write_count(), 2);
}

#[tokio::test]
async fn unrouted_events_ack_without_side_effects() {
    let (orchestrator, store) = shipper_orchestrator();
    let event = hyperfleet_adapter::broker::CloudEvent::new(
        "com.elsewhere.news",
        "other/source",
        json!({"irrelevant": true}),
    );

    let outcome = orchestrator
        .process(&event, &CancellationToken::new(), TraceContext::new())
        .await;
    assert_eq!(outcome.disposition, EventDisposition::Unrouted);
    assert_eq!(outcome.ack_decision(), AckDecision::Ack);
    assert!(outcome.tasks.is_empty());
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn invalid_envelope_is_fatal_but_acked() {
    let (orchestrator, store) = shipper_orchestrator();
    let mut event = cluster_event("Ready", 1);
    event.datacontenttype = "text/plain".to_string();

    let outcome = orchestrator
        .process(&event, &CancellationToken::new(), TraceContext::new())
        .await;
    assert_eq!(outcome.disposition, EventDisposition::Failed);
    assert!(!outcome.retryable);
    // Poison events must not block the queue.
    assert_eq!(outcome.ack_decision(), AckDecision::Ack);
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn missing_generation_variable_fails_fatally() {
    let (orchestrator, store) = shipper_orchestrator();
    let mut event = cluster_event("Ready", 1);
    event.data.as_object_mut().unwrap().remove("generation");

    let outcome = orchestrator
        .process(&event, &CancellationToken::new(), TraceContext::new())
        .await;
    assert_eq!(outcome.disposition, EventDisposition::Failed);
    assert!(!outcome.retryable, "template bugs must not be retried");
    assert_eq!(outcome.ack_decision(), AckDecision::Ack);
    assert_eq!(outcome.tasks[0].disposition, TaskDisposition::Failed);
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn postcondition_failure_is_reported_not_nacked() {
    let (orchestrator, _store) = shipper_orchestrator();
    let mut event = cluster_event("Ready", 1);
    // nodeCount 0 keeps preconditions green but fails `has-capacity`.
    event.data["nodeCount"] = json!(0);

    let outcome = orchestrator
        .process(&event, &CancellationToken::new(), TraceContext::new())
        .await;

    assert_eq!(outcome.disposition, EventDisposition::Completed);
    assert_eq!(outcome.ack_decision(), AckDecision::Ack);
    let post = &outcome.tasks[0].postconditions[0];
    assert_eq!(post.rule, "has-capacity");
    assert!(!post.matched);
}
