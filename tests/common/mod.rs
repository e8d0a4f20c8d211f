//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{json, Value};

use hyperfleet_adapter::broker::CloudEvent;
use hyperfleet_adapter::config::{load_str, AdapterRegistry};
use hyperfleet_adapter::reconcile::Orchestrator;
use hyperfleet_adapter::shipper::{BundleClient, InMemoryBundleStore};
use hyperfleet_adapter::transport::ShipperTransport;

/// A realistic single-adapter config: rule sets in both styles, captures
/// with a default, and a bundle template targeting the shipper.
pub const SAMPLE_ADAPTER: &str = r#"
name: cluster-provisioner
eventTypePrefix: "com.hyperfleet.cluster"
rules:
  - name: provisionable
    conditions:
      - field: clusterPhase
        operator: in
        value: ["Provisioning", "Ready"]
      - field: cloudProvider
        operator: in
        value: ["aws", "gcp", "azure"]
      - field: vpcId
        operator: exists
  - name: not-terminating
    conditions:
      - field: clusterPhase
        operator: notIn
        value: ["Terminating", "Failed"]
  - name: has-capacity
    expression: "nodeCount > 0"
captures:
  - name: cluster-facts
    items:
      - name: consumerCluster
        field: clusterId
      - name: region
        expression: "data.region"
        default: "us-east-1"
templates:
  - name: cluster-bundle
    kind: Bundle
    manifest:
      apiVersion: work.hyperfleet.io/v1
      kind: Bundle
      metadata:
        name: "cluster-${clusterId}"
        annotations:
          hyperfleet.io/generation: "${generation}"
      spec:
        manifests:
          - kind: ConfigMap
            metadata:
              name: cluster-info
            data:
              clusterId: "${clusterId}"
              region: "${region}"
tasks:
  - name: provision
    preconditions: [provisionable, not-terminating]
    captures: [cluster-facts]
    templates: [cluster-bundle]
    postconditions: [has-capacity]
    target:
      transport: shipper
      clusterRef: consumerCluster
"#;

pub fn sample_registry() -> AdapterRegistry {
    AdapterRegistry::new(load_str(SAMPLE_ADAPTER).expect("sample adapter parses"))
}

/// Orchestrator wired to an in-memory shipper store; returns the store for
/// assertions.
pub fn shipper_orchestrator() -> (Arc<Orchestrator>, InMemoryBundleStore) {
    let store = InMemoryBundleStore::new();
    let transport = ShipperTransport::new(BundleClient::new(Arc::new(store.clone())));
    let orchestrator = Orchestrator::builder()
        .with_registry(sample_registry())
        .with_shipper_transport(Arc::new(transport))
        .build();
    (Arc::new(orchestrator), store)
}

/// Event payload for a provisionable cluster.
pub fn cluster_data(phase: &str, generation: i64) -> Value {
    json!({
        "clusterId": "c-42",
        "clusterPhase": phase,
        "cloudProvider": "aws",
        "vpcId": "vpc-12345",
        "nodeCount": 5,
        "generation": generation,
    })
}

pub fn cluster_event(phase: &str, generation: i64) -> CloudEvent {
    CloudEvent::new(
        "com.hyperfleet.cluster.updated",
        "hyperfleet/cluster-service",
        cluster_data(phase, generation),
    )
}
