use std::sync::Arc;

use serde_json::json;

use hyperfleet_adapter::generation::{ApplyOperation, GENERATION_ANNOTATION};
use hyperfleet_adapter::shipper::{
    Bundle, BundleClient, BundleStore, InMemoryBundleStore, ShipperError,
};
use hyperfleet_adapter::transport::DiscoveryCriteria;

fn bundle_value(name: &str, generation: i64) -> serde_json::Value {
    json!({
        "apiVersion": "work.hyperfleet.io/v1",
        "kind": "Bundle",
        "metadata": {
            "name": name,
            "labels": {"app": "hyperfleet"},
            "annotations": { GENERATION_ANNOTATION: generation.to_string() },
        },
        "spec": {
            "manifests": [
                {
                    "kind": "ConfigMap",
                    "metadata": {
                        "name": "cluster-info",
                        "namespace": "fleet",
                        "labels": {"tier": "system"},
                        "annotations": { GENERATION_ANNOTATION: generation.to_string() },
                    },
                    "data": {"generation": generation.to_string()},
                },
            ],
        },
    })
}

fn client() -> (BundleClient, InMemoryBundleStore) {
    let store = InMemoryBundleStore::new();
    (BundleClient::new(Arc::new(store.clone())), store)
}

#[tokio::test]
async fn apply_creates_when_absent() {
    let (client, store) = client();
    let report = client
        .apply("cluster-a", &bundle_value("web", 1))
        .await
        .unwrap();
    assert_eq!(report.operation, ApplyOperation::Create);
    assert_eq!(report.reason, "resource not found");
    assert_eq!(store.write_count(), 1);
}

#[tokio::test]
async fn identical_generation_skips_without_write() {
    let (client, store) = client();
    let bundle = bundle_value("web", 7);

    let first = client.apply("cluster-a", &bundle).await.unwrap();
    assert_eq!(first.operation, ApplyOperation::Create);

    // Redelivery of the same logical version.
    let second = client.apply("cluster-a", &bundle).await.unwrap();
    assert_eq!(second.operation, ApplyOperation::Skip);
    assert_eq!(second.reason, "generation 7 unchanged");
    // Exactly one side-effecting call across both applies.
    assert_eq!(store.write_count(), 1);
    // Skip returns the existing object unchanged.
    assert_eq!(second.object, first.object);
}

#[tokio::test]
async fn different_generation_patches_metadata_and_spec() {
    let (client, store) = client();
    client
        .apply("cluster-a", &bundle_value("web", 1))
        .await
        .unwrap();

    let mut upgraded = bundle_value("web", 2);
    upgraded["metadata"]["labels"]["release"] = json!("v2");

    let report = client.apply("cluster-a", &upgraded).await.unwrap();
    assert_eq!(report.operation, ApplyOperation::Update);
    assert_eq!(report.reason, "generation 1→2");
    assert_eq!(store.write_count(), 2);

    let stored = store.get("cluster-a", "web").await.unwrap();
    assert_eq!(
        stored.pointer("/metadata/labels/release"),
        Some(&json!("v2"))
    );
    assert_eq!(
        stored
            .pointer("/metadata/annotations")
            .and_then(|a| a.get(GENERATION_ANNOTATION)),
        Some(&json!("2"))
    );
    assert_eq!(
        stored.pointer("/spec/manifests/0/data/generation"),
        Some(&json!("2"))
    );
}

#[tokio::test]
async fn downgrades_update_for_rollback() {
    let (client, _store) = client();
    client
        .apply("cluster-a", &bundle_value("web", 5))
        .await
        .unwrap();
    let report = client
        .apply("cluster-a", &bundle_value("web", 3))
        .await
        .unwrap();
    assert_eq!(report.operation, ApplyOperation::Update);
    assert_eq!(report.reason, "generation 5→3");
}

#[tokio::test]
async fn invalid_generation_fails_before_any_write() {
    let (client, store) = client();

    // Bundle-level annotation missing entirely.
    let mut bare = bundle_value("web", 1);
    bare["metadata"]
        .as_object_mut()
        .unwrap()
        .remove("annotations");
    assert!(matches!(
        client.apply("cluster-a", &bare).await,
        Err(ShipperError::Validation(_))
    ));

    // Embedded manifest with a non-positive generation.
    let mut nested = bundle_value("web", 1);
    nested["spec"]["manifests"][0]["metadata"]["annotations"][GENERATION_ANNOTATION] = json!("0");
    assert!(matches!(
        client.apply("cluster-a", &nested).await,
        Err(ShipperError::Validation(_))
    ));

    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn operations_are_scoped_by_consumer() {
    let (client, _store) = client();
    client
        .apply("cluster-a", &bundle_value("web", 1))
        .await
        .unwrap();

    assert!(matches!(
        client.get("cluster-b", "web").await,
        Err(ShipperError::NotFound)
    ));
    assert!(client.get("cluster-a", "web").await.is_ok());

    let a = client.list("cluster-a").await.unwrap();
    let b = client.list("cluster-b").await.unwrap();
    assert_eq!(a.len(), 1);
    assert!(b.is_empty());
}

#[tokio::test]
async fn discovery_matches_envelopes_for_bundle_kind() {
    let (client, _store) = client();
    client
        .apply("cluster-a", &bundle_value("web", 1))
        .await
        .unwrap();
    client
        .apply("cluster-a", &bundle_value("db", 1))
        .await
        .unwrap();

    let criteria = DiscoveryCriteria {
        name: Some("db".to_string()),
        ..DiscoveryCriteria::default()
    };
    let found = client
        .discover_in_bundle("cluster-a", "Bundle", &criteria)
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].pointer("/metadata/name"), Some(&json!("db")));
}

#[tokio::test]
async fn discovery_unwraps_embedded_manifests() {
    let (client, _store) = client();
    client
        .apply("cluster-a", &bundle_value("web", 1))
        .await
        .unwrap();

    let mut criteria = DiscoveryCriteria {
        namespace: Some("fleet".to_string()),
        ..DiscoveryCriteria::default()
    };
    criteria
        .label_selector
        .insert("tier".to_string(), "system".to_string());

    let found = client
        .discover_in_bundle("cluster-a", "ConfigMap", &criteria)
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(
        found[0].pointer("/metadata/name"),
        Some(&json!("cluster-info"))
    );

    // Wrong label: nothing matches.
    let mut wrong = DiscoveryCriteria::default();
    wrong
        .label_selector
        .insert("tier".to_string(), "apps".to_string());
    let found = client
        .discover_in_bundle("cluster-a", "ConfigMap", &wrong)
        .await
        .unwrap();
    assert!(found.is_empty());
}

#[tokio::test]
async fn delete_removes_and_not_found_surfaces() {
    let (client, _store) = client();
    client
        .apply("cluster-a", &bundle_value("web", 1))
        .await
        .unwrap();
    client.delete("cluster-a", "web").await.unwrap();
    assert!(matches!(
        client.delete("cluster-a", "web").await,
        Err(ShipperError::NotFound)
    ));
}

#[test]
fn typed_bundle_round_trips() {
    let bundle = Bundle::new("web", 4, vec![json!({"kind": "ConfigMap"})]);
    let value = bundle.to_value().unwrap();
    assert_eq!(
        value
            .pointer("/metadata/annotations")
            .and_then(|a| a.get(GENERATION_ANNOTATION)),
        Some(&json!("4"))
    );
    let parsed = Bundle::from_value(&value).unwrap();
    assert_eq!(parsed.metadata.name, "web");
    assert_eq!(parsed.spec.manifests.len(), 1);
}
