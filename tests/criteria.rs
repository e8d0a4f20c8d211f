use serde_json::json;

use hyperfleet_adapter::context::EvaluationContext;
use hyperfleet_adapter::criteria::{evaluate_conditions, Condition, Operator};

fn ready_cluster() -> EvaluationContext {
    EvaluationContext::builder()
        .with_var("clusterPhase", json!("Ready"))
        .with_var("cloudProvider", json!("aws"))
        .with_var("vpcId", json!("vpc-12345"))
        .with_var("nodeCount", json!(5))
        .build()
}

#[test]
fn provisioning_gate_passes() {
    let conditions = vec![
        Condition::new(
            "clusterPhase",
            Operator::In,
            json!(["Provisioning", "Ready"]),
        ),
        Condition::new(
            "cloudProvider",
            Operator::In,
            json!(["aws", "gcp", "azure"]),
        ),
        Condition::exists("vpcId"),
    ];
    let outcome = evaluate_conditions(&ready_cluster(), &conditions).unwrap();
    assert!(outcome.matched);
    assert_eq!(outcome.first_failure, None);
    assert_eq!(outcome.outcomes.len(), 3);
    assert!(outcome.outcomes.iter().all(|o| o.matched));
}

#[test]
fn terminating_cluster_is_blocked() {
    let ctx = EvaluationContext::builder()
        .with_var("clusterPhase", json!("Terminating"))
        .build();
    let conditions = vec![Condition::new(
        "clusterPhase",
        Operator::NotIn,
        json!(["Terminating", "Failed"]),
    )];
    let outcome = evaluate_conditions(&ctx, &conditions).unwrap();
    assert!(!outcome.matched);
    assert_eq!(outcome.first_failure, Some(0));
}

#[test]
fn all_conditions_are_recorded_even_after_a_failure() {
    let conditions = vec![
        Condition::new("clusterPhase", Operator::Equals, json!("Provisioning")),
        Condition::new("nodeCount", Operator::GreaterThan, json!(3)),
    ];
    let outcome = evaluate_conditions(&ready_cluster(), &conditions).unwrap();
    assert!(!outcome.matched);
    assert_eq!(outcome.first_failure, Some(0));
    assert_eq!(outcome.outcomes.len(), 2);
    assert!(outcome.outcomes[1].matched);
}

#[test]
fn empty_condition_list_is_true() {
    let outcome = evaluate_conditions(&ready_cluster(), &[]).unwrap();
    assert!(outcome.matched);
    assert!(outcome.outcomes.is_empty());
}

#[test]
fn operator_errors_fail_the_condition_but_not_the_list() {
    // `in` with a null operand is an operator error, not a parse error.
    let conditions = vec![
        Condition::new("clusterPhase", Operator::In, json!(null)),
        Condition::new("nodeCount", Operator::LessThan, json!(10)),
    ];
    let outcome = evaluate_conditions(&ready_cluster(), &conditions).unwrap();
    assert!(!outcome.matched);
    assert_eq!(outcome.first_failure, Some(0));
    assert!(outcome.outcomes[0].error.is_some());
    assert!(outcome.outcomes[1].matched);
}

#[test]
fn malformed_field_path_is_a_parse_error() {
    let conditions = vec![Condition::exists("{.broken")];
    assert!(evaluate_conditions(&ready_cluster(), &conditions).is_err());
}

#[test]
fn conditions_reach_into_nested_fields() {
    let ctx = EvaluationContext::builder()
        .with_var("data", json!({"spec": {"nodes": [1, 2, 3]}}))
        .build();
    let conditions = vec![
        Condition::new("data.spec.nodes", Operator::Contains, json!(2)),
        Condition::exists("{.data.spec.nodes}"),
    ];
    let outcome = evaluate_conditions(&ctx, &conditions).unwrap();
    assert!(outcome.matched);
}

#[test]
fn missing_field_with_exists_fails_cleanly() {
    let outcome =
        evaluate_conditions(&ready_cluster(), &[Condition::exists("subnetId")]).unwrap();
    assert!(!outcome.matched);
    assert!(outcome.outcomes[0].error.is_none());
}

#[test]
fn condition_yaml_round_trip() {
    let yaml = r#"
field: clusterPhase
operator: notIn
value: ["Terminating"]
"#;
    let condition: Condition = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(condition.operator, Operator::NotIn);

    // Unknown operators are rejected at parse time.
    let bad = serde_yaml::from_str::<Condition>("field: a\noperator: matches\nvalue: x");
    assert!(bad.is_err());
}
