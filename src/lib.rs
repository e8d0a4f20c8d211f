//! # HyperFleet Adapter
//!
//! An event-driven adapter runtime bridging a cloud-event message bus to
//! heterogeneous control planes: a direct resource API and a workload
//! shipper that delivers manifest bundles to remote consumer clusters.
//!
//! The engine consumes cluster-lifecycle events, evaluates declarative
//! rules against a per-event versioned context, and produces idempotent,
//! generation-gated side effects: creating/updating/skipping resources,
//! posting status back to the fleet API, and emitting telemetry.
//!
//! ## Core concepts
//!
//! - **Evaluation context** ([`context`]): per-event, concurrency-safe,
//!   versioned variable store. Everything else reads and writes through it.
//! - **Rules** ([`criteria`], [`expr`]): ordered condition lists (implicit
//!   AND) or CEL expressions, with a strict parse/runtime error split.
//! - **Captures** and **templates** ([`config`], [`template`]): named
//!   values extracted from the context and manifest blueprints rendered
//!   from it, always stamped with a generation annotation.
//! - **Generation gating** ([`generation`]): equal generation ⇒ skip,
//!   different ⇒ update (downgrades included, for rollback); the sole
//!   idempotency token across redelivery.
//! - **Transports** ([`transport`], [`shipper`]): one apply/get/discover
//!   seam, two sinks, one canonical not-found.
//! - **Pipeline** ([`broker`], [`dispatch`], [`reconcile`]): bounded
//!   worker pool with per-event deadlines and correlation, driving the
//!   ten-step reconciliation per event, acking only what must not come
//!   back.
//!
//! ## Quick start
//!
//! ```rust
//! use hyperfleet_adapter::context::EvaluationContext;
//! use hyperfleet_adapter::criteria::{evaluate_conditions, Condition, Operator};
//! use serde_json::json;
//!
//! let ctx = EvaluationContext::builder()
//!     .with_var("clusterPhase", json!("Ready"))
//!     .with_var("cloudProvider", json!("aws"))
//!     .build();
//!
//! let gate = vec![
//!     Condition::new("clusterPhase", Operator::In, json!(["Provisioning", "Ready"])),
//!     Condition::new("cloudProvider", Operator::In, json!(["aws", "gcp", "azure"])),
//! ];
//! assert!(evaluate_conditions(&ctx, &gate).unwrap().matched);
//! ```
//!
//! ## Module guide
//!
//! - [`context`] - per-event versioned variable store
//! - [`extract`] - dot-path / path-expression field extraction
//! - [`criteria`] - condition operators and rule evaluation
//! - [`expr`] - cached CEL evaluation (strict and safe modes)
//! - [`config`] - adapter YAML model, loader, and indexes
//! - [`template`] - manifest rendering and generation stamping
//! - [`generation`] - apply decisions and annotation validation
//! - [`transport`] - apply/get/discover seam and both backends
//! - [`httpclient`] - retrying HTTP client with typed errors
//! - [`shipper`] - bundle model and client for the workload shipper
//! - [`fleet`] - fleet API client (enrichment, status reporting)
//! - [`broker`] - cloud-event envelope and the subscriber seam
//! - [`dispatch`] - bounded worker pool and ack policy
//! - [`reconcile`] - the per-event orchestrator
//! - [`health`] - `/healthz`, `/readyz`, `/metrics`
//! - [`telemetry`] - tracing subscriber setup
//! - [`settings`] - environment-backed configuration
//! - [`trace`] - W3C trace-context ids

pub mod broker;
pub mod config;
pub mod context;
pub mod criteria;
pub mod dispatch;
pub mod expr;
pub mod extract;
pub mod fleet;
pub mod generation;
pub mod health;
pub mod httpclient;
pub mod reconcile;
pub mod settings;
pub mod shipper;
pub mod telemetry;
pub mod template;
pub mod trace;
pub mod transport;
