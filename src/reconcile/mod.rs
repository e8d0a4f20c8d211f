//! Reconciliation orchestrator: the per-event pipeline.
//!
//! For each event, in order: parse and seed the evaluation context, route
//! to an adapter, check preconditions, enrich from the fleet API, run
//! captures, render templates, apply through the target transport, evaluate
//! postconditions (report-only), post a status summary, and hand back the
//! ack decision.
//!
//! Failure policy follows at-least-once semantics: individual capture
//! failures fall back to defaults, postcondition failures are reported but
//! never undo work, apply failures surface (retryable ones nack the event),
//! and cancellation is always treated as "retry later". Idempotence across
//! redelivery comes from generation gating: a redelivered event re-renders
//! the same generation and every apply lands as `skip`.

mod outcome;

use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::CloudEvent;
use crate::config::{Adapter, AdapterRegistry, Capture, RuleSet, TaskSpec, TransportKind};
use crate::context::EvaluationContext;
use crate::criteria::evaluate_conditions;
use crate::expr::CachedEvaluator;
use crate::fleet::FleetClient;
use crate::httpclient::RequestOptions;
use crate::template::{self, RenderedManifest};
use crate::trace::TraceContext;
use crate::transport::{ApplyOptions, Transport, TransportContext};

pub use outcome::{
    EventDisposition, EventOutcome, PostconditionReport, ResourceOutcome, TaskDisposition,
    TaskReport,
};

/// Per-process orchestrator. Shared immutably across the worker pool.
pub struct Orchestrator {
    registry: AdapterRegistry,
    api_transport: Option<Arc<dyn Transport>>,
    shipper_transport: Option<Arc<dyn Transport>>,
    fleet: Option<FleetClient>,
    status_endpoint: Option<String>,
}

/// Builder for [`Orchestrator`].
#[derive(Default)]
pub struct OrchestratorBuilder {
    registry: AdapterRegistry,
    api_transport: Option<Arc<dyn Transport>>,
    shipper_transport: Option<Arc<dyn Transport>>,
    fleet: Option<FleetClient>,
    status_endpoint: Option<String>,
}

impl OrchestratorBuilder {
    #[must_use]
    pub fn with_registry(mut self, registry: AdapterRegistry) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn with_api_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.api_transport = Some(transport);
        self
    }

    #[must_use]
    pub fn with_shipper_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.shipper_transport = Some(transport);
        self
    }

    /// Wires the fleet client; `status_endpoint` is where status payloads
    /// are posted.
    #[must_use]
    pub fn with_fleet(mut self, fleet: FleetClient, status_endpoint: impl Into<String>) -> Self {
        self.fleet = Some(fleet);
        self.status_endpoint = Some(status_endpoint.into());
        self
    }

    #[must_use]
    pub fn build(self) -> Orchestrator {
        Orchestrator {
            registry: self.registry,
            api_transport: self.api_transport,
            shipper_transport: self.shipper_transport,
            fleet: self.fleet,
            status_endpoint: self.status_endpoint,
        }
    }
}

impl Orchestrator {
    #[must_use]
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    /// Processes one event end to end. Never panics, never loses the ack
    /// decision: every failure mode lands in the returned outcome.
    pub async fn process(
        &self,
        event: &CloudEvent,
        cancel: &CancellationToken,
        trace: TraceContext,
    ) -> EventOutcome {
        let mut outcome = EventOutcome {
            event_id: event.id.clone(),
            event_type: event.event_type.clone(),
            adapter: None,
            cluster_id: None,
            disposition: EventDisposition::Completed,
            retryable: false,
            error: None,
            tasks: Vec::new(),
            status_reported: false,
        };

        if let Err(err) = event.validate() {
            // Poison events must not block the queue: fatal, acked.
            outcome.disposition = EventDisposition::Failed;
            outcome.error = Some(err.to_string());
            self.finish(&mut outcome, None, cancel, trace).await;
            return outcome;
        }

        // 1. Seed the per-event context: the envelope, the payload, and the
        // payload's top-level fields as first-class variables.
        let ctx = EvaluationContext::new();
        if let Ok(envelope) = serde_json::to_value(event) {
            ctx.set("event", envelope);
        }
        ctx.set("data", event.data.clone());
        if let Value::Object(map) = &event.data {
            ctx.set_many(map.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        let evaluator = CachedEvaluator::new(ctx.clone());

        // 2. Route by event-type prefix and source.
        let Some(adapter) = self.registry.route(&event.event_type, &event.source) else {
            debug!(event_type = %event.event_type, source = %event.source, "no adapter claimed event");
            outcome.disposition = EventDisposition::Unrouted;
            self.finish(&mut outcome, None, cancel, trace).await;
            return outcome;
        };
        outcome.adapter = Some(adapter.name().to_string());

        // 4. Enrichment (adapter-wide, before any task runs).
        if let Some(enrich) = adapter.enrich() {
            match ctx.extract(&enrich.cluster_ref) {
                Ok(result) if result.value.is_string() => {
                    let cluster_id = result.value.as_str().unwrap_or_default().to_string();
                    outcome.cluster_id = Some(cluster_id.clone());
                    if let Some(fleet) = &self.fleet {
                        let opts = RequestOptions::new()
                            .with_cancellation(cancel.clone())
                            .with_trace(trace);
                        match fleet.get_cluster(&cluster_id, opts).await {
                            Ok(cluster) => {
                                ctx.set(enrich.key.clone(), cluster);
                            }
                            Err(err) => {
                                let retryable = err.is_retryable() || err.is_cancelled();
                                warn!(
                                    cluster_id = %cluster_id,
                                    error = %err,
                                    retryable,
                                    "cluster enrichment failed"
                                );
                                outcome.disposition = EventDisposition::Failed;
                                outcome.retryable = retryable;
                                outcome.error = Some(err.to_string());
                                self.finish(&mut outcome, Some(&adapter), cancel, trace).await;
                                return outcome;
                            }
                        }
                    }
                }
                Ok(_) => {
                    debug!(path = %enrich.cluster_ref, "enrichment cluster ref absent");
                }
                Err(err) => {
                    outcome.disposition = EventDisposition::Failed;
                    outcome.error = Some(err.to_string());
                    self.finish(&mut outcome, Some(&adapter), cancel, trace).await;
                    return outcome;
                }
            }
        }

        // 3, 5–8. Tasks in declaration order; each aggregates its own
        // capture/render/apply/postcondition records.
        for task in adapter.tasks() {
            let report = self
                .run_task(&adapter, task, &ctx, &evaluator, cancel, trace)
                .await;
            if report.disposition == TaskDisposition::Failed {
                outcome.disposition = EventDisposition::Failed;
                if report.resources.iter().any(|r| r.retryable) {
                    outcome.retryable = true;
                }
            }
            outcome.tasks.push(report);
        }

        // 9–10. Status report, summary log, ack policy.
        self.finish(&mut outcome, Some(&adapter), cancel, trace).await;
        outcome
    }

    async fn run_task(
        &self,
        adapter: &Adapter,
        task: &TaskSpec,
        ctx: &EvaluationContext,
        evaluator: &CachedEvaluator,
        cancel: &CancellationToken,
        trace: TraceContext,
    ) -> TaskReport {
        let mut report = TaskReport {
            task: task.name.clone(),
            disposition: TaskDisposition::Completed,
            skipped_by: None,
            resources: Vec::new(),
            postconditions: Vec::new(),
        };

        // Preconditions: first failure skips the task.
        for rule_name in &task.preconditions {
            match self.evaluate_rule(adapter, rule_name, ctx, evaluator) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(task = %task.name, rule = %rule_name, "task skipped by precondition");
                    return TaskReport::skipped(&task.name, rule_name);
                }
                Err(message) => {
                    report.disposition = TaskDisposition::Failed;
                    report.resources.push(ResourceOutcome {
                        template: String::new(),
                        kind: String::new(),
                        name: rule_name.clone(),
                        operation: None,
                        reason: "precondition evaluation failed".to_string(),
                        error: Some(message),
                        retryable: false,
                    });
                    return report;
                }
            }
        }

        // Captures: absence falls back to the default (or null, logged).
        for set_name in &task.captures {
            let Some(set) = adapter.capture_set(set_name) else {
                continue;
            };
            for capture in &set.items {
                self.run_capture(capture, ctx, evaluator);
            }
        }

        // Templates: render and validate everything before touching any
        // sink, so a broken template applies nothing.
        let mut staged: Vec<RenderedManifest> = Vec::new();
        for template_name in &task.templates {
            let Some(spec) = adapter.template(template_name) else {
                continue;
            };
            match template::render(spec, ctx) {
                Ok(rendered) => {
                    debug!(
                        template = %template_name,
                        summary = %serde_json::to_string(&rendered.summary).unwrap_or_default(),
                        "template rendered"
                    );
                    staged.push(rendered);
                }
                Err(err) => {
                    report.disposition = TaskDisposition::Failed;
                    report.resources.push(ResourceOutcome {
                        template: template_name.clone(),
                        kind: spec.kind.clone(),
                        name: String::new(),
                        operation: None,
                        reason: "template render failed".to_string(),
                        error: Some(err.to_string()),
                        retryable: false,
                    });
                    return report;
                }
            }
        }

        // Apply through the target transport.
        let target = self.transport_context(task, ctx, cancel, trace);
        for rendered in staged {
            let resource = match self.transport_for(task) {
                Some(transport) => {
                    match transport
                        .apply(&rendered.bytes, &ApplyOptions::default(), &target)
                        .await
                    {
                        Ok(result) => {
                            metrics::counter!(
                                "hyperfleet_applies_total",
                                "operation" => result.operation.to_string()
                            )
                            .increment(1);
                            ResourceOutcome {
                                template: rendered.template.clone(),
                                kind: rendered.kind.clone(),
                                name: rendered.summary.name.clone(),
                                operation: Some(result.operation),
                                reason: result.reason,
                                error: None,
                                retryable: false,
                            }
                        }
                        Err(err) => ResourceOutcome {
                            template: rendered.template.clone(),
                            kind: rendered.kind.clone(),
                            name: rendered.summary.name.clone(),
                            operation: None,
                            reason: "apply failed".to_string(),
                            retryable: err.is_retryable(),
                            error: Some(err.to_string()),
                        },
                    }
                }
                None => ResourceOutcome {
                    template: rendered.template.clone(),
                    kind: rendered.kind.clone(),
                    name: rendered.summary.name.clone(),
                    operation: None,
                    reason: "transport not configured".to_string(),
                    error: Some(format!(
                        "no {:?} transport wired into the orchestrator",
                        task.target.transport
                    )),
                    retryable: false,
                },
            };
            if resource.error.is_some() {
                report.disposition = TaskDisposition::Failed;
            }
            report.resources.push(resource);
        }

        // Postconditions: reported, never enforced.
        for rule_name in &task.postconditions {
            let entry = match self.evaluate_rule(adapter, rule_name, ctx, evaluator) {
                Ok(matched) => PostconditionReport {
                    rule: rule_name.clone(),
                    matched,
                    error: None,
                },
                Err(message) => PostconditionReport {
                    rule: rule_name.clone(),
                    matched: false,
                    error: Some(message),
                },
            };
            if !entry.matched {
                debug!(task = %task.name, rule = %rule_name, "postcondition did not hold");
            }
            report.postconditions.push(entry);
        }

        report
    }

    // Rule sets evaluate as conditions or as one expression; parse-band
    // failures surface as Err(message) and fail the task (config bug).
    fn evaluate_rule(
        &self,
        adapter: &Adapter,
        rule_name: &str,
        ctx: &EvaluationContext,
        evaluator: &CachedEvaluator,
    ) -> Result<bool, String> {
        let Some(rule) = adapter.rule(rule_name) else {
            return Err(format!("rule {rule_name:?} is not defined"));
        };
        rule_matches(rule, ctx, evaluator)
    }

    fn run_capture(&self, capture: &Capture, ctx: &EvaluationContext, evaluator: &CachedEvaluator) {
        let extracted: Option<Value> = if let Some(field) = &capture.field {
            match ctx.extract(field) {
                Ok(result) => {
                    if let Some(failure) = &result.error {
                        debug!(capture = %capture.name, error = %failure, "capture extraction misuse");
                    }
                    (!result.value.is_null()).then_some(result.value)
                }
                Err(err) => {
                    warn!(capture = %capture.name, error = %err, "capture field failed to parse");
                    None
                }
            }
        } else if let Some(expression) = &capture.expression {
            match evaluator.evaluate_safe(expression) {
                Ok(result) => {
                    if let Some(reason) = result.reason {
                        debug!(capture = %capture.name, reason = %reason, "capture expression fell through");
                    }
                    (!result.value.is_null()).then_some(result.value)
                }
                Err(err) => {
                    warn!(capture = %capture.name, error = %err, "capture expression failed to parse");
                    None
                }
            }
        } else {
            None
        };

        let value = match (extracted, &capture.default) {
            (Some(value), _) => value,
            (None, Some(default)) => {
                debug!(capture = %capture.name, "capture absent, using default");
                default.clone()
            }
            (None, None) => {
                debug!(capture = %capture.name, "capture absent, storing null");
                Value::Null
            }
        };
        ctx.set(capture.name.clone(), value);
    }

    fn transport_for(&self, task: &TaskSpec) -> Option<&Arc<dyn Transport>> {
        match task.target.transport {
            TransportKind::Api => self.api_transport.as_ref(),
            TransportKind::Shipper => self.shipper_transport.as_ref(),
        }
    }

    fn transport_context(
        &self,
        task: &TaskSpec,
        ctx: &EvaluationContext,
        cancel: &CancellationToken,
        trace: TraceContext,
    ) -> TransportContext {
        let consumer = task.target.cluster_ref.as_ref().and_then(|reference| {
            ctx.extract(reference)
                .ok()
                .and_then(|r| r.value.as_str().map(str::to_string))
        });
        TransportContext {
            consumer,
            trace: Some(trace),
            cancel: Some(cancel.clone()),
        }
    }

    // Status report + single summary log line. Called on every exit path.
    async fn finish(
        &self,
        outcome: &mut EventOutcome,
        adapter: Option<&Arc<Adapter>>,
        cancel: &CancellationToken,
        trace: TraceContext,
    ) {
        if let (Some(fleet), Some(endpoint), Some(_)) =
            (&self.fleet, &self.status_endpoint, adapter)
        {
            let payload = outcome.status_payload();
            let opts = RequestOptions::new()
                .with_cancellation(cancel.clone())
                .with_trace(trace);
            match fleet.post_status(endpoint, &payload, opts).await {
                Ok(()) => outcome.status_reported = true,
                Err(err) if err.is_cancelled() => {
                    // Did not give up; the event must come back.
                    outcome.disposition = EventDisposition::Failed;
                    outcome.retryable = true;
                    outcome.error = Some(err.to_string());
                }
                Err(err) => {
                    // Retries exhausted: give up on reporting, keep the ack.
                    warn!(error = %err, "status report abandoned after retries");
                }
            }
        } else {
            outcome.status_reported = true;
        }

        metrics::counter!(
            "hyperfleet_events_total",
            "disposition" => format!("{:?}", outcome.disposition).to_lowercase()
        )
        .increment(1);

        info!(
            event_id = %outcome.event_id,
            event_type = %outcome.event_type,
            adapter = outcome.adapter.as_deref().unwrap_or("-"),
            cluster_id = outcome.cluster_id.as_deref().unwrap_or("-"),
            disposition = ?outcome.disposition,
            retryable = outcome.retryable,
            tasks = outcome.tasks.len(),
            status_reported = outcome.status_reported,
            "event processed"
        );
    }
}

/// Evaluates one rule set against a context: ordered conditions (AND) or a
/// single expression; empty means true.
pub fn rule_matches(
    rule: &RuleSet,
    ctx: &EvaluationContext,
    evaluator: &CachedEvaluator,
) -> Result<bool, String> {
    if !rule.conditions.is_empty() {
        return evaluate_conditions(ctx, &rule.conditions)
            .map(|o| o.matched)
            .map_err(|err| err.to_string());
    }
    if let Some(expression) = &rule.expression {
        return evaluator.matches(expression).map_err(|err| err.to_string());
    }
    Ok(true)
}
