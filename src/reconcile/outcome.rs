//! Outcome model: what happened to an event, task by task, resource by
//! resource. Feeds the ack decision, the status payload, and the one
//! summary log line per event.

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

use crate::broker::AckDecision;
use crate::generation::ApplyOperation;

/// Terminal state of one task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskDisposition {
    /// Preconditions passed and the task ran to the end.
    Completed,
    /// A precondition failed; nothing was applied.
    Skipped,
    /// Rendering or applying failed.
    Failed,
}

/// Per-resource apply record.
#[derive(Clone, Debug, Serialize)]
pub struct ResourceOutcome {
    pub template: String,
    pub kind: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<ApplyOperation>,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// True when redelivery may succeed.
    pub retryable: bool,
}

/// Postcondition result; reported, never enforced.
#[derive(Clone, Debug, Serialize)]
pub struct PostconditionReport {
    pub rule: String,
    pub matched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything one task did.
#[derive(Clone, Debug, Serialize)]
pub struct TaskReport {
    pub task: String,
    pub disposition: TaskDisposition,
    /// The precondition rule that skipped this task, when any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_by: Option<String>,
    pub resources: Vec<ResourceOutcome>,
    pub postconditions: Vec<PostconditionReport>,
}

impl TaskReport {
    #[must_use]
    pub fn skipped(task: impl Into<String>, rule: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            disposition: TaskDisposition::Skipped,
            skipped_by: Some(rule.into()),
            resources: Vec::new(),
            postconditions: Vec::new(),
        }
    }
}

/// Terminal state of the whole event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventDisposition {
    /// Every task completed or was skipped by its preconditions.
    Completed,
    /// No adapter claimed the event.
    Unrouted,
    /// Something failed; `retryable` decides ack vs nack.
    Failed,
}

/// Aggregate outcome of one event.
#[derive(Clone, Debug, Serialize)]
pub struct EventOutcome {
    pub event_id: String,
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adapter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,
    pub disposition: EventDisposition,
    /// Meaningful when `disposition` is `Failed`.
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tasks: Vec<TaskReport>,
    /// Whether the status report reached the fleet API (or was skipped
    /// because no endpoint is configured).
    pub status_reported: bool,
}

impl EventOutcome {
    /// At-least-once ack policy: nack only when redelivery can help.
    #[must_use]
    pub fn ack_decision(&self) -> AckDecision {
        match self.disposition {
            EventDisposition::Failed if self.retryable => AckDecision::Nack,
            _ => AckDecision::Ack,
        }
    }

    /// Structured status payload posted to the fleet API.
    #[must_use]
    pub fn status_payload(&self) -> Value {
        json!({
            "eventId": self.event_id,
            "eventType": self.event_type,
            "adapter": self.adapter,
            "clusterId": self.cluster_id,
            "disposition": self.disposition,
            "retryable": self.retryable,
            "error": self.error,
            "tasks": self.tasks,
            "reportedAt": Utc::now().to_rfc3339(),
        })
    }
}
