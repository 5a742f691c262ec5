//! Audit trail of completed tasks.
//!
//! An [`audit_listener`] registered on a task records one [`AuditEvent`] when
//! the task finishes, whatever its outcome.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use super::task::{Listener, TaskContext, TaskOutcome};
use crate::model::HubResult;
use crate::util::clock::now_ms;

/// Audit event structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: String,
    /// Stream id of the task.
    pub stream_id: String,
    /// Principal the task ran for.
    pub principal: Option<String>,
    /// Action taken (complete, fail).
    pub action: String,
    /// Short outcome description.
    pub outcome: String,
    /// Timestamp milliseconds.
    pub created_at_ms: u64,
}

/// Audit sink abstraction.
pub trait AuditSink: Send + Sync {
    /// Record an audit event.
    fn record(&self, event: AuditEvent);
}

/// In-memory audit sink for testing and dev.
pub struct InMemoryAuditSink {
    events: Mutex<VecDeque<AuditEvent>>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(max_events)),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().iter().cloned().collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Helper to build an audit event from a task context.
pub fn build_audit_event(
    context: &TaskContext,
    action: impl Into<String>,
    outcome: impl Into<String>,
) -> AuditEvent {
    AuditEvent {
        event_id: uuid::Uuid::new_v4().to_string(),
        stream_id: context.stream_id.clone(),
        principal: context.principal.clone(),
        action: action.into(),
        outcome: outcome.into(),
        created_at_ms: now_ms(),
    }
}

fn describe(outcome: &TaskOutcome<HubResult>) -> (&'static str, String) {
    match outcome {
        Ok(HubResult::Success(ok)) => (
            "complete",
            format!(
                "success inserted={} updated={} deleted={}",
                ok.inserted.len(),
                ok.updated.len(),
                ok.deleted.len()
            ),
        ),
        Ok(HubResult::Error(err)) => ("complete", format!("error {}", err.kind)),
        Ok(HubResult::NoResult) => ("complete", "no result".to_owned()),
        Err(fault) => ("fail", fault.to_string()),
    }
}

/// Listener that records the outcome of a pipeline task in `sink`.
pub fn audit_listener(sink: Arc<dyn AuditSink>, context: &TaskContext) -> Listener<HubResult> {
    let context = context.clone();
    Arc::new(move |outcome: &TaskOutcome<HubResult>| {
        let (action, description) = describe(outcome);
        sink.record(build_audit_event(&context, action, description));
    })
}
