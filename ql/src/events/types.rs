//! Event vocabulary for the orchestration pipeline
//!
//! Every observable state change is an [`Event`]: an envelope with a stable
//! id, RFC 3339 timestamp and source component, wrapping one typed
//! [`EventKind`]. On the wire an event serializes to
//! `{ id, timestamp, source, type, payload }`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Typed event payloads; the serde tag is the well-known event type string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum EventKind {
    // === Task lifecycle ===
    #[serde(rename = "task.started")]
    TaskStarted { task_id: String, agent_id: String },

    #[serde(rename = "task.completed")]
    TaskCompleted {
        task_id: String,
        agent_id: String,
        output_size: usize,
        duration_ms: u64,
        sandbox_success: bool,
        security_score: u8,
        execution_time_ms: u64,
        validation_score: u8,
        validation_passed: bool,
    },

    #[serde(rename = "task.failed")]
    TaskFailed {
        task_id: String,
        error_kind: String,
        message: String,
        retryable: bool,
    },

    #[serde(rename = "task.skipped")]
    TaskSkipped {
        task_id: String,
        /// Id of the failed dependency that induced the skip
        skip_cause: String,
    },

    // === Workflow lifecycle ===
    #[serde(rename = "workflow.started")]
    WorkflowStarted { intent_id: String, task_count: usize },

    #[serde(rename = "workflow.completed")]
    WorkflowCompleted {
        intent_id: String,
        overall_score: u8,
        execution_time_ms: u64,
    },

    #[serde(rename = "workflow.failed")]
    WorkflowFailed {
        intent_id: String,
        error: String,
        failed_tasks: Vec<String>,
    },

    #[serde(rename = "workflow.paused")]
    WorkflowPaused { intent_id: String, reason: String },

    #[serde(rename = "workflow.resumed")]
    WorkflowResumed { intent_id: String },

    #[serde(rename = "workflow.cancelled")]
    WorkflowCancelled { intent_id: String },

    // === Diagnostics ===
    /// A subscriber's buffer overflowed and `missed` oldest events were
    /// dropped
    #[serde(rename = "bus.dropped")]
    BusDropped { missed: u64 },
}

impl EventKind {
    /// The well-known type string for this event
    pub fn type_str(&self) -> &'static str {
        match self {
            Self::TaskStarted { .. } => "task.started",
            Self::TaskCompleted { .. } => "task.completed",
            Self::TaskFailed { .. } => "task.failed",
            Self::TaskSkipped { .. } => "task.skipped",
            Self::WorkflowStarted { .. } => "workflow.started",
            Self::WorkflowCompleted { .. } => "workflow.completed",
            Self::WorkflowFailed { .. } => "workflow.failed",
            Self::WorkflowPaused { .. } => "workflow.paused",
            Self::WorkflowResumed { .. } => "workflow.resumed",
            Self::WorkflowCancelled { .. } => "workflow.cancelled",
            Self::BusDropped { .. } => "bus.dropped",
        }
    }

    /// The task id this event concerns, when it concerns one
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::TaskStarted { task_id, .. }
            | Self::TaskCompleted { task_id, .. }
            | Self::TaskFailed { task_id, .. }
            | Self::TaskSkipped { task_id, .. } => Some(task_id),
            _ => None,
        }
    }
}

/// Canonical event envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event id (UUIDv7, so ids sort by time)
    pub id: String,

    /// Publication timestamp
    pub timestamp: DateTime<Utc>,

    /// Component that published the event
    pub source: String,

    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    /// Wrap a kind in a fresh envelope
    pub fn new(source: impl Into<String>, kind: EventKind) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            timestamp: Utc::now(),
            source: source.into(),
            kind,
        }
    }

    /// The well-known type string
    pub fn type_str(&self) -> &'static str {
        self.kind.type_str()
    }
}
