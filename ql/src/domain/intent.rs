//! Intent domain type
//!
//! One intent seeds one orchestration run. The orchestrator is the only
//! component that mutates it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::id;
use super::task::Task;

/// Intent lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// A free-text user request and its run state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    /// Identifier (`QLI-<unix-nano>`)
    pub id: String,

    /// Raw user text
    pub text: String,

    /// Decomposed tasks, in the order the parser emitted them
    #[serde(default)]
    pub tasks: Vec<Task>,

    /// Current lifecycle status
    pub status: IntentStatus,

    /// Overall score in [0, 100] once the run completes
    #[serde(default)]
    pub overall_score: u8,

    /// Wall-clock execution time of the run
    #[serde(default)]
    pub execution_time_ms: u64,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update
    pub updated_at: DateTime<Utc>,

    /// Completion timestamp (set on completed/failed)
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Intent {
    /// Create a new pending intent from raw user text
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        debug!(text_len = text.len(), "Intent::new: called");
        let now = Utc::now();
        Self {
            id: id::intent_id(),
            text,
            tasks: Vec::new(),
            status: IntentStatus::Pending,
            overall_score: 0,
            execution_time_ms: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Update the status, stamping completion when terminal
    pub fn set_status(&mut self, status: IntentStatus) {
        debug!(%self.id, from = %self.status, to = %status, "Intent::set_status");
        self.status = status;
        self.updated_at = Utc::now();
        if matches!(status, IntentStatus::Completed | IntentStatus::Failed) {
            self.completed_at = Some(self.updated_at);
        }
    }
}
