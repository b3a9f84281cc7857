//! Per-task execution results and the task-level error taxonomy

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sandbox::{SandboxErrorKind, SandboxMetrics};
use crate::validation::ValidationResult;

/// Why a task ended in a non-completed state
///
/// This is the serializable summary attached to results and events; the
/// richer module errors (`SandboxError`, `LlmError`) collapse into it at
/// the agent boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskError {
    /// The LLM backend failed after adapter-level retries
    #[error("llm backend error: {message}")]
    Llm { message: String, retryable: bool },

    /// A sandbox command failed, timed out, or could not start
    #[error("sandbox {kind}: {message}")]
    Sandbox { kind: SandboxErrorKind, message: String },

    /// The aggregate per-task budget (LLM + sandbox + validation) expired
    #[error("task timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// An upstream dependency failed; this task was never attempted
    #[error("dependency {task_id} failed")]
    DependencyFailed { task_id: String },

    /// The run was cancelled while this task was pending or running
    #[error("cancelled")]
    Cancelled,
}

impl TaskError {
    /// Short kind string for event payloads
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Llm { .. } => "llm",
            Self::Sandbox { .. } => "sandbox",
            Self::Timeout { .. } => "timeout",
            Self::DependencyFailed { .. } => "dependency_failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the executor's retry policy may re-queue the task
    ///
    /// Dependency-induced skips are never retried at the dependent; the
    /// root failure is the one to retry. Cancellation is final.
    pub fn retryable(&self) -> bool {
        match self {
            Self::Llm { retryable, .. } => *retryable,
            Self::Sandbox { kind, .. } => kind.retryable(),
            Self::Timeout { .. } => true,
            Self::DependencyFailed { .. } => false,
            Self::Cancelled => false,
        }
    }
}

/// Everything one agent produced for one task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExecutionResult {
    /// Task this result belongs to
    pub task_id: String,

    /// Agent that executed it (`<TYPE3>-AGT-<HHMMSS>-<NNN>`)
    pub agent_id: String,

    /// LLM output followed by the sandbox transcript
    pub output: String,

    /// Files the model declared, path → content
    #[serde(default)]
    pub files: BTreeMap<String, String>,

    /// Aggregated metrics across the task's sandbox commands
    pub sandbox_metrics: SandboxMetrics,

    /// Whether every sandbox command exited zero
    pub sandbox_success: bool,

    /// Denylist-based score in [0, 100]
    pub security_score: u8,

    /// Validation verdict; None when the validator itself failed
    pub validation: Option<ValidationResult>,

    /// Terminal error, if the task did not complete
    pub error: Option<TaskError>,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl AgentExecutionResult {
    /// Whether the task ran to completion (validation quality aside)
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Wall-clock duration of the task
    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at).num_milliseconds().max(0) as u64
    }

    /// A result representing a task that was never attempted
    pub fn not_run(task_id: impl Into<String>, error: TaskError) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            agent_id: String::new(),
            output: String::new(),
            files: BTreeMap::new(),
            sandbox_metrics: SandboxMetrics::default(),
            sandbox_success: false,
            security_score: 0,
            validation: None,
            error: Some(error),
            started_at: now,
            finished_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let e = TaskError::DependencyFailed {
            task_id: "QL-DEV-20250101-001".to_string(),
        };
        assert_eq!(e.kind(), "dependency_failed");
        assert!(!e.retryable());

        let e = TaskError::Timeout { timeout_ms: 1000 };
        assert_eq!(e.kind(), "timeout");
        assert!(e.retryable());

        assert!(!TaskError::Cancelled.retryable());
    }

    #[test]
    fn test_sandbox_error_retryability() {
        let create = TaskError::Sandbox {
            kind: SandboxErrorKind::Create,
            message: "no runtime".to_string(),
        };
        assert!(!create.retryable());

        let exit = TaskError::Sandbox {
            kind: SandboxErrorKind::Exit,
            message: "exit code 1".to_string(),
        };
        assert!(exit.retryable());
    }

    #[test]
    fn test_error_serde_tagging() {
        let e = TaskError::Llm {
            message: "rate limited".to_string(),
            retryable: true,
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["type"], "llm");
        assert_eq!(json["retryable"], true);

        let e = TaskError::Sandbox {
            kind: SandboxErrorKind::Timeout,
            message: "slow".to_string(),
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["type"], "sandbox");
        assert_eq!(json["kind"], "timeout");
    }

    #[test]
    fn test_not_run_result() {
        let r = AgentExecutionResult::not_run("t1", TaskError::Cancelled);
        assert!(!r.is_success());
        assert_eq!(r.duration_ms(), 0);
        assert!(r.files.is_empty());
    }
}
