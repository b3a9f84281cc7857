//! Task domain type
//!
//! A task is one atomic unit of work: typed, prioritised, with an ordered
//! set of dependency task ids. Tasks are produced by the intent parser and
//! only their status mutates once the graph is built.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::id;

/// The kind of work a task represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Codegen,
    Infra,
    Test,
    Doc,
    Analyze,
}

impl TaskType {
    /// Parse a type string as emitted by the decomposition model
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "codegen" | "code" | "code_generation" => Some(Self::Codegen),
            "infra" | "infrastructure" => Some(Self::Infra),
            "test" | "tests" | "testing" => Some(Self::Test),
            "doc" | "docs" | "documentation" => Some(Self::Doc),
            "analyze" | "analysis" => Some(Self::Analyze),
            _ => None,
        }
    }

    /// Project type used when building an agent execution context
    pub fn project_type(&self) -> &'static str {
        match self {
            Self::Codegen | Self::Test => "golang-service",
            Self::Infra => "kubernetes-cluster",
            Self::Doc => "documentation",
            Self::Analyze => "analysis",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Codegen => "codegen",
            Self::Infra => "infra",
            Self::Test => "test",
            Self::Doc => "doc",
            Self::Analyze => "analyze",
        };
        write!(f, "{}", s)
    }
}

/// Task priority, ordered so that `High > Medium > Low`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    /// Parse a priority string from the decomposition model
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Some(Self::High),
            "medium" | "normal" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        };
        write!(f, "{}", s)
    }
}

/// Task lifecycle status
///
/// Transitions: pending → queued → running → (completed | failed | cancelled),
/// failed → retrying → queued, and skipped for dependency-induced drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Skipped,
    Cancelled,
    Retrying,
}

impl TaskStatus {
    /// Whether this status is terminal for the executor
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped | Self::Cancelled)
    }

    /// Whether a transition from `self` to `next` is legal
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Queued)
                | (Pending, Skipped)
                | (Pending, Cancelled)
                | (Queued, Running)
                | (Queued, Cancelled)
                | (Queued, Skipped)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Failed, Retrying)
                | (Retrying, Queued)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
            Self::Retrying => "retrying",
        };
        write!(f, "{}", s)
    }
}

/// An atomic unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Canonical identifier (`QL-<TYPE3>-<YYYYMMDD>-<NNN>`)
    pub id: String,

    /// Kind of work
    #[serde(rename = "type")]
    pub task_type: TaskType,

    /// What the agent is asked to produce
    pub description: String,

    /// Ids of tasks that must complete first (ordered, de-duplicated)
    pub dependencies: Vec<String>,

    /// Scheduling priority
    pub priority: Priority,

    /// Current lifecycle status
    pub status: TaskStatus,

    /// Agent assigned by the executor, if any
    #[serde(default)]
    pub agent_id: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last status change
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a new pending task with a generated canonical id
    pub fn new(task_type: TaskType, description: impl Into<String>) -> Self {
        let description = description.into();
        debug!(%task_type, %description, "Task::new: called");
        let now = Utc::now();
        Self {
            id: id::task_id(task_type),
            task_type,
            description,
            dependencies: Vec::new(),
            priority: Priority::Medium,
            status: TaskStatus::Pending,
            agent_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create with a specific id (tests, replay)
    pub fn with_id(id: impl Into<String>, task_type: TaskType, description: impl Into<String>) -> Self {
        let mut task = Self::new(task_type, description);
        task.id = id.into();
        task
    }

    /// Builder method to set dependencies
    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.dependencies = deps;
        self
    }

    /// Builder method to set priority
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Update the status, refreshing the updated_at timestamp
    pub fn set_status(&mut self, status: TaskStatus) {
        debug!(%self.id, from = %self.status, to = %status, "Task::set_status");
        self.status = status;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_type_parse() {
        assert_eq!(TaskType::parse("codegen"), Some(TaskType::Codegen));
        assert_eq!(TaskType::parse("Infrastructure"), Some(TaskType::Infra));
        assert_eq!(TaskType::parse("TESTS"), Some(TaskType::Test));
        assert_eq!(TaskType::parse("documentation"), Some(TaskType::Doc));
        assert_eq!(TaskType::parse("analysis"), Some(TaskType::Analyze));
        assert_eq!(TaskType::parse("banana"), None);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!(Priority::parse("high"), Some(Priority::High));
        assert_eq!(Priority::parse("Medium"), Some(Priority::Medium));
        assert_eq!(Priority::parse("low"), Some(Priority::Low));
        assert_eq!(Priority::parse("urgent"), None);
    }

    #[test]
    fn test_status_transitions() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(Queued));
        assert!(Queued.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Retrying));
        assert!(Retrying.can_transition_to(Queued));

        assert!(!Pending.can_transition_to(Running));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Completed));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Skipped.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(!TaskStatus::Retrying.is_terminal());
    }

    #[test]
    fn test_task_new_defaults() {
        let task = Task::new(TaskType::Codegen, "Build the handlers");
        assert!(task.id.starts_with("QL-DEV-"));
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, Priority::Medium);
        assert!(task.dependencies.is_empty());
        assert!(task.agent_id.is_none());
    }

    #[test]
    fn test_task_serde_roundtrip() {
        let task = Task::new(TaskType::Infra, "Provision the cluster")
            .with_priority(Priority::High)
            .with_dependencies(vec!["QL-DEV-20250101-001".to_string()]);

        let json = serde_json::to_string(&task).unwrap();
        assert!(json.contains("\"type\":\"infra\""));
        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, task.id);
        assert_eq!(back.task_type, TaskType::Infra);
        assert_eq!(back.priority, Priority::High);
    }
}
