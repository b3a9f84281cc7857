//! Sandboxed command execution
//!
//! Agents never touch the host directly: every generated command runs in an
//! ephemeral, resource-limited, optionally network-isolated session created
//! through a [`SandboxBackend`]. Backend-specific types never cross the
//! trait boundary.
//!
//! Three backends ship: a container runtime (docker CLI), a supervised
//! local-process fallback, and an in-process stub for tests.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::TaskType;

pub mod backend;
pub mod container;
pub mod process;
pub mod stub;

pub use backend::{SandboxBackend, SandboxSession};
pub use container::ContainerBackend;
pub use process::ProcessBackend;
pub use stub::StubBackend;

/// Default command timeout when no per-type override applies
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Grace period between SIGTERM and SIGKILL on timeout
pub const KILL_GRACE: Duration = Duration::from_secs(5);

/// cgroup-level resource limits applied at session start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU quota in microseconds per period (quota/period = cores)
    pub cpu_quota: u64,
    pub cpu_period: u64,
    /// Memory ceiling in bytes
    pub memory_bytes: u64,
    /// Memory+swap ceiling in bytes
    pub memory_swap_bytes: u64,
    pub pids_limit: u64,
    /// Block-device quota in bytes
    pub disk_quota_bytes: u64,
}

impl ResourceLimits {
    /// Limits expressed as a fraction of one core plus byte ceilings
    pub fn with_cores(cores: f64, memory_bytes: u64, pids_limit: u64, disk_quota_bytes: u64) -> Self {
        let cpu_period = 100_000;
        Self {
            cpu_quota: (cores * cpu_period as f64) as u64,
            cpu_period,
            memory_bytes,
            memory_swap_bytes: memory_bytes,
            pids_limit,
            disk_quota_bytes,
        }
    }
}

/// Egress policy for a sandbox session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NetworkPolicy {
    pub outbound_allowed: bool,
    /// Hosts reachable through the egress filter (DNS + TCP)
    pub allowed_hosts: BTreeSet<String>,
    /// Destination ports rejected even for allowed hosts
    pub blocked_ports: BTreeSet<u16>,
}

impl NetworkPolicy {
    pub fn denied() -> Self {
        Self::default()
    }

    pub fn allow_hosts<I: IntoIterator<Item = &'static str>>(hosts: I) -> Self {
        Self {
            outbound_allowed: true,
            allowed_hosts: hosts.into_iter().map(String::from).collect(),
            blocked_ports: BTreeSet::new(),
        }
    }
}

/// Full configuration for one sandbox session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Container image reference (advisory for non-container backends)
    pub image: String,
    /// Working directory inside the session
    pub workdir: String,
    /// Environment variables, in declaration order
    pub env: Vec<(String, String)>,
    pub limits: ResourceLimits,
    pub network: NetworkPolicy,
    pub timeout_secs: u64,
    /// Mount the workspace read-only
    pub read_only: bool,
    /// No network interfaces at all
    pub no_network: bool,
}

impl SandboxConfig {
    /// Per-type defaults
    pub fn for_task_type(task_type: TaskType) -> Self {
        const GIB: u64 = 1024 * 1024 * 1024;
        const MIB: u64 = 1024 * 1024;

        match task_type {
            TaskType::Codegen | TaskType::Test => Self {
                image: "golang:1.22-alpine".to_string(),
                workdir: "/workspace".to_string(),
                env: vec![("GOFLAGS".to_string(), "-mod=mod".to_string())],
                limits: ResourceLimits::with_cores(1.0, GIB, 512, 2 * GIB),
                network: NetworkPolicy::allow_hosts(["proxy.golang.org", "sum.golang.org", "github.com"]),
                timeout_secs: if task_type == TaskType::Test { 900 } else { 600 },
                read_only: false,
                no_network: false,
            },
            TaskType::Infra => Self {
                image: "alpine/terragrunt:latest".to_string(),
                workdir: "/workspace".to_string(),
                env: vec![("TF_IN_AUTOMATION".to_string(), "1".to_string())],
                limits: ResourceLimits::with_cores(0.5, 512 * MIB, 512, GIB),
                network: NetworkPolicy::allow_hosts(["amazonaws.com", "azure.com", "googleapis.com"]),
                timeout_secs: 1800,
                read_only: false,
                no_network: false,
            },
            TaskType::Doc => Self {
                image: "pandoc/core:latest".to_string(),
                workdir: "/workspace".to_string(),
                env: vec![],
                limits: ResourceLimits::with_cores(1.0, 512 * MIB, 256, GIB),
                network: NetworkPolicy::denied(),
                timeout_secs: 300,
                read_only: false,
                no_network: true,
            },
            TaskType::Analyze => Self {
                image: "alpine:3.20".to_string(),
                workdir: "/workspace".to_string(),
                env: vec![],
                limits: ResourceLimits::with_cores(2.0, 2 * GIB, 512, GIB),
                network: NetworkPolicy::denied(),
                timeout_secs: 1200,
                read_only: false,
                no_network: true,
            },
        }
    }
}

/// One instruction for a sandbox session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SandboxCommand {
    /// Materialize a file under the workspace
    WriteFile { path: String, content: String },
    /// Run a program with arguments
    Exec { argv: Vec<String>, stdin: Option<String> },
}

impl SandboxCommand {
    pub fn exec<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Exec {
            argv: argv.into_iter().map(Into::into).collect(),
            stdin: None,
        }
    }

    pub fn write_file(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self::WriteFile {
            path: path.into(),
            content: content.into(),
        }
    }

    /// Rendering used in transcripts and security scans
    pub fn display_line(&self) -> String {
        match self {
            Self::WriteFile { path, .. } => format!("write {}", path),
            Self::Exec { argv, .. } => argv.join(" "),
        }
    }
}

/// Resource usage observed for one command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SandboxMetrics {
    pub peak_memory_bytes: u64,
    pub cpu_time_ms: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl SandboxMetrics {
    /// Component-wise aggregation across a task's commands
    pub fn merge(&mut self, other: &SandboxMetrics) {
        self.peak_memory_bytes = self.peak_memory_bytes.max(other.peak_memory_bytes);
        self.cpu_time_ms += other.cpu_time_ms;
        self.bytes_read += other.bytes_read;
        self.bytes_written += other.bytes_written;
    }
}

/// Outcome of one completed command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub metrics: SandboxMetrics,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Serializable failure-kind summary used in task errors and events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxErrorKind {
    Create,
    Timeout,
    ResourceExceeded,
    Exit,
    Cancelled,
    Io,
}

impl SandboxErrorKind {
    /// Whether the executor's task retry policy may re-queue after this
    pub fn retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::ResourceExceeded | Self::Exit)
    }
}

impl std::fmt::Display for SandboxErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Timeout => "timeout",
            Self::ResourceExceeded => "resource_exceeded",
            Self::Exit => "exit",
            Self::Cancelled => "cancelled",
            Self::Io => "io",
        };
        write!(f, "{}", s)
    }
}

/// Sandbox failure modes
///
/// A non-zero exit is reported through [`ExecutionResult::exit_code`], not
/// as an error; the agent decides whether to stop. `Exit` exists for
/// callers that want to promote an exit code into an error.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to create sandbox: {0}")]
    Create(String),

    #[error("command timed out after {0} s")]
    Timeout(u64),

    #[error("resource limit exceeded: {0}")]
    ResourceExceeded(String),

    #[error("command exited with code {0}")]
    Exit(i32),

    #[error("cancelled")]
    Cancelled,

    #[error("sandbox io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    pub fn kind(&self) -> SandboxErrorKind {
        match self {
            Self::Create(_) => SandboxErrorKind::Create,
            Self::Timeout(_) => SandboxErrorKind::Timeout,
            Self::ResourceExceeded(_) => SandboxErrorKind::ResourceExceeded,
            Self::Exit(_) => SandboxErrorKind::Exit,
            Self::Cancelled => SandboxErrorKind::Cancelled,
            Self::Io(_) => SandboxErrorKind::Io,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codegen_defaults() {
        let config = SandboxConfig::for_task_type(TaskType::Codegen);
        assert_eq!(config.image, "golang:1.22-alpine");
        assert_eq!(config.limits.cpu_quota, 100_000);
        assert_eq!(config.limits.memory_bytes, 1024 * 1024 * 1024);
        assert_eq!(config.limits.pids_limit, 512);
        assert_eq!(config.timeout_secs, 600);
        assert!(config.network.allowed_hosts.contains("proxy.golang.org"));
        assert!(!config.no_network);
    }

    #[test]
    fn test_test_tasks_get_longer_timeout() {
        assert_eq!(SandboxConfig::for_task_type(TaskType::Test).timeout_secs, 900);
    }

    #[test]
    fn test_infra_defaults() {
        let config = SandboxConfig::for_task_type(TaskType::Infra);
        assert_eq!(config.limits.cpu_quota, 50_000);
        assert_eq!(config.timeout_secs, 1800);
        assert!(config.network.allowed_hosts.contains("amazonaws.com"));
    }

    #[test]
    fn test_offline_types_have_no_network() {
        assert!(SandboxConfig::for_task_type(TaskType::Doc).no_network);
        assert!(SandboxConfig::for_task_type(TaskType::Analyze).no_network);
        assert_eq!(SandboxConfig::for_task_type(TaskType::Analyze).limits.cpu_quota, 200_000);
    }

    #[test]
    fn test_metrics_merge() {
        let mut a = SandboxMetrics {
            peak_memory_bytes: 100,
            cpu_time_ms: 10,
            bytes_read: 1,
            bytes_written: 2,
        };
        let b = SandboxMetrics {
            peak_memory_bytes: 50,
            cpu_time_ms: 5,
            bytes_read: 3,
            bytes_written: 4,
        };
        a.merge(&b);
        assert_eq!(a.peak_memory_bytes, 100);
        assert_eq!(a.cpu_time_ms, 15);
        assert_eq!(a.bytes_read, 4);
        assert_eq!(a.bytes_written, 6);
    }

    #[test]
    fn test_error_kinds_retryability() {
        assert!(!SandboxError::Create("x".into()).kind().retryable());
        assert!(SandboxError::Timeout(300).kind().retryable());
        assert!(SandboxError::Exit(2).kind().retryable());
        assert!(!SandboxError::Cancelled.kind().retryable());
    }

    #[test]
    fn test_command_display() {
        let cmd = SandboxCommand::exec(["go", "build", "-o", "output", "."]);
        assert_eq!(cmd.display_line(), "go build -o output .");
        let cmd = SandboxCommand::write_file("main.go", "package main");
        assert_eq!(cmd.display_line(), "write main.go");
    }
}
