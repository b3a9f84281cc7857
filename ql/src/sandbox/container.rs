//! Container sandbox - docker CLI backend
//!
//! Each command runs in a fresh container with cgroup limits from the
//! session's [`SandboxConfig`]; the workspace is a host directory bind-
//! mounted at `/workspace` so files persist across the session's commands.
//! Containers are force-removed on every exit path, including drop.

use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cancel::CancelToken;

use super::backend::{SandboxBackend, SandboxSession};
use super::{ExecutionResult, KILL_GRACE, SandboxCommand, SandboxConfig, SandboxError, SandboxMetrics};

/// Docker CLI backend
pub struct ContainerBackend {
    /// Docker binary, normally just "docker"
    binary: String,
}

impl ContainerBackend {
    pub fn new() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }
}

impl Default for ContainerBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SandboxBackend for ContainerBackend {
    async fn create(&self, config: &SandboxConfig) -> Result<Box<dyn SandboxSession>, SandboxError> {
        debug!(image = %config.image, "ContainerBackend::create: called");
        let workspace = TempDir::with_prefix("ql-sbx-").map_err(|e| SandboxError::Create(e.to_string()))?;
        let name = format!("ql-sbx-{}", Uuid::now_v7().simple());
        Ok(Box::new(ContainerSession {
            binary: self.binary.clone(),
            name,
            workspace,
            config: config.clone(),
            command_seq: 0,
        }))
    }

    fn name(&self) -> &'static str {
        "container"
    }
}

struct ContainerSession {
    binary: String,
    /// Base container name; each command appends a sequence number
    name: String,
    workspace: TempDir,
    config: SandboxConfig,
    command_seq: u32,
}

impl ContainerSession {
    fn container_name(&self) -> String {
        format!("{}-{}", self.name, self.command_seq)
    }

    /// docker run argument list for one command
    fn run_args(&self, container: &str, argv: &[String]) -> Vec<String> {
        let limits = &self.config.limits;
        let mount = format!(
            "{}:{}{}",
            self.workspace.path().display(),
            self.config.workdir,
            if self.config.read_only { ":ro" } else { "" }
        );

        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            container.to_string(),
            "--cpu-period".to_string(),
            limits.cpu_period.to_string(),
            "--cpu-quota".to_string(),
            limits.cpu_quota.to_string(),
            "--memory".to_string(),
            limits.memory_bytes.to_string(),
            "--memory-swap".to_string(),
            limits.memory_swap_bytes.to_string(),
            "--pids-limit".to_string(),
            limits.pids_limit.to_string(),
            "-v".to_string(),
            mount,
            "-w".to_string(),
            self.config.workdir.clone(),
        ];

        if self.config.no_network {
            args.push("--network".to_string());
            args.push("none".to_string());
        } else if self.config.network.outbound_allowed {
            // Egress filtering to allowed_hosts/blocked_ports is enforced by
            // the runtime's bridge configuration; the policy rides along for
            // in-container tooling.
            args.push("-e".to_string());
            let hosts: Vec<&str> = self.config.network.allowed_hosts.iter().map(String::as_str).collect();
            args.push(format!("QL_ALLOWED_HOSTS={}", hosts.join(",")));
        } else {
            args.push("--network".to_string());
            args.push("none".to_string());
        }

        for (key, value) in &self.config.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }

        args.push(self.config.image.clone());
        args.extend(argv.iter().cloned());
        args
    }

    async fn docker(&self, args: &[String]) -> Result<std::process::Output, SandboxError> {
        tokio::process::Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| SandboxError::Create(format!("docker not runnable: {}", e)))
    }

    async fn force_remove(&self, container: &str) {
        let _ = self
            .docker(&["rm".to_string(), "-f".to_string(), container.to_string()])
            .await;
    }

    async fn run(&mut self, argv: &[String], mut cancel: CancelToken) -> Result<ExecutionResult, SandboxError> {
        self.command_seq += 1;
        let container = self.container_name();
        let args = self.run_args(&container, argv);
        debug!(%container, ?argv, "ContainerSession::run: starting container");

        let started = Instant::now();
        let mut child = tokio::process::Command::new(&self.binary)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::Create(format!("docker not runnable: {}", e)))?;

        let mut stdout_pipe = child.stdout.take().expect("stdout piped");
        let mut stderr_pipe = child.stderr.take().expect("stderr piped");
        let stdout_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stdout_pipe.read_to_string(&mut buf).await;
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr_pipe.read_to_string(&mut buf).await;
            buf
        });

        let timeout = std::time::Duration::from_secs(self.config.timeout_secs);
        let status = tokio::select! {
            status = child.wait() => status.map_err(SandboxError::Io)?,
            _ = tokio::time::sleep(timeout) => {
                warn!(%container, timeout_secs = self.config.timeout_secs, "container timed out, escalating");
                let _ = self
                    .docker(&["kill".to_string(), "-s".to_string(), "TERM".to_string(), container.clone()])
                    .await;
                if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_err() {
                    self.force_remove(&container).await;
                    let _ = child.start_kill();
                }
                return Err(SandboxError::Timeout(self.config.timeout_secs));
            }
            _ = cancel.cancelled() => {
                debug!(%container, "ContainerSession::run: cancelled, tearing down");
                self.force_remove(&container).await;
                let _ = child.start_kill();
                return Err(SandboxError::Cancelled);
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        let exit_code = status.code().unwrap_or(-1);
        debug!(%container, exit_code, "ContainerSession::run: complete");

        // OOM-killed containers surface as 137 from the runtime
        if exit_code == 137 && !cancel.is_cancelled() {
            return Err(SandboxError::ResourceExceeded("memory limit (oom kill)".to_string()));
        }

        Ok(ExecutionResult {
            exit_code,
            stdout,
            stderr,
            duration_ms: started.elapsed().as_millis() as u64,
            metrics: SandboxMetrics::default(),
        })
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<ExecutionResult, SandboxError> {
        use std::path::{Component, Path};
        let rel = Path::new(path);
        if rel.is_absolute() || rel.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(SandboxError::Create(format!("path escapes workspace: {}", path)));
        }
        let full = self.workspace.path().join(rel);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, content).await?;

        Ok(ExecutionResult {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
            metrics: SandboxMetrics {
                bytes_written: content.len() as u64,
                ..Default::default()
            },
        })
    }
}

#[async_trait]
impl SandboxSession for ContainerSession {
    async fn exec(&mut self, command: &SandboxCommand, cancel: CancelToken) -> Result<ExecutionResult, SandboxError> {
        if cancel.is_cancelled() {
            return Err(SandboxError::Cancelled);
        }
        match command {
            SandboxCommand::WriteFile { path, content } => self.write_file(path, content).await,
            SandboxCommand::Exec { argv, .. } => self.run(argv, cancel).await,
        }
    }

    async fn destroy(&mut self) -> Result<(), SandboxError> {
        debug!(name = %self.name, "ContainerSession::destroy: called");
        let container = self.container_name();
        self.force_remove(&container).await;
        Ok(())
    }
}

impl Drop for ContainerSession {
    fn drop(&mut self) {
        // Best-effort synchronous cleanup for panic and cancellation paths
        let container = self.container_name();
        let _ = std::process::Command::new(&self.binary)
            .args(["rm", "-f", &container])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
}
