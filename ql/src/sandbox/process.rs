//! Process sandbox - supervised local subprocess fallback
//!
//! Used where no container runtime is available. Isolation is weaker than
//! the container backend (no cgroup enforcement): commands run in a
//! throwaway workspace directory with a scrubbed environment, a hard
//! timeout with SIGTERM→SIGKILL escalation, and rusage-derived metrics.

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use nix::sys::resource::{UsageWho, getrusage};
use nix::sys::signal::{Signal, kill};
use nix::sys::time::TimeValLike;
use nix::unistd::Pid;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::cancel::CancelToken;

use super::backend::{SandboxBackend, SandboxSession};
use super::{ExecutionResult, KILL_GRACE, SandboxCommand, SandboxConfig, SandboxError, SandboxMetrics};

/// Local-process backend
pub struct ProcessBackend;

#[async_trait]
impl SandboxBackend for ProcessBackend {
    async fn create(&self, config: &SandboxConfig) -> Result<Box<dyn SandboxSession>, SandboxError> {
        debug!(image = %config.image, "ProcessBackend::create: called");
        let workspace = TempDir::with_prefix("ql-sbx-").map_err(|e| SandboxError::Create(e.to_string()))?;
        Ok(Box::new(ProcessSession {
            workspace,
            config: config.clone(),
        }))
    }

    fn name(&self) -> &'static str {
        "process"
    }
}

/// One live workspace with its configuration
///
/// The TempDir handle removes the workspace when the session drops, so
/// teardown is guaranteed even on panic paths.
struct ProcessSession {
    workspace: TempDir,
    config: SandboxConfig,
}

impl ProcessSession {
    /// Resolve a workspace-relative path, rejecting escapes
    fn resolve(&self, path: &str) -> Result<PathBuf, SandboxError> {
        let rel = Path::new(path);
        if rel.is_absolute() || rel.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(SandboxError::Create(format!("path escapes workspace: {}", path)));
        }
        Ok(self.workspace.path().join(rel))
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<ExecutionResult, SandboxError> {
        if self.config.read_only {
            return Err(SandboxError::Create("workspace is read-only".to_string()));
        }
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, content).await?;
        debug!(?full, bytes = content.len(), "ProcessSession::write_file: wrote");

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

    async fn run(
        &self,
        argv: &[String],
        stdin: Option<&str>,
        mut cancel: CancelToken,
    ) -> Result<ExecutionResult, SandboxError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| SandboxError::Create("empty argv".to_string()))?;
        debug!(%program, ?args, "ProcessSession::run: spawning");

        let usage_before = getrusage(UsageWho::RUSAGE_CHILDREN).ok();
        let started = Instant::now();

        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .current_dir(self.workspace.path())
            .env_clear()
            .env("PATH", std::env::var("PATH").unwrap_or_default())
            .env("HOME", self.workspace.path())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .kill_on_drop(true);
        for (key, value) in &self.config.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|e| SandboxError::Create(e.to_string()))?;
        let pid = child.id().map(|id| Pid::from_raw(id as i32));

        if let (Some(body), Some(mut handle)) = (stdin, child.stdin.take()) {
            let body = body.to_string();
            tokio::spawn(async move {
                let _ = handle.write_all(body.as_bytes()).await;
            });
        }

        // Drain pipes concurrently so the child never blocks on a full pipe
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

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let status = tokio::select! {
            status = child.wait() => status.map_err(SandboxError::Io)?,
            _ = tokio::time::sleep(timeout) => {
                warn!(%program, timeout_secs = self.config.timeout_secs, "command timed out, escalating");
                Self::terminate(&mut child, pid).await;
                return Err(SandboxError::Timeout(self.config.timeout_secs));
            }
            _ = cancel.cancelled() => {
                debug!(%program, "ProcessSession::run: cancelled, terminating child");
                Self::terminate(&mut child, pid).await;
                return Err(SandboxError::Cancelled);
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        let duration_ms = started.elapsed().as_millis() as u64;

        let metrics = match (usage_before, getrusage(UsageWho::RUSAGE_CHILDREN).ok()) {
            (Some(before), Some(after)) => {
                let cpu = (after.user_time() + after.system_time()) - (before.user_time() + before.system_time());
                SandboxMetrics {
                    peak_memory_bytes: (after.max_rss().max(0) as u64) * 1024,
                    cpu_time_ms: (cpu.num_milliseconds().max(0)) as u64,
                    bytes_read: ((after.block_reads() - before.block_reads()).max(0) as u64) * 512,
                    bytes_written: ((after.block_writes() - before.block_writes()).max(0) as u64) * 512,
                }
            }
            _ => SandboxMetrics::default(),
        };

        let exit_code = status.code().unwrap_or(-1);
        debug!(%program, exit_code, duration_ms, "ProcessSession::run: complete");

        Ok(ExecutionResult {
            exit_code,
            stdout,
            stderr,
            duration_ms,
            metrics,
        })
    }

    /// SIGTERM, grace period, then SIGKILL
    async fn terminate(child: &mut tokio::process::Child, pid: Option<Pid>) {
        if let Some(pid) = pid {
            let _ = kill(pid, Signal::SIGTERM);
        }
        if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_err() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

#[async_trait]
impl SandboxSession for ProcessSession {
    async fn exec(&mut self, command: &SandboxCommand, cancel: CancelToken) -> Result<ExecutionResult, SandboxError> {
        if cancel.is_cancelled() {
            return Err(SandboxError::Cancelled);
        }
        match command {
            SandboxCommand::WriteFile { path, content } => self.write_file(path, content).await,
            SandboxCommand::Exec { argv, stdin } => self.run(argv, stdin.as_deref(), cancel).await,
        }
    }

    async fn destroy(&mut self) -> Result<(), SandboxError> {
        debug!(workspace = ?self.workspace.path(), "ProcessSession::destroy: called");
        // TempDir removal happens on drop; nothing else is held.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskType;

    fn quick_config() -> SandboxConfig {
        let mut config = SandboxConfig::for_task_type(TaskType::Analyze);
        config.timeout_secs = 5;
        config
    }

    #[tokio::test]
    async fn test_echo_roundtrip() {
        let backend = ProcessBackend;
        let mut session = backend.create(&quick_config()).await.unwrap();

        let result = session
            .exec(&SandboxCommand::exec(["echo", "Analysis completed"]), CancelToken::none())
            .await
            .unwrap();

        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.contains("Analysis completed"));
        session.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_ok_result() {
        let backend = ProcessBackend;
        let mut session = backend.create(&quick_config()).await.unwrap();

        let result = session
            .exec(&SandboxCommand::exec(["sh", "-c", "exit 3"]), CancelToken::none())
            .await
            .unwrap();
        assert_eq!(result.exit_code, 3);
        session.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_write_then_read_in_workspace() {
        let backend = ProcessBackend;
        let mut session = backend.create(&quick_config()).await.unwrap();

        session
            .exec(
                &SandboxCommand::write_file("sub/dir/hello.txt", "hi there"),
                CancelToken::none(),
            )
            .await
            .unwrap();

        let result = session
            .exec(&SandboxCommand::exec(["cat", "sub/dir/hello.txt"]), CancelToken::none())
            .await
            .unwrap();
        assert_eq!(result.stdout, "hi there");
        session.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_path_escape_rejected() {
        let backend = ProcessBackend;
        let mut session = backend.create(&quick_config()).await.unwrap();

        let err = session
            .exec(&SandboxCommand::write_file("../evil.txt", "x"), CancelToken::none())
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Create(_)));

        let err = session
            .exec(&SandboxCommand::write_file("/etc/evil.txt", "x"), CancelToken::none())
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Create(_)));
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let mut config = quick_config();
        config.timeout_secs = 1;
        let backend = ProcessBackend;
        let mut session = backend.create(&config).await.unwrap();

        let err = session
            .exec(&SandboxCommand::exec(["sleep", "30"]), CancelToken::none())
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Timeout(1)));
        session.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_terminates_child() {
        let backend = ProcessBackend;
        let mut session = backend.create(&quick_config()).await.unwrap();

        let source = crate::cancel::CancelSource::new();
        let token = source.token();
        let cancel_task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            source.cancel();
        });

        let started = Instant::now();
        let err = session
            .exec(&SandboxCommand::exec(["sleep", "30"]), token)
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(10));
        cancel_task.await.unwrap();
        session.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_stdin_piped() {
        let backend = ProcessBackend;
        let mut session = backend.create(&quick_config()).await.unwrap();

        let result = session
            .exec(
                &SandboxCommand::Exec {
                    argv: vec!["cat".to_string()],
                    stdin: Some("from stdin".to_string()),
                },
                CancelToken::none(),
            )
            .await
            .unwrap();
        assert_eq!(result.stdout, "from stdin");
        session.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_workspace_removed_after_drop() {
        let backend = ProcessBackend;
        let mut session = backend.create(&quick_config()).await.unwrap();
        session
            .exec(&SandboxCommand::write_file("probe.txt", "x"), CancelToken::none())
            .await
            .unwrap();

        let path = {
            let result = session
                .exec(&SandboxCommand::exec(["pwd"]), CancelToken::none())
                .await
                .unwrap();
            PathBuf::from(result.stdout.trim().to_string())
        };
        assert!(path.exists());

        session.destroy().await.unwrap();
        drop(session);
        assert!(!path.exists());
    }
}
