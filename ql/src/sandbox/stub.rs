//! Stub sandbox - in-process scripted backend for tests
//!
//! Commands never touch the host. Exit codes are scripted by substring
//! rules against the command line, every invocation is recorded, and the
//! backend counts live sessions so tests can assert that no session
//! outlives its agent.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::cancel::CancelToken;

use super::backend::{SandboxBackend, SandboxSession};
use super::{ExecutionResult, SandboxCommand, SandboxConfig, SandboxError, SandboxMetrics};

#[derive(Default)]
struct StubState {
    live_sessions: AtomicUsize,
    created_sessions: AtomicUsize,
    commands: Mutex<Vec<String>>,
}

/// Scripted in-process backend
#[derive(Clone)]
pub struct StubBackend {
    state: Arc<StubState>,
    /// (command-line substring, exit code); first match wins
    exit_rules: Vec<(String, i32)>,
    /// Simulated per-command latency
    delay: Duration,
    /// Simulate an unprovisionable environment
    fail_create: bool,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(StubState::default()),
            exit_rules: Vec::new(),
            delay: Duration::ZERO,
            fail_create: false,
        }
    }

    /// Commands whose display line contains `needle` exit with `code`
    pub fn with_exit_rule(mut self, needle: impl Into<String>, code: i32) -> Self {
        self.exit_rules.push((needle.into(), code));
        self
    }

    /// Add simulated latency per command
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make session creation fail
    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    /// Sessions currently alive (created and not yet destroyed/dropped)
    pub fn live_session_count(&self) -> usize {
        self.state.live_sessions.load(Ordering::SeqCst)
    }

    /// Total sessions ever created
    pub fn created_session_count(&self) -> usize {
        self.state.created_sessions.load(Ordering::SeqCst)
    }

    /// Display lines of every command executed, in order
    pub fn recorded_commands(&self) -> Vec<String> {
        self.state.commands.lock().expect("command log poisoned").clone()
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SandboxBackend for StubBackend {
    async fn create(&self, config: &SandboxConfig) -> Result<Box<dyn SandboxSession>, SandboxError> {
        if self.fail_create {
            return Err(SandboxError::Create("stub: environment not provisionable".to_string()));
        }
        debug!(image = %config.image, "StubBackend::create: called");
        self.state.created_sessions.fetch_add(1, Ordering::SeqCst);
        self.state.live_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubSession {
            state: self.state.clone(),
            exit_rules: self.exit_rules.clone(),
            delay: self.delay,
            released: false,
        }))
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

struct StubSession {
    state: Arc<StubState>,
    exit_rules: Vec<(String, i32)>,
    delay: Duration,
    released: bool,
}

impl StubSession {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.state.live_sessions.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl SandboxSession for StubSession {
    async fn exec(&mut self, command: &SandboxCommand, mut cancel: CancelToken) -> Result<ExecutionResult, SandboxError> {
        if cancel.is_cancelled() {
            return Err(SandboxError::Cancelled);
        }

        let line = command.display_line();
        self.state.commands.lock().expect("command log poisoned").push(line.clone());

        if !self.delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => {}
                _ = cancel.cancelled() => return Err(SandboxError::Cancelled),
            }
        }

        let exit_code = self
            .exit_rules
            .iter()
            .find(|(needle, _)| line.contains(needle.as_str()))
            .map(|(_, code)| *code)
            .unwrap_or(0);

        debug!(%line, exit_code, "StubSession::exec");
        Ok(ExecutionResult {
            exit_code,
            stdout: if exit_code == 0 { format!("{}: ok\n", line) } else { String::new() },
            stderr: if exit_code == 0 {
                String::new()
            } else {
                format!("{}: simulated failure\n", line)
            },
            duration_ms: self.delay.as_millis() as u64,
            metrics: SandboxMetrics::default(),
        })
    }

    async fn destroy(&mut self) -> Result<(), SandboxError> {
        self.release();
        Ok(())
    }
}

impl Drop for StubSession {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskType;

    #[tokio::test]
    async fn test_default_exit_zero() {
        let backend = StubBackend::new();
        let config = SandboxConfig::for_task_type(TaskType::Codegen);
        let mut session = backend.create(&config).await.unwrap();

        let result = session
            .exec(&SandboxCommand::exec(["go", "build"]), CancelToken::none())
            .await
            .unwrap();
        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.contains("go build"));
    }

    #[tokio::test]
    async fn test_exit_rules() {
        let backend = StubBackend::new().with_exit_rule("go test", 1);
        let config = SandboxConfig::for_task_type(TaskType::Test);
        let mut session = backend.create(&config).await.unwrap();

        let build = session
            .exec(&SandboxCommand::exec(["go", "build"]), CancelToken::none())
            .await
            .unwrap();
        assert_eq!(build.exit_code, 0);

        let test = session
            .exec(&SandboxCommand::exec(["go", "test", "-v", "./..."]), CancelToken::none())
            .await
            .unwrap();
        assert_eq!(test.exit_code, 1);
        assert!(test.stderr.contains("simulated failure"));
    }

    #[tokio::test]
    async fn test_session_accounting() {
        let backend = StubBackend::new();
        let config = SandboxConfig::for_task_type(TaskType::Doc);
        assert_eq!(backend.live_session_count(), 0);

        let mut a = backend.create(&config).await.unwrap();
        let b = backend.create(&config).await.unwrap();
        assert_eq!(backend.live_session_count(), 2);
        assert_eq!(backend.created_session_count(), 2);

        a.destroy().await.unwrap();
        assert_eq!(backend.live_session_count(), 1);

        // Dropping without destroy still releases
        drop(b);
        assert_eq!(backend.live_session_count(), 0);

        // Double-destroy must not underflow
        a.destroy().await.unwrap();
        drop(a);
        assert_eq!(backend.live_session_count(), 0);
    }

    #[tokio::test]
    async fn test_failing_create() {
        let backend = StubBackend::new().failing_create();
        let config = SandboxConfig::for_task_type(TaskType::Infra);
        let err = backend.create(&config).await.err().unwrap();
        assert!(matches!(err, SandboxError::Create(_)));
        assert_eq!(backend.live_session_count(), 0);
    }

    #[tokio::test]
    async fn test_recorded_commands() {
        let backend = StubBackend::new();
        let config = SandboxConfig::for_task_type(TaskType::Codegen);
        let mut session = backend.create(&config).await.unwrap();

        session
            .exec(&SandboxCommand::write_file("main.go", "package main"), CancelToken::none())
            .await
            .unwrap();
        session
            .exec(&SandboxCommand::exec(["go", "mod", "tidy"]), CancelToken::none())
            .await
            .unwrap();

        assert_eq!(backend.recorded_commands(), vec!["write main.go", "go mod tidy"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_respects_cancellation() {
        let backend = StubBackend::new().with_delay(Duration::from_secs(60));
        let config = SandboxConfig::for_task_type(TaskType::Codegen);
        let mut session = backend.create(&config).await.unwrap();

        let source = crate::cancel::CancelSource::new();
        let token = source.token();
        source.cancel();

        let err = session
            .exec(&SandboxCommand::exec(["sleep"]), token)
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Cancelled));
    }
}
