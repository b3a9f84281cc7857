//! SandboxBackend and SandboxSession traits

use async_trait::async_trait;

use crate::cancel::CancelToken;

use super::{ExecutionResult, SandboxCommand, SandboxConfig, SandboxError};

/// Factory for isolated execution sessions
///
/// One session serves one agent for one task; the workspace persists
/// across that session's commands and is destroyed with it.
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    /// Provision a session for the given configuration
    async fn create(&self, config: &SandboxConfig) -> Result<Box<dyn SandboxSession>, SandboxError>;

    /// Backend name for logs and run metadata
    fn name(&self) -> &'static str;
}

/// A live isolated execution context
///
/// Implementations must guarantee teardown on every exit path: an explicit
/// [`SandboxSession::destroy`] on the happy path and a best-effort
/// synchronous cleanup on drop for panics and cancellation.
#[async_trait]
pub trait SandboxSession: Send {
    /// Run one command inside the session
    ///
    /// Completed commands return `Ok` regardless of exit code; errors are
    /// reserved for the session itself failing (timeout, teardown,
    /// cancellation).
    async fn exec(&mut self, command: &SandboxCommand, cancel: CancelToken) -> Result<ExecutionResult, SandboxError>;

    /// Tear the session down, releasing all resources
    async fn destroy(&mut self) -> Result<(), SandboxError>;
}
