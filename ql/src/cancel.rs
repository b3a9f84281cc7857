//! Cancellation plumbing
//!
//! One [`CancelSource`] per orchestration run; every component holds a
//! cheap [`CancelToken`] clone. Built on a tokio watch channel so a single
//! cancel() wakes all waiters at once.

use tokio::sync::watch;
use tracing::debug;

/// The cancelling side, owned by the orchestrator
pub struct CancelSource {
    tx: watch::Sender<bool>,
}

impl CancelSource {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Create a token observing this source
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: Some(self.tx.subscribe()),
        }
    }

    /// Signal cancellation to every outstanding token
    pub fn cancel(&self) {
        debug!("CancelSource::cancel: signalling");
        let _ = self.tx.send(true);
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

/// The observing side, held by workers, sandboxes and backends
#[derive(Clone)]
pub struct CancelToken {
    /// None means "never cancelled" (tests, standalone component use)
    rx: Option<watch::Receiver<bool>>,
}

impl CancelToken {
    /// A token that never fires
    pub fn none() -> Self {
        Self { rx: None }
    }

    /// Whether cancellation has been signalled
    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolve when cancellation is signalled; pends forever for
    /// [`CancelToken::none`]
    pub async fn cancelled(&mut self) {
        match &mut self.rx {
            Some(rx) => {
                if *rx.borrow() {
                    return;
                }
                // Channel closure without a cancel means the run finished;
                // treat it the same as never-cancelled.
                while rx.changed().await.is_ok() {
                    if *rx.borrow() {
                        return;
                    }
                }
                std::future::pending::<()>().await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}
