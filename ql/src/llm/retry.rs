//! Adapter-layer retry wrapper
//!
//! Transient backend failures (unavailable, rate limited, transport) are
//! retried here with jittered exponential backoff. Task-level retries in
//! the executor are a separate policy and never stack with these.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, warn};

use crate::cancel::CancelToken;

use super::{CompletionRequest, LlmBackend, LlmError};

/// Maximum number of retries after the initial attempt
const MAX_RETRIES: u32 = 3;

/// Initial backoff delay
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Backoff ceiling
const MAX_BACKOFF_MS: u64 = 30_000;

/// Wraps any backend with transient-failure retries
pub struct RetryBackend<B> {
    inner: B,
    max_retries: u32,
}

impl<B: LlmBackend> RetryBackend<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            max_retries: MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Backoff for a given attempt (1-based), jittered up to +25%
    fn backoff(&self, attempt: u32) -> Duration {
        let base = INITIAL_BACKOFF_MS.saturating_mul(2u64.saturating_pow(attempt - 1));
        let capped = base.min(MAX_BACKOFF_MS);
        let jitter = rand::rng().random_range(0..=capped / 4);
        Duration::from_millis(capped + jitter)
    }

    async fn run_with_retries<T, F, Fut>(&self, mut cancel: CancelToken, mut op: F) -> Result<T, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = match last_error {
                    Some(LlmError::RateLimited { retry_after }) => retry_after.max(self.backoff(attempt)),
                    _ => self.backoff(attempt),
                };
                warn!(attempt, delay_ms = delay.as_millis() as u64, "retrying backend call");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                }
            }

            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    debug!(attempt, error = %e, "backend call failed, will retry");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| LlmError::InvalidResponse("retries exhausted".to_string())))
    }
}

#[async_trait]
impl<B: LlmBackend> LlmBackend for RetryBackend<B> {
    async fn complete(&self, request: CompletionRequest, cancel: CancelToken) -> Result<String, LlmError> {
        self.run_with_retries(cancel.clone(), || self.inner.complete(request.clone(), cancel.clone()))
            .await
    }

    async fn embed(&self, text: &str, cancel: CancelToken) -> Result<Vec<f32>, LlmError> {
        self.run_with_retries(cancel.clone(), || self.inner.embed(text, cancel.clone()))
            .await
    }
}
