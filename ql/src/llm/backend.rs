//! LlmBackend trait definition

use async_trait::async_trait;

use crate::cancel::CancelToken;

use super::LlmError;

/// Embedding dimensionality every backend must produce
pub const EMBED_DIM: usize = 1536;

/// A single completion request
///
/// Each call is independent; the engine never maintains conversation state
/// between calls.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Role description for the model
    pub system: String,
    /// The user-turn prompt
    pub prompt: String,
    /// Upper bound on generated tokens
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            max_tokens: 4096,
        }
    }
}

/// Text completion and embedding provider
///
/// Implementations must be safe to call from many tasks concurrently and
/// must observe the cancellation token at their await points. Transient
/// failures surface as retryable [`LlmError`] variants and are retried by
/// the adapter-layer wrapper, never by the DAG executor.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Complete a single request, returning the raw reply text
    async fn complete(&self, request: CompletionRequest, cancel: CancelToken) -> Result<String, LlmError>;

    /// Embed a text into an [`EMBED_DIM`]-dimensional vector
    async fn embed(&self, text: &str, cancel: CancelToken) -> Result<Vec<f32>, LlmError>;
}
