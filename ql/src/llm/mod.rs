//! LLM backend abstraction
//!
//! The engine consumes language models through the narrow [`LlmBackend`]
//! trait. The bundled implementations are the OpenAI-compatible HTTP
//! adapter and a deterministic scripted backend for tests and dry runs;
//! both are normally wrapped in [`RetryBackend`].

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

pub mod backend;
mod error;
pub mod http;
pub mod retry;
pub mod scripted;

pub use backend::{CompletionRequest, EMBED_DIM, LlmBackend};
pub use error::LlmError;
pub use http::HttpBackend;
pub use retry::RetryBackend;
pub use scripted::ScriptedBackend;

use crate::config::LlmConfig;

/// Create a backend from configuration
///
/// Supported providers: `openai-compatible` (needs an API key in the
/// configured env var) and `scripted` (offline, deterministic).
pub fn create_backend(config: &LlmConfig) -> Result<Arc<dyn LlmBackend>, LlmError> {
    debug!(provider = %config.provider, model = %config.model, "create_backend: called");
    match config.provider.as_str() {
        "openai-compatible" => {
            let api_key = std::env::var(&config.api_key_env)
                .map_err(|_| LlmError::InvalidResponse(format!("API key env var {} not set", config.api_key_env)))?;
            let inner = HttpBackend::new(
                config.base_url.clone(),
                api_key,
                config.model.clone(),
                config.embed_model.clone(),
                Duration::from_millis(config.timeout_ms),
            )?;
            Ok(Arc::new(RetryBackend::new(inner)))
        }
        "scripted" => Ok(Arc::new(ScriptedBackend::new())),
        other => Err(LlmError::InvalidResponse(format!(
            "Unknown LLM provider: '{}'. Supported: openai-compatible, scripted",
            other
        ))),
    }
}
