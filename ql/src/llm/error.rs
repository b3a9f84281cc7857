//! LLM backend error types

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by an [`super::LlmBackend`]
#[derive(Debug, Error)]
pub enum LlmError {
    /// Backend reachable but refusing work (5xx, overloaded)
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Backend asked us to slow down
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Non-recoverable API error
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Transport failure
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Reply did not contain what the contract requires
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The run was cancelled while waiting on the backend
    #[error("cancelled")]
    Cancelled,
}

impl LlmError {
    /// Whether the adapter-layer retry loop may try again
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable(_) | Self::RateLimited { .. } | Self::Network(_) => true,
            Self::Api { status, .. } => matches!(status, 408 | 429 | 500 | 502 | 503 | 504),
            Self::InvalidResponse(_) | Self::Cancelled => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability() {
        assert!(LlmError::Unavailable("overloaded".into()).is_retryable());
        assert!(
            LlmError::RateLimited {
                retry_after: Duration::from_secs(5)
            }
            .is_retryable()
        );
        assert!(
            LlmError::Api {
                status: 503,
                message: "".into()
            }
            .is_retryable()
        );
        assert!(
            !LlmError::Api {
                status: 401,
                message: "".into()
            }
            .is_retryable()
        );
        assert!(!LlmError::InvalidResponse("empty".into()).is_retryable());
        assert!(!LlmError::Cancelled.is_retryable());
    }
}
