//! OpenAI-compatible HTTP backend
//!
//! Speaks the Chat Completions and Embeddings wire format, which every
//! provider the engine targets (OpenAI, Azure-hosted deployments, local
//! Ollama) accepts. Transient-failure retries live in
//! [`super::retry::RetryBackend`], not here.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::cancel::CancelToken;

use super::{CompletionRequest, EMBED_DIM, LlmBackend, LlmError};

/// OpenAI-compatible API client
pub struct HttpBackend {
    model: String,
    embed_model: String,
    api_key: String,
    base_url: String,
    http: Client,
}

impl HttpBackend {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        embed_model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let http = Client::builder().timeout(timeout).build().map_err(LlmError::Network)?;
        Ok(Self {
            model: model.into(),
            embed_model: embed_model.into(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            http,
        })
    }

    fn map_status(status: u16, message: String, retry_after: Option<u64>) -> LlmError {
        match status {
            429 => LlmError::RateLimited {
                retry_after: Duration::from_secs(retry_after.unwrap_or(60)),
            },
            408 | 500 | 502 | 503 | 504 => LlmError::Unavailable(format!("status {}: {}", status, message)),
            _ => LlmError::Api { status, message },
        }
    }

    async fn post_json(&self, path: &str, body: serde_json::Value, cancel: &mut CancelToken) -> Result<reqwest::Response, LlmError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "HttpBackend::post_json: sending");

        let request = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&body)
            .send();

        let response = tokio::select! {
            r = request => r.map_err(LlmError::Network)?,
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
        };

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());
            let message = response.text().await.unwrap_or_default();
            debug!(status, "HttpBackend::post_json: API error");
            return Err(Self::map_status(status, message, retry_after));
        }

        Ok(response)
    }
}

#[async_trait]
impl LlmBackend for HttpBackend {
    async fn complete(&self, request: CompletionRequest, mut cancel: CancelToken) -> Result<String, LlmError> {
        debug!(model = %self.model, max_tokens = request.max_tokens, "HttpBackend::complete: called");
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.prompt},
            ],
        });

        let response = self.post_json("/v1/chat/completions", body, &mut cancel).await?;
        let api: ChatResponse = response.json().await.map_err(LlmError::Network)?;

        api.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|content| !content.is_empty())
            .ok_or_else(|| LlmError::InvalidResponse("empty completion".to_string()))
    }

    async fn embed(&self, text: &str, mut cancel: CancelToken) -> Result<Vec<f32>, LlmError> {
        debug!(model = %self.embed_model, text_len = text.len(), "HttpBackend::embed: called");
        let body = serde_json::json!({
            "model": self.embed_model,
            "input": text,
        });

        let response = self.post_json("/v1/embeddings", body, &mut cancel).await?;
        let api: EmbeddingResponse = response.json().await.map_err(LlmError::Network)?;

        let embedding = api
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| LlmError::InvalidResponse("empty embedding".to_string()))?;

        if embedding.len() != EMBED_DIM {
            return Err(LlmError::InvalidResponse(format!(
                "expected {} embedding dims, got {}",
                EMBED_DIM,
                embedding.len()
            )));
        }
        Ok(embedding)
    }
}

// OpenAI-compatible wire types

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}
