//! Scripted backend - deterministic completions for tests and dry runs
//!
//! Rules map a prompt substring to a canned reply; the first matching rule
//! wins, in registration order. With no matching rule the default reply is
//! returned. Every prompt is recorded for assertion.

use std::sync::Mutex;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::cancel::CancelToken;

use super::{CompletionRequest, EMBED_DIM, LlmBackend, LlmError};

/// Deterministic rule-based backend
pub struct ScriptedBackend {
    rules: Vec<(String, String)>,
    default_reply: String,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            default_reply: r#"{"files": {}}"#.to_string(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Register a rule: prompts containing `needle` get `reply`
    pub fn with_rule(mut self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.rules.push((needle.into(), reply.into()));
        self
    }

    /// Set the reply used when no rule matches
    pub fn with_default_reply(mut self, reply: impl Into<String>) -> Self {
        self.default_reply = reply.into();
        self
    }

    /// Number of completion calls made so far
    pub fn call_count(&self) -> usize {
        self.prompts.lock().expect("prompt log poisoned").len()
    }

    /// Prompts seen so far, in call order
    pub fn recorded_prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompt log poisoned").clone()
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    async fn complete(&self, request: CompletionRequest, cancel: CancelToken) -> Result<String, LlmError> {
        if cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }

        let full = format!("{}\n{}", request.system, request.prompt);
        self.prompts.lock().expect("prompt log poisoned").push(full.clone());

        for (needle, reply) in &self.rules {
            if full.contains(needle.as_str()) {
                debug!(%needle, "ScriptedBackend::complete: rule matched");
                return Ok(reply.clone());
            }
        }
        debug!("ScriptedBackend::complete: default reply");
        Ok(self.default_reply.clone())
    }

    async fn embed(&self, text: &str, cancel: CancelToken) -> Result<Vec<f32>, LlmError> {
        if cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }
        // Deterministic pseudo-embedding derived from the content hash
        let digest = Sha256::digest(text.as_bytes());
        let mut vector = Vec::with_capacity(EMBED_DIM);
        for i in 0..EMBED_DIM {
            let byte = digest[i % digest.len()];
            vector.push((byte as f32 / 255.0) - 0.5);
        }
        Ok(vector)
    }
}
