//! Validation service abstraction
//!
//! Scoring is owned by an external service; the engine only relies on the
//! [0, 100] contract and determinism for identical inputs. A validation
//! failure is recorded on the result, it never fails the task: "did it
//! run" and "is it good" are separate questions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::domain::Task;

/// One scored dimension of a validation verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreDetail {
    /// Score in [0, 100]
    pub score: u8,
    /// Human-readable findings
    #[serde(default)]
    pub findings: Vec<String>,
}

/// Structured verdict returned by a [`ValidationService`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Combined score in [0, 100]
    pub overall_score: u8,
    pub security: ScoreDetail,
    pub quality: ScoreDetail,
    pub validation_time_ms: u64,
    pub passed: bool,
}

/// Errors from the validation service itself (not bad scores)
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("validation service unavailable: {0}")]
    Unavailable(String),
    #[error("validation timed out after {0} ms")]
    Timeout(u64),
}

/// External scorer for task outputs
#[async_trait]
pub trait ValidationService: Send + Sync {
    /// Score an agent's output and sandbox transcript for one task
    ///
    /// Must be deterministic for identical inputs.
    async fn validate(&self, task: &Task, output: &str, transcript: &str)
    -> Result<ValidationResult, ValidationError>;
}

/// Bundled deterministic validator
///
/// A coarse static heuristic: enough signal to drive the HITL gate in
/// offline runs, deliberately opaque beyond the score contract.
pub struct HeuristicValidator;

#[async_trait]
impl ValidationService for HeuristicValidator {
    async fn validate(
        &self,
        task: &Task,
        output: &str,
        transcript: &str,
    ) -> Result<ValidationResult, ValidationError> {
        debug!(task_id = %task.id, output_len = output.len(), "HeuristicValidator::validate: called");

        let mut quality: i32 = 50;
        let mut findings = Vec::new();

        if output.len() >= 64 {
            quality += 15;
        } else {
            findings.push("output is very short".to_string());
        }
        if output.contains("\"files\"") || output.contains("```") {
            quality += 20;
        } else {
            findings.push("no declared files or code blocks".to_string());
        }
        if !transcript.is_empty() && !transcript.contains("exit_code=1") {
            quality += 15;
        }

        let mut security: i32 = 95;
        let mut security_findings = Vec::new();
        for marker in ["password", "secret_key", "BEGIN RSA PRIVATE KEY"] {
            if output.contains(marker) {
                security -= 25;
                security_findings.push(format!("possible credential material: {}", marker));
            }
        }

        let quality = quality.clamp(0, 100) as u8;
        let security = security.clamp(0, 100) as u8;
        let overall = ((quality as u16 + security as u16) / 2) as u8;

        Ok(ValidationResult {
            overall_score: overall,
            security: ScoreDetail {
                score: security,
                findings: security_findings,
            },
            quality: ScoreDetail {
                score: quality,
                findings,
            },
            validation_time_ms: 0,
            passed: overall >= 70,
        })
    }
}

/// Validator returning a fixed verdict (tests, threshold scenarios)
pub struct FixedValidator {
    pub result: ValidationResult,
}

impl FixedValidator {
    /// Fixed verdict with the given quality and security scores
    pub fn with_scores(quality: u8, security: u8) -> Self {
        let overall = ((quality as u16 + security as u16) / 2) as u8;
        Self {
            result: ValidationResult {
                overall_score: overall,
                security: ScoreDetail {
                    score: security,
                    findings: vec![],
                },
                quality: ScoreDetail {
                    score: quality,
                    findings: vec![],
                },
                validation_time_ms: 0,
                passed: overall >= 70,
            },
        }
    }
}

#[async_trait]
impl ValidationService for FixedValidator {
    async fn validate(
        &self,
        _task: &Task,
        _output: &str,
        _transcript: &str,
    ) -> Result<ValidationResult, ValidationError> {
        Ok(self.result.clone())
    }
}
