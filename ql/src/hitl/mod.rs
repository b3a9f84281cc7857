//! HITL gate - approve/reject/modify decisions per drop
//!
//! Without an external reviewer the gate is a pure function of its input
//! drops: fixed thresholds over the drop metadata. An attached [`Reviewer`]
//! overrides the default rules; if it times out the gate falls back to the
//! defaults and marks the decision as auto-after-timeout.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::domain::{DropBundle, DropStatus};

/// Default budget for one external review
pub const DEFAULT_REVIEWER_TIMEOUT: Duration = Duration::from_secs(600);

/// Files smaller than this get the modification comment appended
const MIN_FILE_SIZE: usize = 200;

/// What an external reviewer can ask for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewAction {
    /// Accept the drop as is
    Continue,
    /// Regenerate from scratch
    Redo,
    /// Accept with the provided changes
    Modify,
    /// Discard the drop
    Reject,
}

/// An external reviewer's verdict
#[derive(Debug, Clone)]
pub struct ReviewDecision {
    pub action: ReviewAction,
    pub feedback: Option<String>,
    /// Path → replacement content, applied on [`ReviewAction::Modify`]
    pub changes: BTreeMap<String, String>,
}

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("reviewer unavailable: {0}")]
    Unavailable(String),
    #[error("review cancelled")]
    Cancelled,
}

/// Optional human (or human-proxy) reviewer
#[async_trait]
pub trait Reviewer: Send + Sync {
    async fn review(&self, drop: &DropBundle, cancel: CancelToken) -> Result<ReviewDecision, ReviewError>;
}

/// Strategy applied to drops that the default rules mark `modified`
pub type ModificationStrategy = Arc<dyn Fn(&mut DropBundle) + Send + Sync>;

/// Default strategy: append a production-readiness comment to small files
pub fn production_readiness_strategy() -> ModificationStrategy {
    Arc::new(|drop: &mut DropBundle| {
        let paths: Vec<String> = drop
            .files
            .iter()
            .filter(|(_, content)| content.len() < MIN_FILE_SIZE)
            .map(|(path, _)| path.clone())
            .collect();
        for path in paths {
            let prefix = comment_prefix(&path);
            if let Some(content) = drop.files.get_mut(&path) {
                content.push_str(&format!("\n{} production-readiness: automated review applied\n", prefix));
            }
        }
        drop.metadata.file_count = drop.files.len();
    })
}

fn comment_prefix(path: &str) -> &'static str {
    match path.rsplit('.').next() {
        Some("go") | Some("rs") | Some("js") | Some("ts") => "//",
        Some("tf") | Some("yaml") | Some("yml") | Some("sh") | Some("py") => "#",
        Some("md") => ">",
        _ => "#",
    }
}

/// Gate configuration
#[derive(Clone)]
pub struct HitlGateConfig {
    /// Disabled gates approve everything
    pub enabled: bool,
    pub reviewer_timeout: Duration,
}

impl Default for HitlGateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reviewer_timeout: DEFAULT_REVIEWER_TIMEOUT,
        }
    }
}

/// Applies review decisions to generated drops
pub struct HitlGate {
    config: HitlGateConfig,
    reviewer: Option<Arc<dyn Reviewer>>,
    strategy: ModificationStrategy,
}

impl HitlGate {
    pub fn new(config: HitlGateConfig) -> Self {
        Self {
            config,
            reviewer: None,
            strategy: production_readiness_strategy(),
        }
    }

    /// Attach an external reviewer
    pub fn with_reviewer(mut self, reviewer: Arc<dyn Reviewer>) -> Self {
        self.reviewer = Some(reviewer);
        self
    }

    /// Replace the registered modification strategy
    pub fn with_strategy(mut self, strategy: ModificationStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Decide every drop; order is preserved
    pub async fn decide(&self, drops: Vec<DropBundle>, cancel: CancelToken) -> Vec<DropBundle> {
        let mut decided = Vec::with_capacity(drops.len());
        for drop in drops {
            decided.push(self.decide_one(drop, cancel.clone()).await);
        }
        info!(
            approved = decided.iter().filter(|d| d.status == DropStatus::Approved).count(),
            modified = decided.iter().filter(|d| d.status == DropStatus::Modified).count(),
            rejected = decided.iter().filter(|d| d.status == DropStatus::Rejected).count(),
            "HITL decisions applied"
        );
        decided
    }

    async fn decide_one(&self, mut drop: DropBundle, cancel: CancelToken) -> DropBundle {
        debug!(drop_id = %drop.id, hitl_required = drop.metadata.hitl_required, "HitlGate::decide_one: called");

        if !self.config.enabled {
            drop.status = DropStatus::Approved;
            drop.reviewer_notes.push("gate disabled".to_string());
            return drop;
        }

        if !drop.metadata.hitl_required {
            drop.status = DropStatus::Approved;
            return drop;
        }

        if let Some(reviewer) = &self.reviewer {
            match tokio::time::timeout(self.config.reviewer_timeout, reviewer.review(&drop, cancel)).await {
                Ok(Ok(decision)) => return self.apply_review(drop, decision),
                Ok(Err(e)) => {
                    warn!(drop_id = %drop.id, error = %e, "reviewer failed, using default rules");
                }
                Err(_) => {
                    warn!(drop_id = %drop.id, "reviewer timed out, using default rules");
                    drop.reviewer_notes.push("auto-after-timeout".to_string());
                }
            }
        }

        self.apply_default_rules(drop)
    }

    /// The fixed threshold rules, in order
    fn apply_default_rules(&self, mut drop: DropBundle) -> DropBundle {
        let meta = &drop.metadata;

        if meta.validation_passed && meta.quality_score >= 80.0 && meta.security_score >= 70.0 {
            drop.status = DropStatus::Approved;
            drop.reviewer_notes.push("meets criteria".to_string());
        } else if meta.quality_score < 50.0 || meta.security_score < 50.0 {
            drop.status = DropStatus::Rejected;
            drop.reviewer_notes.push("below acceptable threshold".to_string());
        } else if meta.quality_score < 70.0 {
            (self.strategy)(&mut drop);
            drop.status = DropStatus::Modified;
            drop.reviewer_notes.push("minor improvements".to_string());
        } else {
            drop.status = DropStatus::Approved;
            drop.reviewer_notes.push("acceptable".to_string());
        }

        debug!(drop_id = %drop.id, status = %drop.status, "HitlGate::apply_default_rules: decided");
        drop
    }

    fn apply_review(&self, mut drop: DropBundle, decision: ReviewDecision) -> DropBundle {
        if let Some(feedback) = decision.feedback {
            drop.reviewer_notes.push(feedback);
        }
        match decision.action {
            ReviewAction::Continue => drop.status = DropStatus::Approved,
            ReviewAction::Reject => drop.status = DropStatus::Rejected,
            ReviewAction::Redo => {
                // No regeneration loop here; a redo verdict is terminal for
                // this run and surfaces in the notes.
                drop.status = DropStatus::Rejected;
                drop.reviewer_notes.push("redo requested".to_string());
            }
            ReviewAction::Modify => {
                for (path, content) in decision.changes {
                    drop.files.insert(path, content);
                }
                drop.metadata.file_count = drop.files.len();
                drop.status = DropStatus::Modified;
            }
        }
        drop
    }
}
