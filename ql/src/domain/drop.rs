//! Drop domain type
//!
//! A drop bundles the files produced by all completed tasks of one type.
//! Drops are what the HITL gate reviews and the capsule assembler merges.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Artifact category of a drop
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropType {
    Infrastructure,
    Codebase,
    Tests,
    Documentation,
    Analysis,
}

impl DropType {
    /// All drop types in their fixed partition order
    pub const ALL: [DropType; 5] = [
        DropType::Infrastructure,
        DropType::Codebase,
        DropType::Tests,
        DropType::Documentation,
        DropType::Analysis,
    ];

    /// Three-letter code used in drop identifiers
    pub fn code(&self) -> &'static str {
        match self {
            Self::Infrastructure => "INF",
            Self::Codebase => "COD",
            Self::Tests => "TST",
            Self::Documentation => "DOC",
            Self::Analysis => "ANA",
        }
    }

    /// Merge precedence for capsule assembly; lower wins path conflicts
    pub fn precedence(&self) -> u8 {
        match self {
            Self::Codebase => 0,
            Self::Tests => 1,
            Self::Infrastructure => 2,
            Self::Documentation => 3,
            Self::Analysis => 4,
        }
    }

    /// Human-readable bundle name
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Infrastructure => "Infrastructure",
            Self::Codebase => "Codebase",
            Self::Tests => "Tests",
            Self::Documentation => "Documentation",
            Self::Analysis => "Analysis",
        }
    }
}

impl std::fmt::Display for DropType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Infrastructure => "infrastructure",
            Self::Codebase => "codebase",
            Self::Tests => "tests",
            Self::Documentation => "documentation",
            Self::Analysis => "analysis",
        };
        write!(f, "{}", s)
    }
}

/// Review status of a drop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DropStatus {
    #[default]
    Generated,
    Approved,
    Modified,
    Rejected,
}

impl std::fmt::Display for DropStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Generated => "generated",
            Self::Approved => "approved",
            Self::Modified => "modified",
            Self::Rejected => "rejected",
        };
        write!(f, "{}", s)
    }
}

/// Aggregate scores the HITL gate decides on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropMetadata {
    /// Cardinality of the merged files map
    pub file_count: usize,
    /// Mean per-task validation quality score, [0, 100]
    pub quality_score: f64,
    /// Mean per-task sandbox security score, [0, 100]
    pub security_score: f64,
    /// Logical AND of per-task validation verdicts
    pub validation_passed: bool,
    /// Whether this drop must pass through the HITL gate
    pub hitl_required: bool,
}

/// A coherent bundle of generated files grouped by task type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropBundle {
    /// Stable identifier (`QLD-<TYPE3>-<NNN>`)
    pub id: String,

    /// Human name shown to reviewers
    pub name: String,

    /// Artifact category
    #[serde(rename = "type")]
    pub drop_type: DropType,

    /// Relative path → file content; BTreeMap keeps merge order deterministic
    pub files: BTreeMap<String, String>,

    /// Tasks whose outputs were merged into this drop
    pub task_ids: Vec<String>,

    /// Aggregate scores
    pub metadata: DropMetadata,

    /// Review status
    pub status: DropStatus,

    /// Notes accumulated by the gate or an external reviewer
    #[serde(default)]
    pub reviewer_notes: Vec<String>,
}

impl DropBundle {
    /// Whether the capsule assembler should include this drop
    pub fn is_accepted(&self) -> bool {
        matches!(self.status, DropStatus::Approved | DropStatus::Modified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_order() {
        assert!(DropType::Codebase.precedence() < DropType::Tests.precedence());
        assert!(DropType::Tests.precedence() < DropType::Infrastructure.precedence());
        assert!(DropType::Infrastructure.precedence() < DropType::Documentation.precedence());
        assert!(DropType::Documentation.precedence() < DropType::Analysis.precedence());
    }

    #[test]
    fn test_drop_type_serde() {
        let json = serde_json::to_string(&DropType::Infrastructure).unwrap();
        assert_eq!(json, "\"infrastructure\"");
    }

    #[test]
    fn test_accepted_statuses() {
        let mut drop = DropBundle {
            id: "QLD-COD-001".to_string(),
            name: "Codebase".to_string(),
            drop_type: DropType::Codebase,
            files: BTreeMap::new(),
            task_ids: vec![],
            metadata: DropMetadata {
                file_count: 0,
                quality_score: 0.0,
                security_score: 0.0,
                validation_passed: false,
                hitl_required: true,
            },
            status: DropStatus::Generated,
            reviewer_notes: vec![],
        };

        assert!(!drop.is_accepted());
        drop.status = DropStatus::Approved;
        assert!(drop.is_accepted());
        drop.status = DropStatus::Modified;
        assert!(drop.is_accepted());
        drop.status = DropStatus::Rejected;
        assert!(!drop.is_accepted());
    }
}
