//! Capsule domain types
//!
//! The capsule is the final deliverable: approved drops merged into one
//! project tree, with a manifest, metadata, reports and a deterministic
//! archive.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::drop::DropBundle;

/// Security risk band, ordered so `max()` picks the worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityRisk {
    #[default]
    Low,
    Medium,
    High,
}

impl SecurityRisk {
    /// Band for a security score in [0, 100]
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            Self::Low
        } else if score >= 50.0 {
            Self::Medium
        } else {
            Self::High
        }
    }
}

impl std::fmt::Display for SecurityRisk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        write!(f, "{}", s)
    }
}

/// Capsule quality band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityBand {
    Excellent,
    Acceptable,
    Poor,
}

impl QualityBand {
    /// Band for a capsule quality score
    pub fn from_score(score: u8) -> Self {
        if score >= 80 {
            Self::Excellent
        } else if score >= 60 {
            Self::Acceptable
        } else {
            Self::Poor
        }
    }
}

/// One manifest row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Archive-relative path
    pub path: String,
    /// Uncompressed size in bytes
    pub size: u64,
    /// Lowercase hex SHA-256 of the content
    pub sha256: String,
}

/// Archive manifest (`manifest.json`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    pub files: Vec<ManifestEntry>,
}

impl Manifest {
    /// Current manifest schema version
    pub const VERSION: &'static str = "1";

    /// Whether the manifest satisfies its own schema
    pub fn is_valid(&self) -> bool {
        self.version == Self::VERSION
            && self
                .files
                .iter()
                .all(|f| !f.path.is_empty() && f.sha256.len() == 64 && f.sha256.chars().all(|c| c.is_ascii_hexdigit()))
    }
}

/// Capsule metadata (`metadata.json`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapsuleMetadata {
    pub capsule_id: String,
    pub version: String,
    pub intent_id: String,
    pub intent_text: String,
    pub created_at: DateTime<Utc>,
    pub total_tasks: usize,
    pub successful_tasks: usize,
    /// Mean of accepted drop quality scores, as an integer
    pub overall_score: u8,
    /// Worst security band across accepted drops
    pub security_risk: SecurityRisk,
    pub quality_score: u8,
    /// Snapshot of the run environment (engine version, sandbox backend, …)
    pub environment: BTreeMap<String, String>,
}

/// The assembled deliverable
#[derive(Debug, Clone)]
pub struct Capsule {
    pub id: String,
    pub drops: Vec<DropBundle>,
    pub manifest: Manifest,
    pub metadata: CapsuleMetadata,
    /// Capsule-level quality score (five 20-point checks)
    pub quality_score: u8,
    pub quality_band: QualityBand,
    /// The `.qlcapsule` ZIP bytes
    pub archive: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_risk_bands() {
        assert_eq!(SecurityRisk::from_score(95.0), SecurityRisk::Low);
        assert_eq!(SecurityRisk::from_score(80.0), SecurityRisk::Low);
        assert_eq!(SecurityRisk::from_score(65.0), SecurityRisk::Medium);
        assert_eq!(SecurityRisk::from_score(20.0), SecurityRisk::High);
        assert!(SecurityRisk::High > SecurityRisk::Low);
    }

    #[test]
    fn test_quality_bands() {
        assert_eq!(QualityBand::from_score(100), QualityBand::Excellent);
        assert_eq!(QualityBand::from_score(80), QualityBand::Excellent);
        assert_eq!(QualityBand::from_score(60), QualityBand::Acceptable);
        assert_eq!(QualityBand::from_score(59), QualityBand::Poor);
    }

    #[test]
    fn test_manifest_validity() {
        let good = Manifest {
            version: Manifest::VERSION.to_string(),
            files: vec![ManifestEntry {
                path: "project/main.go".to_string(),
                size: 42,
                sha256: "a".repeat(64),
            }],
        };
        assert!(good.is_valid());

        let bad_version = Manifest {
            version: "2".to_string(),
            files: vec![],
        };
        assert!(!bad_version.is_valid());

        let bad_hash = Manifest {
            version: Manifest::VERSION.to_string(),
            files: vec![ManifestEntry {
                path: "x".to_string(),
                size: 0,
                sha256: "zz".to_string(),
            }],
        };
        assert!(!bad_hash.is_valid());
    }
}
