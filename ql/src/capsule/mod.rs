//! Capsule assembler - approved drops to the final deliverable
//!
//! Accepted drops merge into one project tree under `project/`; the
//! archive carries a manifest with content digests, run metadata, a
//! synthesized README, per-task outputs and score reports. With the
//! reproducibility flag set, assembling the same drops twice yields
//! byte-identical `.qlcapsule` archives.

use std::collections::BTreeMap;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info};

pub mod archive;

pub use archive::{sha256_hex, write_zip};

use crate::domain::{
    Capsule, CapsuleMetadata, DropBundle, Intent, Manifest, ManifestEntry, QualityBand, SecurityRisk,
};
use crate::executor::ExecutionReport;

/// File extension of the emitted archive
pub const CAPSULE_EXTENSION: &str = "qlcapsule";

/// Extensions that count as code for the quality check
const CODE_EXTENSIONS: &[&str] = &["go", "rs", "py", "js", "ts", "java", "c", "cpp", "tf"];

/// Capsule assembly failures; fatal to the capsule, never to the results
#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("no approved drops to assemble")]
    NoAcceptedDrops,

    #[error("archive error: {0}")]
    Archive(String),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Assembler tunables
#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    /// Zero timestamps and derive ids from content for byte-identical output
    pub reproducible: bool,
    /// Engine version recorded in the metadata
    pub version: String,
    /// Extra environment entries recorded in the metadata
    pub environment: BTreeMap<String, String>,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            reproducible: false,
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment: BTreeMap::new(),
        }
    }
}

/// Merges accepted drops into a [`Capsule`]
pub struct CapsuleAssembler {
    config: AssemblerConfig,
}

impl CapsuleAssembler {
    pub fn new(config: AssemblerConfig) -> Self {
        Self { config }
    }

    /// Assemble the deliverable from the gate's output
    pub fn assemble(
        &self,
        intent: &Intent,
        drops: &[DropBundle],
        report: &ExecutionReport,
    ) -> Result<Capsule, AssembleError> {
        let mut accepted: Vec<&DropBundle> = drops.iter().filter(|d| d.is_accepted()).collect();
        debug!(accepted = accepted.len(), total = drops.len(), "CapsuleAssembler::assemble: called");
        if accepted.is_empty() {
            return Err(AssembleError::NoAcceptedDrops);
        }

        // Winner-first merge order: type precedence, then id lexicographic
        accepted.sort_by(|a, b| {
            a.drop_type
                .precedence()
                .cmp(&b.drop_type.precedence())
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut project: BTreeMap<String, String> = BTreeMap::new();
        for drop in &accepted {
            for (path, content) in &drop.files {
                // First writer wins; later (lower-precedence) drops lose
                project.entry(path.clone()).or_insert_with(|| content.clone());
            }
        }

        let capsule_id = self.capsule_id(&accepted);
        let created_at = if self.config.reproducible {
            intent.created_at
        } else {
            Utc::now()
        };

        let overall_score = {
            let sum: f64 = accepted.iter().map(|d| d.metadata.quality_score).sum();
            (sum / accepted.len() as f64).round().clamp(0.0, 100.0) as u8
        };
        let security_risk = accepted
            .iter()
            .map(|d| SecurityRisk::from_score(d.metadata.security_score))
            .max()
            .unwrap_or_default();

        let successful_tasks = report
            .statuses
            .values()
            .filter(|s| **s == crate::domain::TaskStatus::Completed)
            .count();

        let mut environment = self.config.environment.clone();
        environment.insert("engine_version".to_string(), self.config.version.clone());

        let readme = synthesize_readme(intent, &accepted, &project);

        // Assemble the full entry map (paths → bytes), project under project/
        let mut entries: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        for (path, content) in &project {
            entries.insert(format!("project/{}", path), content.clone().into_bytes());
        }
        entries.insert("README.md".to_string(), readme.clone().into_bytes());

        let mut task_ids: Vec<&String> = report.results.keys().collect();
        task_ids.sort();
        for task_id in task_ids {
            let result = &report.results[task_id];
            entries.insert(format!("tasks/{}/output.txt", task_id), result.output.clone().into_bytes());
        }

        entries.insert(
            "reports/security.json".to_string(),
            serde_json::to_vec_pretty(&security_report(&accepted))?,
        );
        entries.insert(
            "reports/quality.json".to_string(),
            serde_json::to_vec_pretty(&quality_report(&accepted))?,
        );
        entries.insert(
            "reports/validation.json".to_string(),
            serde_json::to_vec_pretty(&validation_report(report))?,
        );

        let metadata = CapsuleMetadata {
            capsule_id: capsule_id.clone(),
            version: self.config.version.clone(),
            intent_id: intent.id.clone(),
            intent_text: intent.text.clone(),
            created_at,
            total_tasks: report.statuses.len(),
            successful_tasks,
            overall_score,
            security_risk,
            quality_score: 0, // filled below once the checks run
            environment,
        };

        // Manifest covers every entry except itself and metadata.json
        // (metadata embeds the quality score, which depends on the checks)
        let manifest = Manifest {
            version: Manifest::VERSION.to_string(),
            files: entries
                .iter()
                .map(|(path, bytes)| ManifestEntry {
                    path: path.clone(),
                    size: bytes.len() as u64,
                    sha256: sha256_hex(bytes),
                })
                .collect(),
        };

        // Quality checks: five 20-point criteria
        let mut quality_score = 0u8;
        if manifest.is_valid() {
            quality_score += 20;
        }
        let metadata_valid = !metadata.capsule_id.is_empty() && !metadata.intent_id.is_empty();
        if metadata_valid {
            quality_score += 20;
        }
        if !readme.is_empty() {
            quality_score += 20;
        }
        if !project.is_empty() {
            quality_score += 20;
        }
        let has_code = project.keys().any(|path| {
            path.rsplit('.')
                .next()
                .is_some_and(|ext| CODE_EXTENSIONS.contains(&ext))
        });
        if has_code {
            quality_score += 20;
        }

        let metadata = CapsuleMetadata {
            quality_score,
            ..metadata
        };

        entries.insert("manifest.json".to_string(), serde_json::to_vec_pretty(&manifest)?);
        entries.insert("metadata.json".to_string(), serde_json::to_vec_pretty(&metadata)?);

        let archive_bytes = write_zip(
            entries.iter().map(|(path, bytes)| (path.as_str(), bytes.as_slice())),
            self.config.reproducible,
        )?;

        info!(
            capsule_id = %capsule_id,
            files = manifest.files.len(),
            quality_score,
            band = ?QualityBand::from_score(quality_score),
            "Assembled capsule"
        );

        Ok(Capsule {
            id: capsule_id,
            drops: accepted.into_iter().cloned().collect(),
            manifest,
            metadata,
            quality_score,
            quality_band: QualityBand::from_score(quality_score),
            archive: archive_bytes,
        })
    }

    /// Capsule id: content-derived under reproducibility, time-based
    /// otherwise
    fn capsule_id(&self, accepted: &[&DropBundle]) -> String {
        if self.config.reproducible {
            let mut fingerprint = String::new();
            for drop in accepted {
                fingerprint.push_str(&drop.id);
                for (path, content) in &drop.files {
                    fingerprint.push_str(path);
                    fingerprint.push_str(&sha256_hex(content.as_bytes()));
                }
            }
            format!("QLC-{}", &sha256_hex(fingerprint.as_bytes())[..16])
        } else {
            format!("QLC-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default())
        }
    }
}

/// README with the required sections, synthesized from the run
fn synthesize_readme(intent: &Intent, accepted: &[&DropBundle], project: &BTreeMap<String, String>) -> String {
    let drop_lines: Vec<String> = accepted
        .iter()
        .map(|d| {
            format!(
                "- **{}** ({} files, quality {:.0}, security {:.0})",
                d.name,
                d.metadata.file_count,
                d.metadata.quality_score,
                d.metadata.security_score
            )
        })
        .collect();

    let file_lines: Vec<String> = project.keys().take(20).map(|p| format!("- `project/{}`", p)).collect();

    format!(
        "# Overview\n\n{}\n\nThis capsule was assembled from {} reviewed drop(s):\n\n{}\n\n\
         ## Usage\n\nUnpack the archive and inspect `project/` for the generated sources. \
         `manifest.json` lists every file with its size and SHA-256 digest; `metadata.json` \
         records the run that produced it. Per-task raw outputs live under `tasks/`.\n\n\
         ## API\n\nGenerated files:\n\n{}\n",
        intent.text,
        accepted.len(),
        drop_lines.join("\n"),
        file_lines.join("\n")
    )
}

fn security_report(accepted: &[&DropBundle]) -> serde_json::Value {
    serde_json::json!({
        "drops": accepted.iter().map(|d| serde_json::json!({
            "drop_id": d.id,
            "type": d.drop_type,
            "security_score": d.metadata.security_score,
            "risk": SecurityRisk::from_score(d.metadata.security_score),
        })).collect::<Vec<_>>(),
    })
}

fn quality_report(accepted: &[&DropBundle]) -> serde_json::Value {
    serde_json::json!({
        "drops": accepted.iter().map(|d| serde_json::json!({
            "drop_id": d.id,
            "type": d.drop_type,
            "quality_score": d.metadata.quality_score,
            "validation_passed": d.metadata.validation_passed,
            "status": d.status,
            "notes": d.reviewer_notes,
        })).collect::<Vec<_>>(),
    })
}

fn validation_report(report: &ExecutionReport) -> serde_json::Value {
    let mut task_ids: Vec<&String> = report.results.keys().collect();
    task_ids.sort();
    serde_json::json!({
        "tasks": task_ids.iter().map(|id| {
            let result = &report.results[*id];
            serde_json::json!({
                "task_id": id,
                "validation": result.validation,
                "security_score": result.security_score,
                "error": result.error,
            })
        }).collect::<Vec<_>>(),
    })
}
