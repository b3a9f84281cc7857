//! Drop packager - completed task results to reviewable bundles
//!
//! Results are partitioned by task type into at most five drops; within a
//! partition the files maps merge in topological task order, later tasks
//! overriding earlier ones on path conflicts. Packaging is a pure function
//! of its inputs: the same results always yield the same drops.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::domain::{AgentExecutionResult, DropBundle, DropMetadata, DropStatus, DropType, Intent, TaskType, id};
use crate::executor::ExecutionReport;
use crate::graph::TaskGraph;

/// Drop type a task's output lands in
fn drop_type_for(task_type: TaskType) -> DropType {
    match task_type {
        TaskType::Codegen => DropType::Codebase,
        TaskType::Infra => DropType::Infrastructure,
        TaskType::Test => DropType::Tests,
        TaskType::Doc => DropType::Documentation,
        TaskType::Analyze => DropType::Analysis,
    }
}

/// Quality threshold below which a drop always goes through HITL
const HITL_QUALITY_THRESHOLD: f64 = 80.0;

/// Security threshold below which a drop always goes through HITL
const HITL_SECURITY_THRESHOLD: f64 = 70.0;

/// Groups completed task outputs into typed drops
pub struct DropPackager;

impl DropPackager {
    /// Build drops from an execution report
    ///
    /// Only completed tasks contribute; failed, skipped and cancelled
    /// tasks leave no trace in the drops.
    pub fn package(_intent: &Intent, graph: &TaskGraph, report: &ExecutionReport) -> Vec<DropBundle> {
        debug!(result_count = report.results.len(), "DropPackager::package: called");
        let mut drops = Vec::new();

        for (partition_idx, drop_type) in DropType::ALL.iter().enumerate() {
            // Completed tasks of this partition, in topological order
            let members: Vec<(&str, &AgentExecutionResult)> = graph
                .topo_order()
                .iter()
                .map(|&idx| graph.task(idx))
                .filter(|task| drop_type_for(task.task_type) == *drop_type)
                .filter_map(|task| {
                    report
                        .results
                        .get(&task.id)
                        .filter(|r| r.is_success())
                        .map(|r| (task.id.as_str(), r))
                })
                .collect();

            if members.is_empty() {
                continue;
            }

            let mut files: BTreeMap<String, String> = BTreeMap::new();
            let mut task_ids = Vec::with_capacity(members.len());
            let mut quality_sum = 0.0;
            let mut security_sum = 0.0;
            let mut validation_passed = true;

            for (task_id, result) in &members {
                // Later tasks override earlier ones on path conflicts
                for (path, content) in &result.files {
                    files.insert(path.clone(), content.clone());
                }
                task_ids.push(task_id.to_string());
                quality_sum += result.validation.as_ref().map(|v| v.quality.score as f64).unwrap_or(0.0);
                security_sum += result.security_score as f64;
                validation_passed &= result.validation.as_ref().map(|v| v.passed).unwrap_or(false);
            }

            let count = members.len() as f64;
            let quality_score = quality_sum / count;
            let security_score = security_sum / count;
            let hitl_required = quality_score < HITL_QUALITY_THRESHOLD
                || security_score < HITL_SECURITY_THRESHOLD
                || matches!(drop_type, DropType::Infrastructure | DropType::Codebase);

            drops.push(DropBundle {
                id: id::drop_id(drop_type.code(), partition_idx + 1),
                name: drop_type.display_name().to_string(),
                drop_type: *drop_type,
                metadata: DropMetadata {
                    file_count: files.len(),
                    quality_score,
                    security_score,
                    validation_passed,
                    hitl_required,
                },
                files,
                task_ids,
                status: DropStatus::Generated,
                reviewer_notes: Vec::new(),
            });
        }

        info!(drop_count = drops.len(), "Packaged drops");
        drops
    }
}
