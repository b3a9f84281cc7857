//! Identifier generation
//!
//! All engine identifiers are human-scannable strings with a fixed shape:
//!
//! - intent: `QLI-<unix-nano>`
//! - task: `QL-<TYPE3>-<YYYYMMDD>-<NNN>`
//! - agent: `<TYPE3>-AGT-<HHMMSS>-<NNN>`
//! - drop: `QLD-<TYPE3>-<NNN>`
//!
//! The `<NNN>` sequences come from process-local atomic counters; they only
//! need to be unique within one engine process.

use std::sync::atomic::{AtomicU32, Ordering};

use chrono::Utc;
use tracing::debug;

use super::task::TaskType;

static TASK_SEQ: AtomicU32 = AtomicU32::new(1);
static AGENT_SEQ: AtomicU32 = AtomicU32::new(1);

/// Three-letter code used in task and agent identifiers
pub fn type_code(task_type: TaskType) -> &'static str {
    match task_type {
        TaskType::Codegen => "DEV",
        TaskType::Infra => "INF",
        TaskType::Test => "TST",
        TaskType::Doc => "DOC",
        TaskType::Analyze => "ANA",
    }
}

/// Generate an intent identifier: `QLI-<unix-nano>`
pub fn intent_id() -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let id = format!("QLI-{}", nanos);
    debug!(%id, "intent_id: generated");
    id
}

/// Generate a canonical task identifier: `QL-<TYPE3>-<YYYYMMDD>-<NNN>`
pub fn task_id(task_type: TaskType) -> String {
    let seq = TASK_SEQ.fetch_add(1, Ordering::SeqCst) % 1000;
    let id = format!(
        "QL-{}-{}-{:03}",
        type_code(task_type),
        Utc::now().format("%Y%m%d"),
        seq
    );
    debug!(%id, "task_id: generated");
    id
}

/// Generate an agent identifier: `<TYPE3>-AGT-<HHMMSS>-<NNN>`
pub fn agent_id(task_type: TaskType) -> String {
    let seq = AGENT_SEQ.fetch_add(1, Ordering::SeqCst) % 1000;
    let id = format!(
        "{}-AGT-{}-{:03}",
        type_code(task_type),
        Utc::now().format("%H%M%S"),
        seq
    );
    debug!(%id, "agent_id: generated");
    id
}

/// Generate a drop identifier: `QLD-<TYPE3>-<NNN>`
///
/// The sequence is the caller's partition index, so packaging the same
/// results twice yields the same ids.
pub fn drop_id(code: &str, seq: usize) -> String {
    format!("QLD-{}-{:03}", code, seq)
}
