//! Embedded prompt templates
//!
//! Compiled into the binary from .pmt files at build time.

use tracing::debug;

use crate::domain::TaskType;

/// Intent decomposition prompt
pub const DECOMPOSE: &str = include_str!("../../prompts/decompose.pmt");

/// Per-task user prompt
pub const TASK: &str = include_str!("../../prompts/task.pmt");

/// System-role descriptions, one block per task type, `---` separated
pub const ROLES: &str = include_str!("../../prompts/roles.pmt");

/// Get an embedded template by name
pub fn get_embedded(name: &str) -> Option<&'static str> {
    debug!(%name, "get_embedded: called");
    match name {
        "decompose" => Some(DECOMPOSE),
        "task" => Some(TASK),
        _ => None,
    }
}

/// The system-role description for a task type
pub fn role_for(task_type: TaskType) -> &'static str {
    let key = task_type.to_string();
    for block in ROLES.split("---") {
        let block = block.trim();
        if let Some(rest) = block.strip_prefix(&format!("{}:", key)) {
            return rest.trim();
        }
    }
    // Every TaskType variant has a block; reaching here means the template
    // file and the enum drifted.
    "You are a software engineer. Produce the requested artifact."
}
