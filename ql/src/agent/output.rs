//! Agent output parsing - model reply to files map
//!
//! The contract asks the model for `{"files": {path: content}}`. Replies
//! that ignore the contract but contain fenced code blocks are
//! reconstructed into a files map, with the language tag choosing the
//! file name and extension.

use std::collections::BTreeMap;

use tracing::debug;

use crate::domain::TaskType;
use crate::extract::{self, FencedBlock};

/// Pull the declared files map out of a model reply
///
/// Falls back to fenced-block reconstruction; an empty map is a valid
/// outcome for analyze tasks and is handled by the command planner.
pub fn parse_files(task_type: TaskType, reply: &str) -> BTreeMap<String, String> {
    if let Ok(value) = extract::extract_json(reply)
        && let Some(files) = value.get("files").and_then(|f| f.as_object())
    {
        let map: BTreeMap<String, String> = files
            .iter()
            .filter_map(|(path, content)| content.as_str().map(|c| (path.clone(), c.to_string())))
            .collect();
        if !map.is_empty() {
            debug!(file_count = map.len(), "parse_files: using declared files map");
            return map;
        }
    }

    let blocks = extract::fenced_blocks(reply);
    let map = reconstruct_from_blocks(task_type, &blocks);
    debug!(file_count = map.len(), "parse_files: reconstructed from fenced blocks");
    map
}

/// Build a files map from fenced code blocks
fn reconstruct_from_blocks(task_type: TaskType, blocks: &[FencedBlock]) -> BTreeMap<String, String> {
    let mut files = BTreeMap::new();
    let mut go_idx = 0usize;
    let mut tf_idx = 0usize;
    let mut md_idx = 0usize;
    let mut other_idx = 0usize;

    for block in blocks {
        if block.body.trim().is_empty() {
            continue;
        }
        let name = match block.lang.as_str() {
            "go" | "golang" => {
                let name = if go_idx == 0 {
                    "main.go".to_string()
                } else {
                    format!("file_{}.go", go_idx)
                };
                go_idx += 1;
                name
            }
            "hcl" | "tf" | "terraform" => {
                let name = format!("main_{}.tf", tf_idx);
                tf_idx += 1;
                name
            }
            "md" | "markdown" => {
                let name = if md_idx == 0 {
                    "README.md".to_string()
                } else {
                    format!("doc_{}.md", md_idx)
                };
                md_idx += 1;
                name
            }
            "json" => {
                let name = format!("file_{}.json", other_idx);
                other_idx += 1;
                name
            }
            "yaml" | "yml" => {
                let name = format!("file_{}.yaml", other_idx);
                other_idx += 1;
                name
            }
            _ => {
                // Untagged blocks default to the task's native extension
                let ext = match task_type {
                    TaskType::Codegen | TaskType::Test => "go",
                    TaskType::Infra => "tf",
                    TaskType::Doc | TaskType::Analyze => "md",
                };
                let name = format!("file_{}.{}", other_idx, ext);
                other_idx += 1;
                name
            }
        };
        files.insert(name, block.body.clone());
    }

    files
}
