//! Intent parser - free text to typed tasks
//!
//! One deterministic LLM call decomposes the intent into a JSON task
//! array; the reply goes through the tolerant extractor, then every
//! model-assigned id is rewritten to the canonical form and dependency
//! lists are remapped. Anything the schema does not allow is a parse
//! error, fatal to the run.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::domain::{Priority, Task, TaskType, id};
use crate::extract::{self, ExtractError};
use crate::llm::{CompletionRequest, LlmBackend, LlmError};
use crate::prompts::PromptLoader;

/// Maximum accepted intent length in bytes
pub const MAX_INTENT_BYTES: usize = 8 * 1024;

/// System role for the decomposition call
const DECOMPOSE_SYSTEM: &str =
    "You decompose software delivery requests into executable task graphs. You output only JSON.";

/// Intent decomposition failures; all fatal to the run
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("intent text is empty")]
    EmptyIntent,

    #[error("intent text is {len} bytes, maximum is {max}")]
    TooLarge { len: usize, max: usize },

    #[error("decomposition call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("no JSON task array in reply: {0}")]
    Extract(#[from] ExtractError),

    #[error("reply is not a JSON array of tasks")]
    NotAnArray,

    #[error("model emitted an empty task array")]
    EmptyTaskList,

    #[error("task {index} is missing required field '{field}'")]
    MissingField { index: usize, field: &'static str },

    #[error("task '{id}' has unknown type '{value}'")]
    UnknownType { id: String, value: String },

    #[error("task '{id}' has priority '{value}' outside the allowed set")]
    UnknownPriority { id: String, value: String },

    #[error("task '{id}' depends on unknown task '{dependency}'")]
    UnknownDependency { id: String, dependency: String },
}

/// What the parse observed, for logs and run metadata
#[derive(Debug, Clone)]
pub struct ParseMetadata {
    pub reply_len: usize,
    pub task_count: usize,
}

/// Converts free-text intents into canonical task lists
pub struct IntentParser {
    llm: Arc<dyn LlmBackend>,
    prompts: PromptLoader,
}

impl IntentParser {
    pub fn new(llm: Arc<dyn LlmBackend>) -> eyre::Result<Self> {
        Ok(Self {
            llm,
            prompts: PromptLoader::new()?,
        })
    }

    /// Decompose an intent into tasks with canonical ids
    pub async fn parse(&self, text: &str, cancel: CancelToken) -> Result<(Vec<Task>, ParseMetadata), ParseError> {
        let text = text.trim();
        debug!(text_len = text.len(), "IntentParser::parse: called");

        if text.is_empty() {
            return Err(ParseError::EmptyIntent);
        }
        if text.len() > MAX_INTENT_BYTES {
            return Err(ParseError::TooLarge {
                len: text.len(),
                max: MAX_INTENT_BYTES,
            });
        }

        let prompt = self
            .prompts
            .render_decompose(text)
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        let reply = self
            .llm
            .complete(CompletionRequest::new(DECOMPOSE_SYSTEM, prompt), cancel)
            .await?;
        debug!(reply_len = reply.len(), "IntentParser::parse: got reply");

        let value = extract::extract_json(&reply)?;
        let tasks = self.canonicalize(value)?;

        info!(task_count = tasks.len(), "Decomposed intent into tasks");
        let metadata = ParseMetadata {
            reply_len: reply.len(),
            task_count: tasks.len(),
        };
        Ok((tasks, metadata))
    }

    /// Validate the model's array and rewrite ids to canonical form
    fn canonicalize(&self, value: Value) -> Result<Vec<Task>, ParseError> {
        let items = value.as_array().ok_or(ParseError::NotAnArray)?;
        if items.is_empty() {
            return Err(ParseError::EmptyTaskList);
        }

        // First pass: validate fields and mint canonical ids
        let mut id_map: HashMap<String, String> = HashMap::new();
        let mut parsed: Vec<(String, TaskType, String, Vec<String>, Priority)> = Vec::new();

        for (index, item) in items.iter().enumerate() {
            let model_id = item
                .get("id")
                .and_then(Value::as_str)
                .ok_or(ParseError::MissingField { index, field: "id" })?
                .to_string();

            let type_str = item
                .get("type")
                .and_then(Value::as_str)
                .ok_or(ParseError::MissingField { index, field: "type" })?;
            let task_type = TaskType::parse(type_str).ok_or_else(|| ParseError::UnknownType {
                id: model_id.clone(),
                value: type_str.to_string(),
            })?;

            let description = item
                .get("description")
                .and_then(Value::as_str)
                .ok_or(ParseError::MissingField {
                    index,
                    field: "description",
                })?
                .to_string();

            let priority = match item.get("priority") {
                None | Some(Value::Null) => Priority::Medium,
                Some(Value::String(s)) => Priority::parse(s).ok_or_else(|| ParseError::UnknownPriority {
                    id: model_id.clone(),
                    value: s.clone(),
                })?,
                Some(other) => {
                    return Err(ParseError::UnknownPriority {
                        id: model_id.clone(),
                        value: other.to_string(),
                    });
                }
            };

            let dependencies = match item.get("dependencies") {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(deps)) => deps
                    .iter()
                    .map(|d| {
                        d.as_str().map(String::from).ok_or(ParseError::MissingField {
                            index,
                            field: "dependencies",
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?,
                Some(_) => {
                    return Err(ParseError::MissingField {
                        index,
                        field: "dependencies",
                    });
                }
            };

            let canonical = id::task_id(task_type);
            debug!(%model_id, %canonical, "IntentParser::canonicalize: minted id");
            id_map.insert(model_id.clone(), canonical.clone());
            parsed.push((canonical, task_type, description, dependencies, priority));
        }

        // Second pass: remap dependency lists through the id map
        let mut tasks = Vec::with_capacity(parsed.len());
        for (canonical, task_type, description, deps, priority) in parsed {
            let mut dependencies = Vec::with_capacity(deps.len());
            for dep in deps {
                let mapped = id_map.get(&dep).cloned().ok_or_else(|| ParseError::UnknownDependency {
                    id: canonical.clone(),
                    dependency: dep.clone(),
                })?;
                if !dependencies.contains(&mapped) {
                    dependencies.push(mapped);
                }
            }
            tasks.push(
                Task::with_id(canonical, task_type, description)
                    .with_priority(priority)
                    .with_dependencies(dependencies),
            );
        }

        Ok(tasks)
    }
}
