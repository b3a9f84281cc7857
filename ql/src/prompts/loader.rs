//! Prompt rendering
//!
//! Handlebars over the embedded templates. Rendering is deterministic:
//! the same context always produces the same prompt.

use eyre::{Context, Result};
use handlebars::Handlebars;
use serde::Serialize;
use tracing::debug;

use super::embedded;

/// One completed upstream task, summarized for a dependent's prompt
#[derive(Debug, Clone, Serialize)]
pub struct DependencyContext {
    pub task_id: String,
    pub summary: String,
}

/// Context for rendering a per-task prompt
#[derive(Debug, Clone, Serialize)]
pub struct TaskPromptContext {
    pub description: String,
    pub project_type: String,
    pub tech_stack: String,
    pub dependencies: Vec<DependencyContext>,
}

/// Renders engine prompts from the embedded templates
pub struct PromptLoader {
    handlebars: Handlebars<'static>,
}

impl PromptLoader {
    pub fn new() -> Result<Self> {
        debug!("PromptLoader::new: called");
        let mut handlebars = Handlebars::new();
        handlebars
            .register_template_string("decompose", embedded::DECOMPOSE)
            .wrap_err("Failed to register decompose template")?;
        handlebars
            .register_template_string("task", embedded::TASK)
            .wrap_err("Failed to register task template")?;
        Ok(Self { handlebars })
    }

    /// Render the intent decomposition prompt
    pub fn render_decompose(&self, intent_text: &str) -> Result<String> {
        #[derive(Serialize)]
        struct Ctx<'a> {
            intent_text: &'a str,
        }
        self.handlebars
            .render("decompose", &Ctx { intent_text })
            .wrap_err("Failed to render decompose prompt")
    }

    /// Render the per-task user prompt
    pub fn render_task(&self, ctx: &TaskPromptContext) -> Result<String> {
        self.handlebars.render("task", ctx).wrap_err("Failed to render task prompt")
    }
}
