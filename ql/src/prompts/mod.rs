//! Prompt templates and rendering

pub mod embedded;
pub mod loader;

pub use embedded::{get_embedded, role_for};
pub use loader::{DependencyContext, PromptLoader, TaskPromptContext};
