//! Domain types for the orchestration engine
//!
//! Everything the pipeline passes between components lives here: intents,
//! tasks, execution results, drops and capsules, plus identifier
//! generation. Components own instances of these types; the ownership
//! rules are documented on each type.

pub mod capsule;
pub mod drop;
pub mod id;
pub mod intent;
pub mod result;
pub mod task;

pub use capsule::{Capsule, CapsuleMetadata, Manifest, ManifestEntry, QualityBand, SecurityRisk};
pub use drop::{DropBundle, DropMetadata, DropStatus, DropType};
pub use intent::{Intent, IntentStatus};
pub use result::{AgentExecutionResult, TaskError};
pub use task::{Priority, Task, TaskStatus, TaskType};
