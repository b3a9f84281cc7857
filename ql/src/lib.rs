//! QuantumLayer - intent-to-artifact orchestration engine
//!
//! The engine turns a natural-language intent into a validated, packaged
//! deliverable:
//!
//! 1. **Decompose**: one LLM call compiles the intent into typed tasks
//!    with dependencies ([`parser`])
//! 2. **Compile**: the task list becomes an immutable DAG with a
//!    deterministic execution order ([`graph`])
//! 3. **Execute**: a bounded agent pool runs tasks in dependency order;
//!    each agent prompts the LLM, drives a resource-limited sandbox and
//!    collects a validation verdict ([`executor`], [`agent`], [`sandbox`])
//! 4. **Package**: completed outputs group into reviewable drops
//!    ([`packager`]), pass the HITL gate ([`hitl`]) and merge into a
//!    `.qlcapsule` archive with manifest and reports ([`capsule`])
//!
//! External collaborators stay behind narrow traits: [`llm::LlmBackend`],
//! [`validation::ValidationService`], [`store::StateStore`] and
//! [`hitl::Reviewer`]. Lifecycle events stream over the in-process
//! [`events::EventBus`].

pub mod agent;
pub mod cancel;
pub mod capsule;
pub mod cli;
pub mod config;
pub mod domain;
pub mod events;
pub mod executor;
pub mod extract;
pub mod graph;
pub mod hitl;
pub mod llm;
pub mod orchestrator;
pub mod packager;
pub mod parser;
pub mod prompts;
pub mod sandbox;
pub mod store;
pub mod validation;

// Re-export commonly used types
pub use agent::{Agent, AgentConfig, AgentDeps, TaskContext};
pub use cancel::{CancelSource, CancelToken};
pub use capsule::{AssembleError, AssemblerConfig, CapsuleAssembler};
pub use config::Config;
pub use domain::{
    AgentExecutionResult, Capsule, DropBundle, DropStatus, DropType, Intent, IntentStatus, Priority, Task, TaskError,
    TaskStatus, TaskType,
};
pub use events::{Event, EventBus, EventEmitter, EventKind};
pub use executor::{DagExecutor, ExecutionReport, ExecutorConfig};
pub use graph::{GraphBuilder, GraphError, TaskGraph};
pub use hitl::{HitlGate, HitlGateConfig, ReviewAction, ReviewDecision, Reviewer};
pub use llm::{CompletionRequest, HttpBackend, LlmBackend, LlmError, RetryBackend, ScriptedBackend};
pub use orchestrator::{Orchestrator, RunError, RunOutcome};
pub use packager::DropPackager;
pub use parser::{IntentParser, ParseError};
pub use sandbox::{
    ContainerBackend, ExecutionResult, ProcessBackend, SandboxBackend, SandboxCommand, SandboxConfig, SandboxError,
    SandboxSession, StubBackend,
};
pub use store::{MemoryStore, SqliteStore, StateStore, StoreError};
pub use validation::{HeuristicValidator, ValidationResult, ValidationService};
