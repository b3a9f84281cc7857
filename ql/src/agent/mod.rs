//! Agent - single-task worker
//!
//! One agent owns one task's execution end to end: it builds a prompt from
//! the task and its dependencies' outputs, calls the LLM backend, turns
//! the reply into sandbox commands, runs them, scores the transcript, asks
//! the validation service for a verdict and publishes lifecycle events.
//!
//! Agents share nothing with each other; everything they need arrives as
//! Arc'd collaborators and everything they produce leaves in the
//! [`AgentExecutionResult`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

pub mod commands;
pub mod output;
pub mod security;

pub use commands::plan_commands;
pub use output::parse_files;
pub use security::{DENYLIST, security_score};

use crate::cancel::CancelToken;
use crate::domain::{AgentExecutionResult, Task, TaskError, TaskType, id};
use crate::events::EventEmitter;
use crate::llm::{CompletionRequest, LlmBackend, LlmError};
use crate::prompts::{DependencyContext, PromptLoader, TaskPromptContext, role_for};
use crate::sandbox::{SandboxBackend, SandboxConfig, SandboxError, SandboxMetrics};
use crate::validation::ValidationService;

/// Transcript truncation threshold per command output
const MAX_CAPTURE: usize = 30_000;

/// Agent lifecycle states (logged, not persisted)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Initializing,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

/// Per-agent tunables
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Budget for the LLM call
    pub llm_timeout: Duration,
    /// Budget for the validation call
    pub validation_timeout: Duration,
    /// Token cap for the completion request
    pub max_tokens: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            llm_timeout: Duration::from_secs(60),
            validation_timeout: Duration::from_secs(30),
            max_tokens: 8192,
        }
    }
}

/// What the executor hands an agent besides the task itself
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    /// Outputs of completed dependency tasks, in topological order
    pub dependencies: Vec<DependencyContext>,
}

/// Tech stack line for the prompt, keyed by task type
fn tech_stack(task_type: TaskType) -> &'static str {
    match task_type {
        TaskType::Codegen | TaskType::Test => "go 1.22, net/http",
        TaskType::Infra => "terraform, kubernetes",
        TaskType::Doc => "markdown, pandoc",
        TaskType::Analyze => "static analysis",
    }
}

/// Collaborators every agent needs
#[derive(Clone)]
pub struct AgentDeps {
    pub llm: Arc<dyn LlmBackend>,
    pub sandbox: Arc<dyn SandboxBackend>,
    pub validator: Arc<dyn ValidationService>,
    pub prompts: Arc<PromptLoader>,
}

/// A single-task worker
pub struct Agent {
    pub id: String,
    deps: AgentDeps,
    emitter: EventEmitter,
    config: AgentConfig,
}

/// Everything the sandbox phase produced
struct SandboxOutcome {
    transcript: String,
    command_lines: Vec<String>,
    metrics: SandboxMetrics,
    nonzero_exits: usize,
    sandbox_time_ms: u64,
    error: Option<TaskError>,
}

impl SandboxOutcome {
    fn empty() -> Self {
        Self {
            transcript: String::new(),
            command_lines: Vec::new(),
            metrics: SandboxMetrics::default(),
            nonzero_exits: 0,
            sandbox_time_ms: 0,
            error: None,
        }
    }
}

impl Agent {
    /// Create an agent for one task, minting its id from the task type
    pub fn new(task_type: TaskType, deps: AgentDeps, emitter: EventEmitter, config: AgentConfig) -> Self {
        let id = id::agent_id(task_type);
        debug!(%id, "Agent::new: created");
        Self {
            id,
            deps,
            emitter,
            config,
        }
    }

    /// Execute one task to a result; never panics, never returns early
    /// without publishing a terminal event
    pub async fn run(&self, task: &Task, ctx: &TaskContext, cancel: CancelToken) -> AgentExecutionResult {
        let started = Utc::now();
        debug!(agent_id = %self.id, task_id = %task.id, state = ?AgentState::Initializing, "Agent::run: starting");
        self.emitter.task_started(&task.id, &self.id);

        // 1-2. Prompt + LLM call
        let reply = match self.complete(task, ctx, cancel.clone()).await {
            Ok(reply) => reply,
            Err(error) => {
                let empty = SandboxOutcome::empty();
                return self.finish_full(task, String::new(), BTreeMap::new(), None, started, Some(error), 0, &empty);
            }
        };

        // 3-4. Parse reply, plan commands
        debug!(agent_id = %self.id, state = ?AgentState::Executing, "Agent::run: executing");
        let files = output::parse_files(task.task_type, &reply);
        let commands = commands::plan_commands(task.task_type, &files);

        // 5. Run commands in a sandbox session
        let sandbox_outcome = self.run_sandbox(task, &commands, cancel.clone()).await;

        // 6. Security score over what actually ran
        let score = security::security_score(&sandbox_outcome.command_lines, sandbox_outcome.nonzero_exits);

        // 7. Validation (only for runs that got through the sandbox)
        let validation = if sandbox_outcome.error.is_none() {
            self.validate(task, &reply, &sandbox_outcome.transcript).await
        } else {
            None
        };

        let output = format!("{}\n--- transcript ---\n{}", reply, sandbox_outcome.transcript);
        let error = sandbox_outcome.error.clone();
        self.finish_full(
            task,
            output,
            files,
            validation,
            started,
            error,
            score,
            &sandbox_outcome,
        )
    }

    async fn complete(&self, task: &Task, ctx: &TaskContext, cancel: CancelToken) -> Result<String, TaskError> {
        let prompt_ctx = TaskPromptContext {
            description: task.description.clone(),
            project_type: task.task_type.project_type().to_string(),
            tech_stack: tech_stack(task.task_type).to_string(),
            dependencies: ctx.dependencies.clone(),
        };
        let prompt = self.deps.prompts.render_task(&prompt_ctx).map_err(|e| TaskError::Llm {
            message: format!("prompt rendering failed: {}", e),
            retryable: false,
        })?;

        let mut request = CompletionRequest::new(role_for(task.task_type), prompt);
        request.max_tokens = self.config.max_tokens;

        debug!(agent_id = %self.id, task_id = %task.id, "Agent::complete: calling backend");
        match tokio::time::timeout(self.config.llm_timeout, self.deps.llm.complete(request, cancel)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(LlmError::Cancelled)) => Err(TaskError::Cancelled),
            Ok(Err(e)) => Err(TaskError::Llm {
                retryable: e.is_retryable(),
                message: e.to_string(),
            }),
            Err(_) => Err(TaskError::Timeout {
                timeout_ms: self.config.llm_timeout.as_millis() as u64,
            }),
        }
    }

    async fn run_sandbox(
        &self,
        task: &Task,
        commands: &[crate::sandbox::SandboxCommand],
        cancel: CancelToken,
    ) -> SandboxOutcome {
        let mut outcome = SandboxOutcome {
            transcript: String::new(),
            command_lines: Vec::new(),
            metrics: SandboxMetrics::default(),
            nonzero_exits: 0,
            sandbox_time_ms: 0,
            error: None,
        };

        let config = SandboxConfig::for_task_type(task.task_type);
        let mut session = match self.deps.sandbox.create(&config).await {
            Ok(session) => session,
            Err(e) => {
                outcome.error = Some(TaskError::Sandbox {
                    kind: e.kind(),
                    message: e.to_string(),
                });
                return outcome;
            }
        };

        for command in commands {
            let line = command.display_line();
            outcome.command_lines.push(line.clone());

            match session.exec(command, cancel.clone()).await {
                Ok(result) => {
                    outcome.metrics.merge(&result.metrics);
                    outcome.sandbox_time_ms += result.duration_ms;
                    push_transcript(&mut outcome.transcript, &line, &result.stdout, &result.stderr, result.exit_code);

                    if !result.success() {
                        outcome.nonzero_exits += 1;
                        outcome.error = Some(TaskError::Sandbox {
                            kind: crate::sandbox::SandboxErrorKind::Exit,
                            message: format!("'{}' exited with code {}", line, result.exit_code),
                        });
                        break;
                    }
                }
                Err(SandboxError::Cancelled) => {
                    outcome.error = Some(TaskError::Cancelled);
                    break;
                }
                Err(e) => {
                    outcome.error = Some(TaskError::Sandbox {
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                    break;
                }
            }
        }

        if let Err(e) = session.destroy().await {
            warn!(agent_id = %self.id, error = %e, "sandbox teardown reported an error");
        }
        outcome
    }

    async fn validate(
        &self,
        task: &Task,
        reply: &str,
        transcript: &str,
    ) -> Option<crate::validation::ValidationResult> {
        match tokio::time::timeout(
            self.config.validation_timeout,
            self.deps.validator.validate(task, reply, transcript),
        )
        .await
        {
            Ok(Ok(result)) => Some(result),
            Ok(Err(e)) => {
                // Validation failure is recorded, never fails the task
                warn!(agent_id = %self.id, task_id = %task.id, error = %e, "validation service failed");
                None
            }
            Err(_) => {
                warn!(agent_id = %self.id, task_id = %task.id, "validation timed out");
                None
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_full(
        &self,
        task: &Task,
        output: String,
        files: BTreeMap<String, String>,
        validation: Option<crate::validation::ValidationResult>,
        started: chrono::DateTime<Utc>,
        error: Option<TaskError>,
        security_score: u8,
        sandbox: &SandboxOutcome,
    ) -> AgentExecutionResult {
        let finished = Utc::now();
        let duration_ms = (finished - started).num_milliseconds().max(0) as u64;
        let sandbox_success = error.is_none() && sandbox.nonzero_exits == 0;

        match &error {
            None => {
                let state = AgentState::Completed;
                debug!(agent_id = %self.id, task_id = %task.id, ?state, "Agent::run: done");
                info!(agent_id = %self.id, task_id = %task.id, duration_ms, "Task completed");
                self.emitter.task_completed(
                    &task.id,
                    &self.id,
                    output.len(),
                    duration_ms,
                    sandbox_success,
                    security_score,
                    sandbox.sandbox_time_ms,
                    validation.as_ref().map(|v| v.overall_score).unwrap_or(0),
                    validation.as_ref().map(|v| v.passed).unwrap_or(false),
                );
            }
            Some(e) => {
                let state = if matches!(e, TaskError::Cancelled) {
                    AgentState::Cancelled
                } else {
                    AgentState::Failed
                };
                debug!(agent_id = %self.id, task_id = %task.id, ?state, error = %e, "Agent::run: done");
                self.emitter.task_failed(&task.id, e.kind(), &e.to_string(), e.retryable());
            }
        }

        AgentExecutionResult {
            task_id: task.id.clone(),
            agent_id: self.id.clone(),
            output,
            files,
            sandbox_metrics: sandbox.metrics,
            sandbox_success,
            security_score,
            validation,
            error,
            started_at: started,
            finished_at: finished,
        }
    }
}

/// Append one command's record to the transcript
fn push_transcript(transcript: &mut String, line: &str, stdout: &str, stderr: &str, exit_code: i32) {
    transcript.push_str(&format!("$ {}\n", line));
    for stream in [stdout, stderr] {
        if !stream.is_empty() {
            if stream.len() > MAX_CAPTURE {
                transcript.push_str(&stream[..MAX_CAPTURE]);
                transcript.push_str(&format!("...[truncated, {} chars total]\n", stream.len()));
            } else {
                transcript.push_str(stream);
                if !stream.ends_with('\n') {
                    transcript.push('\n');
                }
            }
        }
    }
    transcript.push_str(&format!("exit_code={}\n", exit_code));
}
