//! Orchestrator - top-level run coordinator
//!
//! Owns the intent, the event bus and the cancellation source for one
//! engine process, and drives the pipeline: parse → graph → execute →
//! package → gate → assemble. Store failures are logged and never fail a
//! run; task failures fail the run but leave per-task outputs on disk.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::capsule::{AssembleError, AssemblerConfig, CAPSULE_EXTENSION, CapsuleAssembler};
use crate::config::Config;
use crate::domain::{Capsule, DropBundle, Intent, IntentStatus};
use crate::events::EventBus;
use crate::executor::{DagExecutor, ExecutionReport};
use crate::graph::{GraphBuilder, GraphError};
use crate::hitl::{HitlGate, Reviewer};
use crate::llm::LlmBackend;
use crate::packager::DropPackager;
use crate::parser::{IntentParser, ParseError};
use crate::prompts::PromptLoader;
use crate::sandbox::SandboxBackend;
use crate::store::StateStore;
use crate::validation::ValidationService;

/// How a run can fail, in the order the pipeline can produce them
#[derive(Debug, Error)]
pub enum RunError {
    #[error("intent decomposition failed: {0}")]
    Parse(#[from] ParseError),

    #[error("graph validation failed: {0}")]
    Graph(#[from] GraphError),

    #[error("{} task(s) failed: {}", failed.len(), failed.join(", "))]
    TasksFailed { failed: Vec<String> },

    #[error("run cancelled")]
    Cancelled,

    #[error("capsule assembly failed: {0}")]
    Assemble(#[from] AssembleError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A successful run's artifacts
#[derive(Debug)]
pub struct RunOutcome {
    pub intent: Intent,
    pub capsule: Capsule,
    pub drops: Vec<DropBundle>,
    pub archive_path: PathBuf,
}

/// Top-level coordinator; one per engine process
pub struct Orchestrator {
    config: Config,
    bus: Arc<EventBus>,
    parser: IntentParser,
    executor: DagExecutor,
    gate: HitlGate,
    assembler: CapsuleAssembler,
    store: Arc<dyn StateStore>,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        llm: Arc<dyn LlmBackend>,
        sandbox: Arc<dyn SandboxBackend>,
        validator: Arc<dyn ValidationService>,
        store: Arc<dyn StateStore>,
    ) -> eyre::Result<Self> {
        let bus = Arc::new(EventBus::with_default_capacity());
        let prompts = Arc::new(PromptLoader::new()?);

        let deps = crate::agent::AgentDeps {
            llm: llm.clone(),
            sandbox,
            validator,
            prompts,
        };
        let executor = DagExecutor::new(config.executor_config(), deps, bus.clone());
        let gate = HitlGate::new(config.hitl_config());
        let assembler = CapsuleAssembler::new(AssemblerConfig {
            reproducible: config.output.reproducible,
            ..Default::default()
        });

        Ok(Self {
            parser: IntentParser::new(llm)?,
            config,
            bus,
            executor,
            gate,
            assembler,
            store,
        })
    }

    /// Attach an external reviewer to the HITL gate
    pub fn with_reviewer(mut self, reviewer: Arc<dyn Reviewer>) -> Self {
        self.gate = self.gate.with_reviewer(reviewer);
        self
    }

    /// The bus, for subscribers (loggers, UIs, tests)
    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    /// Drive one intent from text to capsule
    pub async fn run(&self, intent_text: &str, cancel: CancelToken) -> Result<RunOutcome, RunError> {
        let started = std::time::Instant::now();
        let mut intent = Intent::new(intent_text);
        info!(intent_id = %intent.id, "Starting orchestration run");
        self.persist_create(&intent).await;

        let emitter = self.bus.emitter_for("orchestrator");

        // 1. Decompose
        intent.set_status(IntentStatus::Processing);
        self.persist_update(&intent).await;
        let (tasks, metadata) = match self.parser.parse(intent_text, cancel.clone()).await {
            Ok(parsed) => parsed,
            Err(e) => {
                self.fail_run(&mut intent, &e.to_string(), vec![]).await;
                return Err(e.into());
            }
        };
        debug!(task_count = metadata.task_count, "Orchestrator::run: parsed intent");
        intent.tasks = tasks.clone();
        self.persist_update(&intent).await;
        for task in &tasks {
            if let Err(e) = self.store.save_task(&intent.id, task).await {
                warn!(error = %e, "failed to persist task");
            }
        }

        // 2. Compile the graph; no execution begins on a cycle
        let graph = match GraphBuilder::build(tasks) {
            Ok(graph) => graph,
            Err(e) => {
                self.fail_run(&mut intent, &e.to_string(), vec![]).await;
                return Err(e.into());
            }
        };

        emitter.workflow_started(&intent.id, graph.len());

        // 3. Execute
        let report = self.executor.execute(&graph, cancel.clone()).await;

        // Reflect final statuses and agent assignments on the intent's tasks
        for task in &mut intent.tasks {
            if let Some(status) = report.statuses.get(&task.id) {
                task.status = *status;
                task.updated_at = chrono::Utc::now();
            }
            if let Some(result) = report.results.get(&task.id)
                && !result.agent_id.is_empty()
            {
                task.agent_id = Some(result.agent_id.clone());
            }
            if let Err(e) = self.store.save_task(&intent.id, task).await {
                warn!(error = %e, "failed to persist task status");
            }
        }
        self.persist_outputs(&intent, &report).await;

        if cancel.is_cancelled() || report.any_cancelled() {
            emitter.workflow_cancelled(&intent.id);
            intent.set_status(IntentStatus::Failed);
            intent.execution_time_ms = started.elapsed().as_millis() as u64;
            self.persist_update(&intent).await;
            return Err(RunError::Cancelled);
        }

        let failed = report.failed_task_ids(&graph);
        if !failed.is_empty() {
            let first_error = failed
                .first()
                .and_then(|id| report.results.get(id))
                .and_then(|r| r.error.as_ref())
                .map(|e| e.to_string())
                .unwrap_or_else(|| "task failure".to_string());
            emitter.workflow_failed(&intent.id, &first_error, failed.clone());
            intent.set_status(IntentStatus::Failed);
            intent.execution_time_ms = started.elapsed().as_millis() as u64;
            self.persist_update(&intent).await;
            return Err(RunError::TasksFailed { failed });
        }

        // 4. Package and gate
        let drops = DropPackager::package(&intent, &graph, &report);
        let needs_review = drops.iter().any(|d| d.metadata.hitl_required);
        if needs_review {
            emitter.emit(crate::events::EventKind::WorkflowPaused {
                intent_id: intent.id.clone(),
                reason: "awaiting drop review".to_string(),
            });
        }
        let decided = self.gate.decide(drops, cancel.clone()).await;
        if needs_review {
            emitter.emit(crate::events::EventKind::WorkflowResumed {
                intent_id: intent.id.clone(),
            });
        }

        // 5. Assemble and write the capsule
        let capsule = match self.assembler.assemble(&intent, &decided, &report) {
            Ok(capsule) => capsule,
            Err(e) => {
                self.fail_run(&mut intent, &e.to_string(), vec![]).await;
                return Err(e.into());
            }
        };

        let archive_path = self.write_archive(&intent, &capsule).await?;
        if let Err(e) = self.store.save_capsule(&capsule.metadata).await {
            warn!(error = %e, "failed to persist capsule metadata");
        }

        intent.overall_score = capsule.metadata.overall_score;
        intent.execution_time_ms = started.elapsed().as_millis() as u64;
        intent.set_status(IntentStatus::Completed);
        self.persist_update(&intent).await;

        emitter.workflow_completed(&intent.id, intent.overall_score, intent.execution_time_ms);
        info!(
            intent_id = %intent.id,
            capsule_id = %capsule.id,
            score = intent.overall_score,
            elapsed_ms = intent.execution_time_ms,
            "Run completed"
        );

        Ok(RunOutcome {
            intent,
            capsule,
            drops: decided,
            archive_path,
        })
    }

    /// Terminal failure bookkeeping shared by the fatal paths
    async fn fail_run(&self, intent: &mut Intent, error: &str, failed: Vec<String>) {
        self.bus
            .emitter_for("orchestrator")
            .workflow_failed(&intent.id, error, failed);
        intent.set_status(IntentStatus::Failed);
        self.persist_update(intent).await;
    }

    /// Per-task outputs land on disk even for failed and partial runs
    async fn persist_outputs(&self, intent: &Intent, report: &ExecutionReport) {
        let base = self.config.output.dir.join(&intent.id).join("tasks");
        for (task_id, result) in &report.results {
            let dir = base.join(task_id);
            if let Err(e) = tokio::fs::create_dir_all(&dir).await {
                warn!(error = %e, "failed to create task output dir");
                continue;
            }
            if let Err(e) = tokio::fs::write(dir.join("output.txt"), &result.output).await {
                warn!(error = %e, "failed to write task output");
            }
            if let Some(validation) = &result.validation
                && let Err(e) = self.store.save_validation(task_id, validation).await
            {
                warn!(error = %e, "failed to persist validation result");
            }
        }
    }

    async fn write_archive(&self, intent: &Intent, capsule: &Capsule) -> Result<PathBuf, RunError> {
        let dir = self.config.output.dir.join(&intent.id);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{}.{}", capsule.id, CAPSULE_EXTENSION));
        tokio::fs::write(&path, &capsule.archive).await?;
        info!(path = %path.display(), bytes = capsule.archive.len(), "Wrote capsule archive");
        Ok(path)
    }

    async fn persist_create(&self, intent: &Intent) {
        if let Err(e) = self.store.create_intent(intent).await {
            warn!(error = %e, "failed to persist intent creation");
        }
    }

    async fn persist_update(&self, intent: &Intent) {
        if let Err(e) = self.store.update_intent(intent).await {
            warn!(error = %e, "failed to persist intent update");
        }
    }
}

/// Timestamp helper for run directories and logs
pub fn run_timestamp() -> String {
    Utc::now().format("%Y%m%d-%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedBackend;
    use crate::sandbox::StubBackend;
    use crate::store::MemoryStore;
    use crate::validation::HeuristicValidator;

    const PLAN: &str = r#"[
        {"id": "t1", "type": "codegen", "description": "scaffold service", "dependencies": [], "priority": "high"},
        {"id": "t2", "type": "doc", "description": "write docs", "dependencies": ["t1"], "priority": "low"}
    ]"#;

    const CODE_REPLY: &str = r#"{"files": {"main.go": "package main\n\nfunc main() {}\n", "go.mod": "module svc\n\ngo 1.22\n"}}"#;
    const DOC_REPLY: &str = r##"{"files": {"README.md": "# Service\n\nGenerated documentation with plenty of detail."}}"##;

    fn orchestrator(temp: &tempfile::TempDir) -> Orchestrator {
        let mut config = Config::default();
        config.llm.provider = "scripted".to_string();
        config.sandbox.backend = "stub".to_string();
        config.output.dir = temp.path().to_path_buf();
        config.output.reproducible = true;

        let llm = ScriptedBackend::new()
            .with_rule("decompose", PLAN)
            .with_rule("scaffold service", CODE_REPLY)
            .with_rule("write docs", DOC_REPLY)
            .with_default_reply(PLAN);

        Orchestrator::new(
            config,
            Arc::new(llm),
            Arc::new(StubBackend::new()),
            Arc::new(HeuristicValidator),
            Arc::new(MemoryStore::default()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_full_run_produces_capsule() {
        let temp = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(&temp);
        let bus = orchestrator.bus();
        let mut rx = bus.subscribe();

        let outcome = orchestrator
            .run("Build a Go HTTP hello-world", CancelToken::none())
            .await
            .unwrap();

        assert_eq!(outcome.intent.status, IntentStatus::Completed);
        assert!(outcome.archive_path.exists());
        assert!(outcome.archive_path.to_string_lossy().ends_with(".qlcapsule"));
        assert!(!outcome.capsule.archive.is_empty());

        // Per-task outputs on disk
        for task in &outcome.intent.tasks {
            let output = temp
                .path()
                .join(&outcome.intent.id)
                .join("tasks")
                .join(&task.id)
                .join("output.txt");
            assert!(output.exists(), "missing output for {}", task.id);
        }

        // workflow.started then eventually workflow.completed
        let mut types = Vec::new();
        while let Ok(event) = rx.try_recv() {
            types.push(event.type_str().to_string());
        }
        assert!(types.contains(&"workflow.started".to_string()));
        assert_eq!(types.last().unwrap(), "workflow.completed");
    }

    #[tokio::test]
    async fn test_parse_failure_is_fatal() {
        let temp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.llm.provider = "scripted".to_string();
        config.output.dir = temp.path().to_path_buf();

        let orchestrator = Orchestrator::new(
            config,
            Arc::new(ScriptedBackend::new().with_default_reply("not json at all")),
            Arc::new(StubBackend::new()),
            Arc::new(HeuristicValidator),
            Arc::new(MemoryStore::default()),
        )
        .unwrap();

        let err = orchestrator.run("Build something", CancelToken::none()).await.unwrap_err();
        assert!(matches!(err, RunError::Parse(_)));
    }

    #[tokio::test]
    async fn test_task_failure_fails_workflow_without_capsule() {
        let temp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.llm.provider = "scripted".to_string();
        config.output.dir = temp.path().to_path_buf();

        let llm = ScriptedBackend::new()
            .with_rule("decompose", PLAN)
            .with_default_reply(CODE_REPLY);
        let sandbox = StubBackend::new().with_exit_rule("go build", 1);

        let orchestrator = Orchestrator::new(
            config,
            Arc::new(llm),
            Arc::new(sandbox),
            Arc::new(HeuristicValidator),
            Arc::new(MemoryStore::default()),
        )
        .unwrap();
        let bus = orchestrator.bus();
        let mut rx = bus.subscribe();

        let err = orchestrator.run("Build it", CancelToken::none()).await.unwrap_err();
        match err {
            RunError::TasksFailed { failed } => assert_eq!(failed.len(), 1),
            other => panic!("expected TasksFailed, got {:?}", other),
        }

        let mut types = Vec::new();
        while let Ok(event) = rx.try_recv() {
            types.push(event.type_str().to_string());
        }
        assert!(types.contains(&"workflow.failed".to_string()));
        assert!(!types.contains(&"workflow.completed".to_string()));

        // No capsule archive was written
        let archives: Vec<_> = walk_for_capsules(temp.path());
        assert!(archives.is_empty());
    }

    fn walk_for_capsules(dir: &std::path::Path) -> Vec<PathBuf> {
        let mut found = Vec::new();
        let mut stack = vec![dir.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else { continue };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if path.extension().is_some_and(|e| e == "qlcapsule") {
                    found.push(path);
                }
            }
        }
        found
    }
}
