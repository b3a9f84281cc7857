//! End-to-end pipeline tests
//!
//! Each test drives the full orchestrator with a deterministic scripted
//! LLM backend and the in-process stub sandbox, and asserts on events,
//! statuses and artifacts.

use std::sync::Arc;
use std::time::Duration;

use quantumlayer::cancel::{CancelSource, CancelToken};
use quantumlayer::config::Config;
use quantumlayer::domain::IntentStatus;
use quantumlayer::events::EventKind;
use quantumlayer::llm::ScriptedBackend;
use quantumlayer::orchestrator::{Orchestrator, RunError};
use quantumlayer::sandbox::StubBackend;
use quantumlayer::store::MemoryStore;
use quantumlayer::validation::{FixedValidator, HeuristicValidator, ValidationService};

const HELLO_PLAN: &str = r#"[
    {"id": "T1", "type": "codegen", "description": "scaffold", "dependencies": [], "priority": "high"},
    {"id": "T2", "type": "codegen", "description": "handlers", "dependencies": ["T1"], "priority": "medium"},
    {"id": "T3", "type": "test", "description": "write tests", "dependencies": ["T2"], "priority": "medium"},
    {"id": "T4", "type": "doc", "description": "write docs", "dependencies": ["T2"], "priority": "low"}
]"#;

const SCAFFOLD_REPLY: &str = r#"{"files": {
    "go.mod": "module hello\n\ngo 1.22\n",
    "main.go": "package main\n\nimport \"net/http\"\n\nfunc main() {\n\thttp.ListenAndServe(\":8080\", nil)\n}\n"
}}"#;

const HANDLERS_REPLY: &str = r#"{"files": {
    "handlers.go": "package main\n\nimport \"net/http\"\n\nfunc health(w http.ResponseWriter, r *http.Request) {\n\tw.WriteHeader(http.StatusOK)\n}\n"
}}"#;

const TESTS_REPLY: &str = r#"{"files": {
    "handlers_test.go": "package main\n\nimport \"testing\"\n\nfunc TestHealth(t *testing.T) {}\n"
}}"#;

const DOCS_REPLY: &str = r##"{"files": {
    "README.md": "# Hello service\n\nA Go HTTP hello-world with a health endpoint, generated end to end."
}}"##;

fn hello_backend() -> ScriptedBackend {
    // More specific needles first: dependency summaries in later prompts
    // mention upstream file names, which would shadow looser rules.
    ScriptedBackend::new()
        .with_rule("decompose", HELLO_PLAN)
        .with_rule("write tests", TESTS_REPLY)
        .with_rule("write docs", DOCS_REPLY)
        .with_rule("handlers", HANDLERS_REPLY)
        .with_rule("scaffold", SCAFFOLD_REPLY)
}

fn test_config(temp: &tempfile::TempDir) -> Config {
    let mut config = Config::default();
    config.llm.provider = "scripted".to_string();
    config.sandbox.backend = "stub".to_string();
    config.output.dir = temp.path().to_path_buf();
    config.output.reproducible = true;
    config.store.backend = "memory".to_string();
    config
}

fn build_orchestrator(
    config: Config,
    llm: ScriptedBackend,
    sandbox: StubBackend,
    validator: Arc<dyn ValidationService>,
) -> Orchestrator {
    Orchestrator::new(
        config,
        Arc::new(llm),
        Arc::new(sandbox),
        validator,
        Arc::new(MemoryStore::default()),
    )
    .unwrap()
}

/// Scenario A - happy path: four tasks, three drops, a scoring capsule
#[tokio::test]
async fn scenario_a_happy_path() {
    let temp = tempfile::tempdir().unwrap();
    let orchestrator = build_orchestrator(
        test_config(&temp),
        hello_backend(),
        StubBackend::new(),
        Arc::new(HeuristicValidator),
    );

    let outcome = orchestrator
        .run(
            "Build a Go HTTP hello-world with a health endpoint",
            CancelToken::none(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.intent.status, IntentStatus::Completed);
    assert_eq!(outcome.intent.tasks.len(), 4);

    // One drop of each expected type, all accepted
    let types: Vec<String> = outcome.drops.iter().map(|d| d.drop_type.to_string()).collect();
    assert!(types.contains(&"codebase".to_string()));
    assert!(types.contains(&"tests".to_string()));
    assert!(types.contains(&"documentation".to_string()));
    assert!(outcome.drops.iter().all(|d| d.is_accepted()));

    assert!(outcome.capsule.metadata.overall_score >= 80);

    let manifest_paths: Vec<&str> = outcome.capsule.manifest.files.iter().map(|f| f.path.as_str()).collect();
    for expected in [
        "project/main.go",
        "project/go.mod",
        "project/handlers_test.go",
        "project/README.md",
    ] {
        assert!(manifest_paths.contains(&expected), "manifest missing {}", expected);
    }

    assert!(outcome.archive_path.exists());
}

/// Scenario B - failing dependency: T2 fails, T3/T4 skip, no capsule
#[tokio::test]
async fn scenario_b_failing_dependency() {
    let temp = tempfile::tempdir().unwrap();
    let sandbox = StubBackend::new().with_exit_rule("write handlers.go", 1);
    let orchestrator = build_orchestrator(
        test_config(&temp),
        hello_backend(),
        sandbox,
        Arc::new(HeuristicValidator),
    );
    let bus = orchestrator.bus();
    let mut rx = bus.subscribe();

    let err = orchestrator
        .run("Build a Go HTTP hello-world with a health endpoint", CancelToken::none())
        .await
        .unwrap_err();

    match err {
        RunError::TasksFailed { failed } => assert_eq!(failed.len(), 1, "only T2 fails"),
        other => panic!("expected TasksFailed, got {:?}", other),
    }

    let mut skipped = Vec::new();
    let mut failed_events = 0;
    let mut workflow_failed = false;
    let mut workflow_completed = false;
    while let Ok(event) = rx.try_recv() {
        match event.kind {
            EventKind::TaskSkipped { task_id, skip_cause } => skipped.push((task_id, skip_cause)),
            EventKind::TaskFailed { .. } => failed_events += 1,
            EventKind::WorkflowFailed { .. } => workflow_failed = true,
            EventKind::WorkflowCompleted { .. } => workflow_completed = true,
            _ => {}
        }
    }

    // T3 and T4 skipped, both blaming the failed T2
    assert_eq!(skipped.len(), 2);
    let causes: Vec<&str> = skipped.iter().map(|(_, c)| c.as_str()).collect();
    assert!(causes.iter().all(|c| c == &causes[0]));
    assert_eq!(failed_events, 1);
    assert!(workflow_failed);
    assert!(!workflow_completed);

    // No capsule archive on disk
    assert!(find_capsules(temp.path()).is_empty());
}

/// Scenario C - cycle: graph validation fails, nothing executes
#[tokio::test]
async fn scenario_c_cycle() {
    let temp = tempfile::tempdir().unwrap();
    let cyclic_plan = r#"[
        {"id": "T1", "type": "codegen", "description": "a", "dependencies": ["T2"]},
        {"id": "T2", "type": "codegen", "description": "b", "dependencies": ["T1"]}
    ]"#;
    let sandbox = StubBackend::new();
    let orchestrator = build_orchestrator(
        test_config(&temp),
        ScriptedBackend::new().with_rule("decompose", cyclic_plan),
        sandbox.clone(),
        Arc::new(HeuristicValidator),
    );
    let bus = orchestrator.bus();
    let mut rx = bus.subscribe();

    let err = orchestrator.run("Build something circular", CancelToken::none()).await.unwrap_err();

    match err {
        RunError::Graph(quantumlayer::graph::GraphError::Cycle { path }) => {
            // [first, second, first] - the closed walk
            assert_eq!(path.len(), 3);
            assert_eq!(path[0], path[2]);
        }
        other => panic!("expected cycle error, got {:?}", other),
    }

    // No execution began
    assert_eq!(sandbox.created_session_count(), 0);
    while let Ok(event) = rx.try_recv() {
        assert_ne!(event.type_str(), "task.started");
        assert_ne!(event.type_str(), "workflow.started");
    }
}

/// Scenario D - cancellation mid-run: running sandbox torn down, pending
/// tasks cancelled, partial outputs persisted
#[tokio::test]
async fn scenario_d_cancellation() {
    let temp = tempfile::tempdir().unwrap();
    let mut config = test_config(&temp);
    config.executor.workers = 1;

    // Slow sandbox so T2 is reliably in flight when we cancel
    let sandbox = StubBackend::new().with_delay(Duration::from_millis(100));
    let orchestrator = build_orchestrator(config, hello_backend(), sandbox.clone(), Arc::new(HeuristicValidator));
    let bus = orchestrator.bus();
    let mut rx = bus.subscribe();

    let source = CancelSource::new();
    let token = source.token();

    let run = tokio::spawn(async move {
        orchestrator
            .run("Build a Go HTTP hello-world with a health endpoint", token)
            .await
    });

    // Wait for the second task to start, then cancel
    let mut started = 0;
    loop {
        let event = tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("pipeline stalled")
            .expect("bus closed");
        if event.type_str() == "task.started" {
            started += 1;
            if started == 2 {
                source.cancel();
                break;
            }
        }
    }

    let err = run.await.unwrap().unwrap_err();
    assert!(matches!(err, RunError::Cancelled));

    // The cancelled workflow event fired and no sandbox session survived
    let mut workflow_cancelled = false;
    while let Ok(event) = rx.try_recv() {
        if event.type_str() == "workflow.cancelled" {
            workflow_cancelled = true;
        }
    }
    assert!(workflow_cancelled);
    assert_eq!(sandbox.live_session_count(), 0);

    // T1's output was persisted before cancellation
    let outputs = find_outputs(temp.path());
    assert!(!outputs.is_empty(), "expected at least T1's output on disk");
}

/// Scenario E - HITL auto-reject: low scores reject the only drop, so
/// assembly fails with no approved drops
#[tokio::test]
async fn scenario_e_hitl_auto_reject() {
    let temp = tempfile::tempdir().unwrap();
    let single_plan = r#"[
        {"id": "T1", "type": "codegen", "description": "scaffold", "dependencies": [], "priority": "high"}
    ]"#;
    let orchestrator = build_orchestrator(
        test_config(&temp),
        ScriptedBackend::new()
            .with_rule("decompose", single_plan)
            .with_rule("scaffold", SCAFFOLD_REPLY),
        StubBackend::new(),
        // Quality 40 puts the codebase drop below the reject threshold
        Arc::new(FixedValidator::with_scores(40, 30)),
    );

    let err = orchestrator.run("Build something low quality", CancelToken::none()).await.unwrap_err();
    assert!(matches!(err, RunError::Assemble(_)));
    assert!(find_capsules(temp.path()).is_empty());
}

/// Scenario F - concurrent independent tasks: pool of 2 never runs 3
#[tokio::test]
async fn scenario_f_concurrent_independent_tasks() {
    let temp = tempfile::tempdir().unwrap();
    let mut config = test_config(&temp);
    config.executor.workers = 2;

    let independent_plan = r#"[
        {"id": "A", "type": "analyze", "description": "assess part a", "priority": "high"},
        {"id": "B", "type": "analyze", "description": "assess part b", "priority": "medium"},
        {"id": "C", "type": "analyze", "description": "assess part c", "priority": "low"}
    ]"#;
    let orchestrator = build_orchestrator(
        config,
        ScriptedBackend::new()
            .with_rule("decompose", independent_plan)
            .with_default_reply("A thorough assessment of the component in question, with recommendations."),
        StubBackend::new().with_delay(Duration::from_millis(60)),
        Arc::new(HeuristicValidator),
    );
    let bus = orchestrator.bus();
    let mut rx = bus.subscribe();

    let outcome = orchestrator.run("Assess the system", CancelToken::none()).await.unwrap();
    assert_eq!(outcome.intent.status, IntentStatus::Completed);

    // Replay events: concurrency bounded by the pool, priority picks first
    let mut running = 0i32;
    let mut max_running = 0i32;
    let mut starts = Vec::new();
    while let Ok(event) = rx.try_recv() {
        match &event.kind {
            EventKind::TaskStarted { task_id, .. } => {
                running += 1;
                max_running = max_running.max(running);
                starts.push(task_id.clone());
            }
            EventKind::TaskCompleted { .. } | EventKind::TaskFailed { .. } => running -= 1,
            _ => {}
        }
    }
    assert_eq!(starts.len(), 3);
    assert!(max_running <= 2, "ran {} tasks at once", max_running);
}

fn find_capsules(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    find_by(dir, &|p| p.extension().is_some_and(|e| e == "qlcapsule"))
}

fn find_outputs(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    find_by(dir, &|p| p.file_name().is_some_and(|n| n == "output.txt"))
}

fn find_by(dir: &std::path::Path, pred: &dyn Fn(&std::path::Path) -> bool) -> Vec<std::path::PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else { continue };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if pred(&path) {
                found.push(path);
            }
        }
    }
    found
}
