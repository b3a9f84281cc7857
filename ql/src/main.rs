//! ql - QuantumLayer CLI entry point

use std::io::Read;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result, bail};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use quantumlayer::cli::{Cli, Command};
use quantumlayer::config::Config;
use quantumlayer::domain::IntentStatus;
use quantumlayer::events::spawn_event_logger;
use quantumlayer::llm::{LlmBackend, ScriptedBackend, create_backend};
use quantumlayer::orchestrator::Orchestrator;
use quantumlayer::sandbox::{ContainerBackend, ProcessBackend, SandboxBackend, StubBackend};
use quantumlayer::store::{MemoryStore, SqliteStore, StateStore};
use quantumlayer::validation::HeuristicValidator;
use quantumlayer::{CancelSource, RunError};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Run {
            intent,
            workers,
            output_dir,
            no_hitl,
            sandbox,
            dry_run,
            reproducible,
        } => {
            if let Some(workers) = workers {
                config.executor.workers = workers;
            }
            if let Some(dir) = output_dir {
                config.output.dir = dir;
            }
            if no_hitl {
                config.hitl.enabled = false;
            }
            if let Some(backend) = sandbox {
                config.sandbox.backend = backend;
            }
            if reproducible {
                config.output.reproducible = true;
            }
            if dry_run {
                config.llm.provider = "scripted".to_string();
                config.sandbox.backend = "stub".to_string();
            }
            config.validate()?;
            run_intent(config, &intent, dry_run).await
        }
        Command::List { status } => list_intents(config, status).await,
        Command::Inspect { capsule } => inspect_capsule(&capsule),
    }
}

async fn run_intent(config: Config, intent: &str, dry_run: bool) -> Result<()> {
    let llm: Arc<dyn LlmBackend> = if dry_run {
        Arc::new(demo_backend())
    } else {
        create_backend(&config.llm).map_err(|e| eyre::eyre!("{}", e))?
    };

    let sandbox: Arc<dyn SandboxBackend> = match config.sandbox.backend.as_str() {
        "container" => Arc::new(ContainerBackend::new()),
        "process" => Arc::new(ProcessBackend),
        _ => Arc::new(StubBackend::new()),
    };

    let store = open_store(&config)?;
    let orchestrator = Orchestrator::new(config.clone(), llm, sandbox, Arc::new(HeuristicValidator), store)?;

    // Mirror every event into <output>/events.jsonl
    let bus = orchestrator.bus();
    let logger = spawn_event_logger(&bus, config.output.dir.join("events.jsonl"));
    // The logger exits when the last sender drops; holding this Arc past
    // the run would keep it alive forever.
    drop(bus);

    // Ctrl-C cancels the run; sandboxes tear down, pending tasks cancel
    let source = CancelSource::new();
    let token = source.token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            source.cancel();
        }
    });

    let outcome = orchestrator.run(intent, token).await;
    drop(orchestrator);
    if let Err(e) = logger.await.wrap_err("event logger task panicked")? {
        warn!(error = %e, "event logger exited with error");
    }

    match outcome {
        Ok(outcome) => {
            println!("{} {}", "intent".bold(), outcome.intent.id);
            println!("{} {}", "capsule".bold(), outcome.capsule.id.green());
            println!(
                "{} {} ({} files, quality {}, risk {})",
                "archive".bold(),
                outcome.archive_path.display(),
                outcome.capsule.manifest.files.len(),
                outcome.capsule.quality_score,
                outcome.capsule.metadata.security_risk
            );
            for drop in &outcome.drops {
                let status = match drop.status {
                    quantumlayer::DropStatus::Approved => "approved".green(),
                    quantumlayer::DropStatus::Modified => "modified".yellow(),
                    quantumlayer::DropStatus::Rejected => "rejected".red(),
                    quantumlayer::DropStatus::Generated => "generated".normal(),
                };
                println!("  {} {} [{}]", drop.id, drop.name, status);
            }
            Ok(())
        }
        Err(RunError::Cancelled) => {
            eprintln!("{}", "run cancelled; partial task outputs kept".yellow());
            std::process::exit(130);
        }
        Err(e) => {
            eprintln!("{} {}", "run failed:".red().bold(), e);
            std::process::exit(1);
        }
    }
}

/// Deterministic offline backend for --dry-run
fn demo_backend() -> ScriptedBackend {
    const PLAN: &str = r#"[
        {"id": "t1", "type": "codegen", "description": "scaffold the service", "dependencies": [], "priority": "high"},
        {"id": "t2", "type": "test", "description": "write tests", "dependencies": ["t1"], "priority": "medium"},
        {"id": "t3", "type": "doc", "description": "write documentation", "dependencies": ["t1"], "priority": "low"}
    ]"#;
    const CODE: &str = r#"{"files": {"go.mod": "module demo\n\ngo 1.22\n", "main.go": "package main\n\nimport \"fmt\"\n\nfunc main() {\n\tfmt.Println(\"hello\")\n}\n"}}"#;
    const TESTS: &str = r#"{"files": {"main_test.go": "package main\n\nimport \"testing\"\n\nfunc TestMain(t *testing.T) {}\n"}}"#;
    const DOCS: &str = r##"{"files": {"README.md": "# Demo service\n\nGenerated during a dry run to exercise the pipeline end to end."}}"##;

    ScriptedBackend::new()
        .with_rule("decompose", PLAN)
        .with_rule("scaffold the service", CODE)
        .with_rule("write tests", TESTS)
        .with_rule("write documentation", DOCS)
}

fn open_store(config: &Config) -> Result<Arc<dyn StateStore>> {
    match config.store.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryStore::default())),
        "sqlite" => {
            let path = config
                .store
                .path
                .clone()
                .unwrap_or_else(|| config.output.dir.join("state").join("ql.db"));
            Ok(Arc::new(SqliteStore::open(&path).map_err(|e| eyre::eyre!("{}", e))?))
        }
        other => bail!("unknown store backend '{}'", other),
    }
}

async fn list_intents(config: Config, status: Option<String>) -> Result<()> {
    let store = open_store(&config)?;
    let filter = match status.as_deref() {
        None => None,
        Some("pending") => Some(IntentStatus::Pending),
        Some("processing") => Some(IntentStatus::Processing),
        Some("completed") => Some(IntentStatus::Completed),
        Some("failed") => Some(IntentStatus::Failed),
        Some(other) => bail!("unknown status '{}'", other),
    };

    let intents = store.list_intents(filter).await.map_err(|e| eyre::eyre!("{}", e))?;
    if intents.is_empty() {
        println!("no intents found");
        return Ok(());
    }
    for intent in intents {
        let status = match intent.status {
            IntentStatus::Completed => intent.status.to_string().green(),
            IntentStatus::Failed => intent.status.to_string().red(),
            _ => intent.status.to_string().yellow(),
        };
        let text: String = intent.text.chars().take(60).collect();
        println!("{}  [{}]  score={:>3}  {}", intent.id, status, intent.overall_score, text);
    }
    Ok(())
}

fn inspect_capsule(path: &std::path::Path) -> Result<()> {
    let file = std::fs::File::open(path).wrap_err_with(|| format!("Failed to open {}", path.display()))?;
    let mut archive = zip::ZipArchive::new(file).wrap_err("Not a valid capsule archive")?;

    let mut metadata = String::new();
    archive
        .by_name("metadata.json")
        .wrap_err("capsule has no metadata.json")?
        .read_to_string(&mut metadata)?;
    let metadata: serde_json::Value = serde_json::from_str(&metadata)?;

    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .wrap_err("capsule has no manifest.json")?
        .read_to_string(&mut manifest)?;
    let manifest: serde_json::Value = serde_json::from_str(&manifest)?;

    println!("{} {}", "capsule".bold(), metadata["capsule_id"].as_str().unwrap_or("?"));
    println!("{} {}", "intent".bold(), metadata["intent_text"].as_str().unwrap_or("?"));
    println!(
        "{} score={} risk={} tasks={}/{}",
        "run".bold(),
        metadata["overall_score"],
        metadata["security_risk"].as_str().unwrap_or("?"),
        metadata["successful_tasks"],
        metadata["total_tasks"],
    );
    let files = manifest["files"].as_array().map(Vec::len).unwrap_or(0);
    println!("{} {} files", "manifest".bold(), files);
    for entry in manifest["files"].as_array().into_iter().flatten().take(25) {
        println!("  {:>8}  {}", entry["size"], entry["path"].as_str().unwrap_or("?"));
    }
    info!("inspection complete");
    Ok(())
}
