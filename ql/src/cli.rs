//! Command-line interface definitions

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// QuantumLayer - intent-to-artifact orchestration engine
#[derive(Debug, Parser)]
#[command(name = "ql", version, about = "Turn a natural-language intent into a validated capsule")]
pub struct Cli {
    /// Path to the YAML config (default: user config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one intent through the full pipeline
    Run {
        /// The natural-language intent
        intent: String,

        /// Worker pool size override
        #[arg(long)]
        workers: Option<usize>,

        /// Output directory override
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Disable the HITL gate (everything auto-approves)
        #[arg(long)]
        no_hitl: bool,

        /// Sandbox backend: container, process or stub
        #[arg(long)]
        sandbox: Option<String>,

        /// Offline run with the scripted backend and stub sandbox
        #[arg(long)]
        dry_run: bool,

        /// Emit a byte-reproducible archive
        #[arg(long)]
        reproducible: bool,
    },

    /// List known intents
    List {
        /// Filter by status (pending, processing, completed, failed)
        #[arg(long)]
        status: Option<String>,
    },

    /// Inspect a capsule archive
    Inspect {
        /// Path to a .qlcapsule file
        capsule: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_parsing() {
        let cli = Cli::parse_from(["ql", "run", "Build a Go service", "--workers", "4", "--no-hitl"]);
        match cli.command {
            Command::Run {
                intent,
                workers,
                no_hitl,
                dry_run,
                ..
            } => {
                assert_eq!(intent, "Build a Go service");
                assert_eq!(workers, Some(4));
                assert!(no_hitl);
                assert!(!dry_run);
            }
            other => panic!("expected run, got {:?}", other),
        }
    }

    #[test]
    fn test_list_parsing() {
        let cli = Cli::parse_from(["ql", "list", "--status", "completed"]);
        assert!(matches!(cli.command, Command::List { status: Some(s) } if s == "completed"));
    }

    #[test]
    fn test_inspect_parsing() {
        let cli = Cli::parse_from(["ql", "inspect", "out/QLC-1.qlcapsule"]);
        assert!(matches!(cli.command, Command::Inspect { .. }));
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::parse_from(["ql", "--config", "/tmp/ql.yml", "list"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/ql.yml")));
    }
}
