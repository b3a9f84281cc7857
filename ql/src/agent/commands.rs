//! Command planning - files map to sandbox command sequence

use std::collections::BTreeMap;

use tracing::debug;

use crate::domain::TaskType;
use crate::sandbox::SandboxCommand;

/// Translate a task's files map into the sandbox commands that realize
/// and verify it
pub fn plan_commands(task_type: TaskType, files: &BTreeMap<String, String>) -> Vec<SandboxCommand> {
    debug!(%task_type, file_count = files.len(), "plan_commands: called");
    let mut commands: Vec<SandboxCommand> = files
        .iter()
        .map(|(path, content)| SandboxCommand::write_file(path, content))
        .collect();

    match task_type {
        TaskType::Codegen | TaskType::Test => {
            if !files.contains_key("go.mod") {
                commands.push(SandboxCommand::exec(["go", "mod", "init", "sandbox"]));
            }
            commands.push(SandboxCommand::exec(["go", "mod", "tidy"]));
            commands.push(SandboxCommand::exec(["go", "build", "-o", "output", "."]));
            if files.keys().any(|path| path.ends_with("_test.go")) {
                commands.push(SandboxCommand::exec(["go", "test", "-v", "./..."]));
            }
        }
        TaskType::Infra => {
            commands.push(SandboxCommand::exec(["terraform", "init"]));
            commands.push(SandboxCommand::exec(["terraform", "validate"]));
            commands.push(SandboxCommand::exec(["terraform", "plan"]));
        }
        TaskType::Doc => {
            let mut sources: Vec<&String> = files.keys().filter(|p| p.ends_with(".md")).collect();
            sources.sort();
            if !sources.is_empty() {
                let mut argv = vec!["pandoc".to_string()];
                argv.extend(sources.into_iter().cloned());
                argv.push("-o".to_string());
                argv.push("output.pdf".to_string());
                commands.push(SandboxCommand::exec(argv));
            }
        }
        TaskType::Analyze => {
            commands.push(SandboxCommand::exec(["echo", "Analysis completed"]));
        }
    }

    commands
}
