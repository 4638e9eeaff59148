use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use cadence_engine::{EngineConfig, WorkflowRunner, builtin_registry, list_workflows, load_workflow};
use cadence_store::{JsonFileStore, WorkflowStore};
use cadence_types::{ExecutionFilter, ExecutionMode, WorkflowDefinition, validate_workflow};
use clap::Parser;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command, DecisionCommand, WorkflowArgs};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = EngineConfig::from_env()?;
    if let Some(path) = cli.store.clone() {
        config = config.with_store_path(path);
    }
    debug!(store = %config.store_path.display(), "using store");
    let store: Arc<dyn WorkflowStore> = Arc::new(JsonFileStore::new(Some(config.store_path.clone()))?);
    let runner = WorkflowRunner::new(store, builtin_registry());

    run_command(&runner, &config, cli.command).await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run_command(runner: &WorkflowRunner, config: &EngineConfig, command: Command) -> Result<()> {
    match command {
        Command::Run { workflow, trigger, step } => {
            let definition = load(&workflow, config)?;
            let trigger = parse_trigger(trigger.as_deref())?;
            let mode = if step { ExecutionMode::Step } else { ExecutionMode::Auto };
            let record = runner.start(&definition, trigger, mode).await?;
            print_json(&record)
        }
        Command::Next { execution, workflow } => {
            let definition = load(&workflow, config)?;
            let record = runner.execute_next_step(&execution, &definition).await?;
            print_json(&record)
        }
        Command::Resume { execution, workflow } => {
            let definition = load(&workflow, config)?;
            let record = runner.resume(&execution, &definition).await?;
            print_json(&record)
        }
        Command::Status { execution } => print_json(&runner.status(&execution)?),
        Command::History { execution } => {
            let history = runner
                .store()
                .history(&execution)
                .with_context(|| format!("load history for {execution}"))?;
            print_json(&history)
        }
        Command::List { workflow, status, limit } => {
            let filter = ExecutionFilter {
                workflow_id: workflow,
                status,
                limit,
            };
            print_json(&runner.list_executions(&filter)?)
        }
        Command::Decisions(command) => run_decision_command(runner, command),
        Command::Validate { workflow } => {
            let definition = load(&workflow, config)?;
            match validate_workflow(&definition) {
                Ok(()) => {
                    println!("{} is valid", definition.identifier());
                    Ok(())
                }
                Err(problems) => {
                    for problem in &problems {
                        eprintln!("- {problem}");
                    }
                    anyhow::bail!("{} has {} problem(s)", definition.identifier(), problems.len())
                }
            }
        }
        Command::Workflows => {
            debug!(dir = %config.workflows_dir.display(), "listing workflows");
            print_json(&list_workflows(config)?)
        }
        Command::Modules => print_json(&runner.registry().summaries()),
    }
}

fn run_decision_command(runner: &WorkflowRunner, command: DecisionCommand) -> Result<()> {
    let decisions = runner.decisions();
    match command {
        DecisionCommand::List { execution: Some(execution) } => print_json(&decisions.decisions_for_execution(&execution)?),
        DecisionCommand::List { execution: None } => print_json(&decisions.open_decisions()?),
        DecisionCommand::Show { decision } => {
            let found = decisions
                .get_decision(&decision)?
                .with_context(|| format!("decision '{decision}' not found"))?;
            print_json(&found)
        }
        DecisionCommand::Resolve { decision, choice, notes } => print_json(&decisions.resolve_decision(&decision, &choice, notes)?),
    }
}

fn load(args: &WorkflowArgs, config: &EngineConfig) -> Result<WorkflowDefinition> {
    load_workflow(&args.file, args.name.as_deref(), config)
}

/// Trigger text is JSON or YAML; a leading `@` names a file to read.
fn parse_trigger(raw: Option<&str>) -> Result<Value> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(Value::Object(Default::default()));
    };
    let text = match raw.strip_prefix('@') {
        Some(path) => fs::read_to_string(path).with_context(|| format!("read trigger file {path}"))?,
        None => raw.to_string(),
    };
    serde_yaml::from_str(&text).context("trigger must be valid JSON or YAML")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn trigger_defaults_to_empty_object() {
        assert_eq!(parse_trigger(None).unwrap(), json!({}));
        assert_eq!(parse_trigger(Some("  ")).unwrap(), json!({}));
    }

    #[test]
    fn trigger_accepts_json_yaml_and_files() {
        assert_eq!(parse_trigger(Some(r#"{"pr": 42}"#)).unwrap(), json!({"pr": 42}));
        assert_eq!(parse_trigger(Some("branch: main")).unwrap(), json!({"branch": "main"}));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trigger.json");
        fs::write(&path, r#"{"from": "file"}"#).unwrap();
        let argument = format!("@{}", path.display());
        assert_eq!(parse_trigger(Some(&argument)).unwrap(), json!({"from": "file"}));
    }
}
