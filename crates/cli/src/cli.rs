//! Command-line surface.

use std::path::PathBuf;

use cadence_types::ExecutionStatus;
use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "cadence", version, about = "Run and inspect Cadence workflows")]
pub struct Cli {
    /// JSON store file (overrides CADENCE_STORE_PATH).
    #[arg(long, global = true, value_name = "PATH")]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start a new execution of a workflow.
    Run {
        #[command(flatten)]
        workflow: WorkflowArgs,
        /// Trigger payload as JSON/YAML text, or `@path` to read it from a file.
        #[arg(long, value_name = "JSON")]
        trigger: Option<String>,
        /// Execute one step at a time, pausing in between.
        #[arg(long)]
        step: bool,
    },
    /// Run the next step of a paused step-mode execution.
    Next {
        execution: String,
        #[command(flatten)]
        workflow: WorkflowArgs,
    },
    /// Continue a waiting execution after its decision was resolved.
    Resume {
        execution: String,
        #[command(flatten)]
        workflow: WorkflowArgs,
    },
    /// Show an execution with its history and decisions.
    Status { execution: String },
    /// Show the audit history of an execution.
    History { execution: String },
    /// List executions, newest first.
    List {
        #[arg(long)]
        workflow: Option<String>,
        #[arg(long)]
        status: Option<ExecutionStatus>,
        /// Maximum number of executions; 0 lists all.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Inspect and resolve pending decisions.
    #[command(subcommand)]
    Decisions(DecisionCommand),
    /// Check a workflow file for structural problems.
    Validate {
        #[command(flatten)]
        workflow: WorkflowArgs,
    },
    /// List workflows found in the workflows directory.
    Workflows,
    /// List registered modules and their actions.
    Modules,
}

#[derive(Debug, Subcommand)]
pub enum DecisionCommand {
    /// Decisions for one execution, or every open decision when omitted.
    List { execution: Option<String> },
    /// Show one decision.
    Show { decision: String },
    /// Resolve a pending decision.
    Resolve {
        decision: String,
        #[arg(long)]
        choice: String,
        #[arg(long)]
        notes: Option<String>,
    },
}

#[derive(Debug, Args)]
pub struct WorkflowArgs {
    /// Workflow file, or a bare name looked up in the workflows directory.
    pub file: PathBuf,
    /// Workflow to use when the file holds several.
    #[arg(long)]
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_with_trigger_and_step_mode() {
        let cli = Cli::try_parse_from(["cadence", "run", "flow.yaml", "--trigger", "{\"a\":1}", "--step"]).unwrap();
        let Command::Run { workflow, trigger, step } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(workflow.file, PathBuf::from("flow.yaml"));
        assert_eq!(trigger.as_deref(), Some("{\"a\":1}"));
        assert!(step);
    }

    #[test]
    fn parses_decision_resolution() {
        let cli = Cli::try_parse_from(["cadence", "decisions", "resolve", "abc", "--choice", "approve", "--store", "/tmp/s.json"]).unwrap();
        assert_eq!(cli.store, Some(PathBuf::from("/tmp/s.json")));
        let Command::Decisions(DecisionCommand::Resolve { decision, choice, notes }) = cli.command else {
            panic!("expected decisions resolve");
        };
        assert_eq!(decision, "abc");
        assert_eq!(choice, "approve");
        assert_eq!(notes, None);
    }

    #[test]
    fn parses_workflows_listing() {
        let cli = Cli::try_parse_from(["cadence", "workflows"]).unwrap();
        assert!(matches!(cli.command, Command::Workflows));
    }

    #[test]
    fn status_filter_is_parsed() {
        let cli = Cli::try_parse_from(["cadence", "list", "--status", "waiting"]).unwrap();
        let Command::List { status, limit, .. } = cli.command else {
            panic!("expected list");
        };
        assert_eq!(status, Some(ExecutionStatus::Waiting));
        assert_eq!(limit, 20);
    }
}
