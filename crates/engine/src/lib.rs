//! # Cadence Engine
//!
//! The Cadence Engine loads workflow definitions and executes them step by
//! step, persisting every transition so that runs can pause for human
//! decisions and pick up again later.
//!
//! ## Key Features
//!
//! - **Workflow Parsing**: Loads YAML/JSON workflow documents (single or multi-workflow)
//! - **Template Resolution**: `${{ ... }}` references into trigger data, prior step outputs, and workflow metadata
//! - **Subloops**: Bounded, conditionally repeated blocks of steps
//! - **Decisions**: Steps may suspend a run until a human picks a proposal
//!
//! ## Usage
//!
//! ```rust
//! use cadence_engine::parse_workflow_file;
//!
//! let temp_dir = tempfile::tempdir()?;
//! let workflow_path = temp_dir.path().join("workflow.yaml");
//! std::fs::write(&workflow_path, r#"
//! id: "review-loop"
//! steps:
//!   - id: "announce"
//!     module: "system"
//!     action: "log"
//!     inputs:
//!       message: "starting"
//! "#)?;
//!
//! let workflow_bundle = parse_workflow_file(&workflow_path, 10)?;
//! for (name, definition) in &workflow_bundle.workflows {
//!     println!("Workflow: {}", name);
//!     println!("Steps: {}", definition.steps.len());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **`registry`**: module and action lookup behind the [`ActionHandler`] trait
//! - **`resolve`** / **`condition`**: template resolution and expression evaluation
//! - **`executor`**: the step executor and the subloop controller
//! - **`decision`**: creation and resolution of pending decisions
//! - **`runner`**: the driver that walks a workflow, pauses, and resumes
//! - **`outcome`**: outcome classification, follow-up suggestions, and run summaries
//! - **`modules`**: built-in `system`, `testing`, and `claude` modules

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

pub mod condition;
pub mod config;
pub mod decision;
pub mod error;
pub mod executor;
pub mod modules;
pub mod outcome;
pub mod registry;
pub mod resolve;
pub mod runner;

pub use cadence_types::{WorkflowBundle, WorkflowDefinition};
pub use config::EngineConfig;
pub use decision::{DecisionCoordinator, DecisionRequest};
pub use error::{DecisionError, EngineError, ResolutionError, StepError};
pub use executor::{
    ActionContext, StepExecutor, StepLogger, StepOutcome, StepResult, StepStatus, SubloopController, SubloopResult, SubloopStopReason,
};
pub use modules::builtin_registry;
pub use outcome::{determine_outcome, execution_summary, follow_up_suggestions};
pub use registry::{ActionCapability, ActionHandler, ModuleDefinition, ModuleRegistry, ModuleSummary, action_fn};
pub use runner::{ExecutionSnapshot, WorkflowRunner};

/// Key used for a single-workflow document that carries neither `id` nor `name`.
const FALLBACK_WORKFLOW_KEY: &str = "default";

/// Extensions recognized as workflow documents.
const WORKFLOW_EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

/// Catalog entry for a workflow found in the workflows directory.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSummary {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub steps: usize,
    pub file_path: PathBuf,
}

/// Loads a workflow file from the filesystem.
///
/// YAML is a superset of JSON, so both formats go through the same parser.
/// Subloops that omit `maxIterations` receive `default_max_iterations`.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not valid YAML/JSON, or
/// does not match either supported document shape.
pub fn parse_workflow_file(file_path: impl AsRef<Path>, default_max_iterations: u32) -> Result<WorkflowBundle> {
    let file_path = file_path.as_ref();
    let file_content = fs::read(file_path).with_context(|| format!("Failed to read workflow file: {}", file_path.display()))?;
    let content_string = String::from_utf8_lossy(&file_content);
    parse_workflow_document(&content_string, default_max_iterations).with_context(|| format!("Invalid workflow file: {}", file_path.display()))
}

/// Parses workflow document text.
///
/// Accepts either a single workflow definition or a multi-workflow document
/// with definitions under a `workflows` key.
pub fn parse_workflow_document(content: &str, default_max_iterations: u32) -> Result<WorkflowBundle> {
    let mut document: Value = serde_yaml::from_str(content).context("workflow document is not valid YAML or JSON")?;

    // Check for the multi-workflow shape first so that a bundle is never
    // accepted as a single workflow with ignored fields.
    if let Some(workflows) = document.get_mut("workflows").and_then(Value::as_object_mut) {
        let mut bundle = WorkflowBundle::default();
        for (key, raw) in workflows.iter_mut() {
            apply_subloop_defaults(raw, default_max_iterations);
            let mut definition: WorkflowDefinition =
                serde_json::from_value(raw.take()).with_context(|| format!("workflow '{key}' has an unsupported shape"))?;
            if definition.identifier().trim().is_empty() {
                definition.id = key.clone();
            }
            bundle.workflows.insert(key.clone(), definition);
        }
        return Ok(bundle);
    }

    if !document.is_object() {
        bail!(
            "Unsupported workflow document format. Expected one of:\n\
             - Single workflow definition with 'id' or 'name', 'steps', and optional 'subloops'\n\
             - Multi-workflow document with workflows under 'workflows' key\n\
             "
        );
    }

    apply_subloop_defaults(&mut document, default_max_iterations);
    let definition: WorkflowDefinition = serde_json::from_value(document).context("workflow definition has an unsupported shape")?;
    let key = match definition.identifier().trim() {
        "" => FALLBACK_WORKFLOW_KEY.to_string(),
        identifier => identifier.to_string(),
    };

    let mut bundle = WorkflowBundle::default();
    bundle.workflows.insert(key, definition);
    Ok(bundle)
}

/// Loads one workflow from `path`.
///
/// Bare names that do not exist on disk are looked up in the configured
/// workflows directory with `.yaml`, `.yml`, and `.json` extensions. When the
/// file holds several workflows, `name` selects one by key or identifier.
pub fn load_workflow(path: impl AsRef<Path>, name: Option<&str>, config: &EngineConfig) -> Result<WorkflowDefinition> {
    let path = locate_workflow_file(path.as_ref(), config);
    let mut bundle = parse_workflow_file(&path, config.default_max_iterations)?;

    if let Some(name) = name {
        if let Some(definition) = bundle.workflows.shift_remove(name) {
            return Ok(definition);
        }
        return bundle
            .workflows
            .into_values()
            .find(|definition| definition.identifier() == name)
            .with_context(|| format!("workflow '{name}' not found in {}", path.display()));
    }

    match bundle.workflows.len() {
        0 => bail!("{} does not define any workflows", path.display()),
        1 => Ok(bundle.workflows.into_values().next().context("bundle unexpectedly empty")?),
        _ => {
            let names: Vec<&str> = bundle.workflows.keys().map(String::as_str).collect();
            bail!(
                "{} defines several workflows ({}); pick one with --name",
                path.display(),
                names.join(", ")
            )
        }
    }
}

/// Lists every workflow defined under the configured workflows directory.
///
/// Files are visited in name order; each workflow of a multi-workflow
/// document gets its own entry. Files that fail to parse are skipped with a
/// warning, and a missing directory yields an empty list.
pub fn list_workflows(config: &EngineConfig) -> Result<Vec<WorkflowSummary>> {
    let directory = &config.workflows_dir;
    let entries = match fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(error) => return Err(error).with_context(|| format!("Failed to read workflows directory: {}", directory.display())),
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .and_then(|extension| extension.to_str())
                .is_some_and(|extension| WORKFLOW_EXTENSIONS.contains(&extension))
        })
        .collect();
    files.sort();

    let mut summaries = Vec::new();
    for file_path in files {
        let bundle = match parse_workflow_file(&file_path, config.default_max_iterations) {
            Ok(bundle) => bundle,
            Err(error) => {
                warn!(path = %file_path.display(), error = %format!("{error:#}"), "skipping unreadable workflow file");
                continue;
            }
        };
        let stem = file_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        for (key, definition) in bundle.workflows {
            let id = match definition.identifier().trim() {
                "" if key == FALLBACK_WORKFLOW_KEY => stem.clone(),
                "" => key,
                identifier => identifier.to_string(),
            };
            summaries.push(WorkflowSummary {
                name: if definition.name.trim().is_empty() { id.clone() } else { definition.name.clone() },
                id,
                version: definition.version.clone(),
                description: definition.description.clone(),
                steps: definition.steps.len(),
                file_path: file_path.clone(),
            });
        }
    }
    Ok(summaries)
}

fn locate_workflow_file(path: &Path, config: &EngineConfig) -> PathBuf {
    if path.exists() || path.is_absolute() {
        return path.to_path_buf();
    }
    let base = config.workflows_dir.join(path);
    if base.exists() {
        return base;
    }
    WORKFLOW_EXTENSIONS
        .iter()
        .map(|extension| base.with_extension(extension))
        .find(|candidate| candidate.exists())
        .unwrap_or_else(|| path.to_path_buf())
}

fn apply_subloop_defaults(definition: &mut Value, default_max_iterations: u32) {
    let Some(subloops) = definition.get_mut("subloops").and_then(Value::as_array_mut) else {
        return;
    };
    for subloop in subloops.iter_mut().filter_map(Value::as_object_mut) {
        subloop
            .entry("maxIterations")
            .or_insert_with(|| Value::from(default_max_iterations));
    }
}
