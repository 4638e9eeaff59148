//! Strongly typed workflow definitions shared by the store, engine, and CLI.
//!
//! Definitions are immutable once loaded. Steps keep authoring order and are
//! connected through explicit `onSuccess` / `onFailure` transitions; repeated
//! blocks are declared separately as [`SubloopDefinition`]s that reference a
//! contiguous run of step identifiers.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::execution::ExecutionOutcome;

pub mod validation;

pub use validation::validate_workflow;

/// Default safety bound applied to subloops that omit `maxIterations`.
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// Collection of named workflows loaded from a single document.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct WorkflowBundle {
    /// Workflows keyed by identifier, preserving document order.
    pub workflows: IndexMap<String, WorkflowDefinition>,
}

/// Describes a fully authored workflow: metadata, ordered steps, and repeated blocks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    /// Canonical workflow identifier. Falls back to `name` when blank.
    #[serde(default)]
    pub id: String,
    /// Human-readable workflow name.
    #[serde(default)]
    pub name: String,
    /// Authoring version of the definition.
    #[serde(default = "default_version")]
    pub version: String,
    /// Optional descriptive copy.
    #[serde(default)]
    pub description: Option<String>,
    /// Ordered steps. Execution starts at the first entry.
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
    /// Bounded, conditionally repeated blocks of steps.
    #[serde(default)]
    pub subloops: Vec<SubloopDefinition>,
    /// Workflows to suggest once a run ends with a matching outcome.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub follow_up_workflows: Vec<FollowUpWorkflow>,
}

impl Default for WorkflowDefinition {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            version: default_version(),
            description: None,
            steps: Vec::new(),
            subloops: Vec::new(),
            follow_up_workflows: Vec::new(),
        }
    }
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl WorkflowDefinition {
    /// Identifier used for lookups and persistence.
    pub fn identifier(&self) -> &str {
        if self.id.trim().is_empty() { &self.name } else { &self.id }
    }

    /// Look up a step by identifier.
    pub fn step(&self, step_id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|step| step.id == step_id)
    }

    /// Position of a step in authoring order.
    pub fn step_index(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|step| step.id == step_id)
    }

    /// Entry point of the workflow.
    pub fn first_step(&self) -> Option<&StepDefinition> {
        self.steps.first()
    }

    /// Returns the subloop whose block begins at `step_id`.
    pub fn subloop_starting_at(&self, step_id: &str) -> Option<&SubloopDefinition> {
        self.subloops
            .iter()
            .find(|subloop| subloop.steps.first().is_some_and(|first| first == step_id))
    }

    /// Returns the subloop with the given label (see [`SubloopDefinition::label`]).
    pub fn subloop_by_label(&self, label: &str) -> Option<&SubloopDefinition> {
        self.subloops.iter().find(|subloop| subloop.label() == label)
    }

    /// Resolve a subloop's step identifiers into definitions, in block order.
    ///
    /// Returns `None` when any referenced step is missing.
    pub fn subloop_steps(&self, subloop: &SubloopDefinition) -> Option<Vec<&StepDefinition>> {
        subloop.steps.iter().map(|step_id| self.step(step_id)).collect()
    }
}

/// A single unit of work bound to one module action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StepDefinition {
    /// Identifier unique within the workflow.
    pub id: String,
    /// Optional display label.
    #[serde(default)]
    pub name: Option<String>,
    /// Optional descriptive copy.
    #[serde(default)]
    pub description: Option<String>,
    /// Module that owns the action (for example `claude` or `testing`).
    #[serde(default)]
    pub module: String,
    /// Action name inside the module.
    #[serde(default)]
    pub action: String,
    /// Parameter name to literal value or reference expression, in authoring order.
    #[serde(default)]
    pub inputs: IndexMap<String, JsonValue>,
    /// Optional JSON schema describing the outputs. Informational only.
    #[serde(default)]
    pub output_schema: Option<JsonValue>,
    /// Destination after a successful outcome.
    #[serde(default)]
    pub on_success: Option<Transition>,
    /// Destination after a failed outcome. Absent means the run fails.
    #[serde(default)]
    pub on_failure: Option<String>,
}

/// A workflow worth running after this one, keyed on how this one ended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpWorkflow {
    pub workflow_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    /// Outcomes that trigger the suggestion. Absent never matches.
    #[serde(default)]
    pub on_outcome: Option<OutcomeMatch>,
}

impl FollowUpWorkflow {
    pub fn applies_to(&self, outcome: ExecutionOutcome) -> bool {
        self.on_outcome.as_ref().is_some_and(|matcher| matcher.matches(outcome))
    }
}

/// `onOutcome: no-tasks` or `onOutcome: [no-tasks, all-complete]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum OutcomeMatch {
    One(ExecutionOutcome),
    Many(Vec<ExecutionOutcome>),
}

impl OutcomeMatch {
    pub fn matches(&self, outcome: ExecutionOutcome) -> bool {
        match self {
            Self::One(expected) => *expected == outcome,
            Self::Many(expected) => expected.contains(&outcome),
        }
    }
}

/// Success transition: either a plain step id or a conditional branch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Transition {
    /// Unconditionally continue at the named step.
    Step(String),
    /// Evaluate `condition` and continue at `then` or `else`.
    Conditional(ConditionalTransition),
}

/// Conditional success branch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConditionalTransition {
    /// Boolean expression evaluated against the step result and accumulated state.
    pub condition: String,
    /// Step taken when the condition holds. Absent ends the workflow.
    #[serde(default, rename = "then")]
    pub then_step: Option<String>,
    /// Step taken otherwise. Absent ends the workflow.
    #[serde(default, rename = "else")]
    pub else_step: Option<String>,
}

/// A bounded, conditionally repeated block of contiguous steps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubloopDefinition {
    /// Optional identifier; defaults to the first step id.
    #[serde(default)]
    pub id: Option<String>,
    /// Step identifiers repeated in order on every iteration.
    #[serde(default)]
    pub steps: Vec<String>,
    /// Hard safety bound on the number of iterations.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Continuation condition evaluated after every full iteration.
    #[serde(default)]
    pub condition: Option<String>,
    /// Stop and suspend the execution when a step requests a decision.
    #[serde(default)]
    pub break_on_decision: bool,
}

impl Default for SubloopDefinition {
    fn default() -> Self {
        Self {
            id: None,
            steps: Vec::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            condition: None,
            break_on_decision: false,
        }
    }
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

impl SubloopDefinition {
    /// Stable label used in history entries and resume cursors.
    pub fn label(&self) -> String {
        match &self.id {
            Some(id) if !id.trim().is_empty() => id.clone(),
            _ => self.steps.first().cloned().unwrap_or_default(),
        }
    }

    /// Whether `step_id` belongs to this block.
    pub fn contains(&self, step_id: &str) -> bool {
        self.steps.iter().any(|candidate| candidate == step_id)
    }
}
