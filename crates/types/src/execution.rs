//! Execution records, accumulated step state, and the append-only history log.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue, json};

/// Lifecycle status of an execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Steps are being driven.
    Running,
    /// Suspended until a pending decision is resolved.
    Waiting,
    /// Step-mode execution parked between steps.
    Paused,
    /// Finished without an unhandled failure.
    Completed,
    /// Finished because a step failed without a failure transition.
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Terminal statuses never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "running" => Ok(Self::Running),
            "waiting" => Ok(Self::Waiting),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown execution status '{other}'")),
        }
    }
}

/// How the driver advances an execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Run until the workflow ends or suspends.
    #[default]
    Auto,
    /// Run exactly one step per driver call.
    Step,
}

/// One run of a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: String,
    pub workflow_id: String,
    #[serde(default)]
    pub mode: ExecutionMode,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub current_step: Option<String>,
    #[serde(default)]
    pub state: ExecutionState,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Classification of how a finished run ended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ExecutionOutcome>,
    /// Workflows worth running next, given `outcome`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub follow_up_suggestions: Vec<FollowUpSuggestion>,
    /// Markdown report written when the run finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl ExecutionRecord {
    /// Build a freshly started execution.
    pub fn new(id: impl Into<String>, workflow_id: impl Into<String>, mode: ExecutionMode, state: ExecutionState) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            workflow_id: workflow_id.into(),
            mode,
            status: ExecutionStatus::Running,
            current_step: None,
            state,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            outcome: None,
            follow_up_suggestions: Vec::new(),
            summary: None,
        }
    }

    /// Apply a partial update in place, maintaining timestamps.
    pub fn apply(&mut self, update: ExecutionUpdate) {
        let now = Utc::now();
        if let Some(status) = update.status {
            self.status = status;
            if status.is_terminal() {
                self.completed_at = Some(now);
            }
        }
        if let Some(current_step) = update.current_step {
            self.current_step = current_step;
        }
        if let Some(state) = update.state {
            self.state = state;
        }
        if let Some(error) = update.error {
            self.error = Some(error);
        }
        if let Some(outcome) = update.outcome {
            self.outcome = Some(outcome);
        }
        if let Some(suggestions) = update.follow_up_suggestions {
            self.follow_up_suggestions = suggestions;
        }
        if let Some(summary) = update.summary {
            self.summary = Some(summary);
        }
        self.updated_at = now;
    }
}

/// Partial update of an execution record. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionUpdate {
    pub status: Option<ExecutionStatus>,
    /// `Some(None)` clears the current step.
    pub current_step: Option<Option<String>>,
    pub state: Option<ExecutionState>,
    pub error: Option<String>,
    pub outcome: Option<ExecutionOutcome>,
    pub follow_up_suggestions: Option<Vec<FollowUpSuggestion>>,
    pub summary: Option<String>,
}

impl ExecutionUpdate {
    pub fn status(status: ExecutionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn position(current_step: Option<&str>, state: &ExecutionState) -> Self {
        Self {
            current_step: Some(current_step.map(str::to_string)),
            state: Some(state.clone()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_state(mut self, state: &ExecutionState) -> Self {
        self.state = Some(state.clone());
        self
    }

    pub fn with_current_step(mut self, current_step: Option<&str>) -> Self {
        self.current_step = Some(current_step.map(str::to_string));
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_outcome(mut self, outcome: ExecutionOutcome, suggestions: Vec<FollowUpSuggestion>, summary: String) -> Self {
        self.outcome = Some(outcome);
        self.follow_up_suggestions = Some(suggestions);
        self.summary = Some(summary);
        self
    }
}

/// How a finished execution ended, judged from the outputs it accumulated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionOutcome {
    /// No step ever recorded an outcome.
    Unknown,
    /// A step reported that there was nothing left to do.
    NoTasks,
    /// A step reported every task as complete.
    AllComplete,
    /// A step produced a new version tag.
    VersionCreated,
    Failed,
    Completed,
}

impl ExecutionOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::NoTasks => "no-tasks",
            Self::AllComplete => "all-complete",
            Self::VersionCreated => "version-created",
            Self::Failed => "failed",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A workflow suggested to run after an execution finished.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpSuggestion {
    pub workflow_id: String,
    pub name: String,
    pub description: String,
    pub reason: String,
}

/// Filter for listing executions.
#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    pub workflow_id: Option<String>,
    pub status: Option<ExecutionStatus>,
    /// Maximum number of records; `0` means unlimited.
    pub limit: usize,
}

/// Accumulated state owned by a single execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    /// Data supplied when the run was requested.
    #[serde(default)]
    pub trigger: JsonValue,
    /// Latest recorded outcome per step id.
    #[serde(default)]
    pub steps: IndexMap<String, StepRecord>,
    /// Run metadata exposed to templates under `workflow.*`.
    #[serde(default)]
    pub workflow: WorkflowContext,
    /// Position inside a subloop when the run suspended mid-block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subloop: Option<SubloopCursor>,
}

impl ExecutionState {
    pub fn new(trigger: JsonValue, workflow: WorkflowContext) -> Self {
        Self {
            trigger,
            steps: IndexMap::new(),
            workflow,
            subloop: None,
        }
    }

    /// Record the outcome for a step. Later writes replace earlier ones.
    pub fn record_step(&mut self, step_id: impl Into<String>, record: StepRecord) {
        self.steps.insert(step_id.into(), record);
    }

    /// Step records rendered as a JSON object keyed by step id.
    pub fn steps_value(&self) -> JsonValue {
        let steps: JsonMap<String, JsonValue> = self
            .steps
            .iter()
            .map(|(step_id, record)| (step_id.clone(), record.to_value()))
            .collect();
        JsonValue::Object(steps)
    }

    /// JSON document that references and conditions are resolved against.
    pub fn scope(&self) -> JsonValue {
        json!({
            "trigger": self.trigger,
            "steps": self.steps_value(),
            "workflow": self.workflow,
        })
    }
}

/// Run metadata available to templates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowContext {
    pub execution_id: String,
    pub workflow_id: String,
    #[serde(default)]
    pub version_tag: Option<String>,
}

/// Outcome class of a recorded step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepRecordStatus {
    Success,
    Failure,
    Pending,
}

impl StepRecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Pending => "pending",
        }
    }
}

/// Recorded outcome of one step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub status: StepRecordStatus,
    #[serde(default = "empty_object")]
    pub outputs: JsonValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_id: Option<String>,
    /// Subloop iteration that produced this record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u32>,
    #[serde(default)]
    pub duration_ms: u64,
}

fn empty_object() -> JsonValue {
    JsonValue::Object(JsonMap::new())
}

impl StepRecord {
    pub fn success(outputs: JsonValue) -> Self {
        Self {
            status: StepRecordStatus::Success,
            outputs,
            error: None,
            decision_id: None,
            iteration: None,
            duration_ms: 0,
        }
    }

    pub fn to_value(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

/// Lifecycle of one step run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepExecutionStatus {
    Running,
    Completed,
    Failed,
    Pending,
}

impl StepExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Pending => "pending",
        }
    }

    /// Conventional process-style return code; `None` while unsettled.
    pub fn return_code(self) -> Option<i32> {
        match self {
            Self::Completed => Some(0),
            Self::Failed => Some(1),
            Self::Running | Self::Pending => None,
        }
    }
}

/// One run of one step, kept for every run including subloop repeats.
///
/// Unlike [`StepRecord`], which holds only the latest outcome per step id,
/// these rows accumulate and carry the inputs each run was given.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepExecution {
    /// Position within the execution, starting at 1. Assigned by the store.
    pub sequence: u64,
    pub execution_id: String,
    pub step_id: String,
    pub module: String,
    pub action: String,
    /// Resolved inputs; `null` when resolution failed.
    #[serde(default)]
    pub inputs: JsonValue,
    pub status: StepExecutionStatus,
    #[serde(default = "empty_object")]
    pub outputs: JsonValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub return_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u32>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl StepExecution {
    /// A running row; the store fills in `sequence` on insert.
    pub fn started(
        execution_id: impl Into<String>,
        step_id: impl Into<String>,
        module: impl Into<String>,
        action: impl Into<String>,
        inputs: JsonValue,
        iteration: Option<u32>,
    ) -> Self {
        Self {
            sequence: 0,
            execution_id: execution_id.into(),
            step_id: step_id.into(),
            module: module.into(),
            action: action.into(),
            inputs,
            status: StepExecutionStatus::Running,
            outputs: empty_object(),
            error: None,
            return_code: None,
            iteration,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: 0,
        }
    }

    pub fn apply(&mut self, update: StepExecutionUpdate) {
        self.status = update.status;
        self.return_code = update.status.return_code();
        if let Some(outputs) = update.outputs {
            self.outputs = outputs;
        }
        if update.error.is_some() {
            self.error = update.error;
        }
        if let Some(duration_ms) = update.duration_ms {
            self.duration_ms = duration_ms;
        }
        if self.return_code.is_some() {
            self.completed_at = Some(Utc::now());
        }
    }
}

/// Settles a [`StepExecution`].
#[derive(Debug, Clone, PartialEq)]
pub struct StepExecutionUpdate {
    pub status: StepExecutionStatus,
    pub outputs: Option<JsonValue>,
    pub error: Option<String>,
    pub duration_ms: Option<u64>,
}

impl StepExecutionUpdate {
    pub fn status(status: StepExecutionStatus) -> Self {
        Self {
            status,
            outputs: None,
            error: None,
            duration_ms: None,
        }
    }

    pub fn with_outputs(mut self, outputs: JsonValue) -> Self {
        self.outputs = Some(outputs);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// Where a suspended subloop left off.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubloopCursor {
    /// Label of the subloop (see `SubloopDefinition::label`).
    pub subloop: String,
    /// Iteration that was running, 1-based.
    pub iteration: u32,
    /// Index within the block of the step that suspended.
    pub step_index: usize,
    /// Decisions left pending by steps that did not pause the loop.
    #[serde(default)]
    pub deferred_decisions: Vec<String>,
}

/// Kinds of audit events appended to the history log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HistoryEventKind {
    WorkflowStarted,
    StepStarted,
    StepCompleted,
    StepFailed,
    StepPending,
    DecisionRequested,
    DecisionResolved,
    DecisionDeferred,
    SubloopIterationStart,
    SubloopIterationComplete,
    WorkflowWaiting,
    WorkflowResumed,
    WorkflowCompleted,
    WorkflowFailed,
}

impl HistoryEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WorkflowStarted => "workflow_started",
            Self::StepStarted => "step_started",
            Self::StepCompleted => "step_completed",
            Self::StepFailed => "step_failed",
            Self::StepPending => "step_pending",
            Self::DecisionRequested => "decision_requested",
            Self::DecisionResolved => "decision_resolved",
            Self::DecisionDeferred => "decision_deferred",
            Self::SubloopIterationStart => "subloop_iteration_start",
            Self::SubloopIterationComplete => "subloop_iteration_complete",
            Self::WorkflowWaiting => "workflow_waiting",
            Self::WorkflowResumed => "workflow_resumed",
            Self::WorkflowCompleted => "workflow_completed",
            Self::WorkflowFailed => "workflow_failed",
        }
    }
}

impl fmt::Display for HistoryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable audit record. Never consulted for control decisions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Monotonic position within the execution's log, starting at 1.
    pub sequence: u64,
    pub execution_id: String,
    pub event: HistoryEventKind,
    #[serde(default)]
    pub step_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: JsonValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            ExecutionStatus::Running,
            ExecutionStatus::Waiting,
            ExecutionStatus::Paused,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<ExecutionStatus>().unwrap(), status);
        }
        assert!("done".parse::<ExecutionStatus>().is_err());
    }

    #[test]
    fn apply_sets_completion_timestamp_for_terminal_status() {
        let mut record = ExecutionRecord::new("e1", "wf", ExecutionMode::Auto, ExecutionState::default());
        record.apply(ExecutionUpdate::status(ExecutionStatus::Waiting));
        assert!(record.completed_at.is_none());
        record.apply(ExecutionUpdate::status(ExecutionStatus::Completed).with_current_step(None));
        assert!(record.completed_at.is_some());
        assert!(record.current_step.is_none());
    }

    #[test]
    fn scope_exposes_step_records_by_id() {
        let mut state = ExecutionState::new(
            json!({"task": "lint"}),
            WorkflowContext {
                execution_id: "e1".into(),
                workflow_id: "wf".into(),
                version_tag: None,
            },
        );
        state.record_step("build", StepRecord::success(json!({"artifact": "app.tar"})));
        let scope = state.scope();
        assert_eq!(scope["trigger"]["task"], "lint");
        assert_eq!(scope["steps"]["build"]["status"], "success");
        assert_eq!(scope["steps"]["build"]["outputs"]["artifact"], "app.tar");
        assert_eq!(scope["workflow"]["executionId"], "e1");
    }

    #[test]
    fn step_execution_settles_with_return_code() {
        let mut run = StepExecution::started("e1", "lint", "testing", "run-tests", json!({"command": "make"}), Some(2));
        assert_eq!(run.return_code, None);
        run.apply(StepExecutionUpdate::status(StepExecutionStatus::Pending));
        assert!(run.completed_at.is_none());
        run.apply(
            StepExecutionUpdate::status(StepExecutionStatus::Failed)
                .with_error("exit 2")
                .with_duration(15),
        );
        assert_eq!(run.return_code, Some(1));
        assert_eq!(run.error.as_deref(), Some("exit 2"));
        assert!(run.completed_at.is_some());
        assert_eq!(run.duration_ms, 15);
    }

    #[test]
    fn outcomes_serialize_as_kebab_case() {
        assert_eq!(serde_json::to_value(ExecutionOutcome::NoTasks).unwrap(), json!("no-tasks"));
        let parsed: ExecutionOutcome = serde_json::from_value(json!("version-created")).unwrap();
        assert_eq!(parsed, ExecutionOutcome::VersionCreated);
        assert_eq!(ExecutionOutcome::AllComplete.to_string(), "all-complete");
    }

    #[test]
    fn history_event_kinds_serialize_as_snake_case() {
        let value = serde_json::to_value(HistoryEventKind::SubloopIterationStart).unwrap();
        assert_eq!(value, json!("subloop_iteration_start"));
        assert_eq!(HistoryEventKind::StepCompleted.to_string(), "step_completed");
    }
}
