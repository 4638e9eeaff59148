//! Core executor data types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// What an action handler reports back to the executor.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The action completed and produced `outputs`.
    Success { outputs: Value },
    /// The action failed explicitly. `outputs` may carry partial data.
    Failure { error: String, outputs: Value },
    /// The action raised a decision and the run must wait for it.
    Pending { decision_id: String, outputs: Value },
}

impl StepOutcome {
    pub fn success(outputs: Value) -> Self {
        Self::Success { outputs }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
            outputs: Value::Object(Map::new()),
        }
    }

    pub fn failure_with_outputs(error: impl Into<String>, outputs: Value) -> Self {
        Self::Failure {
            error: error.into(),
            outputs,
        }
    }

    pub fn pending(decision_id: impl Into<String>) -> Self {
        let decision_id = decision_id.into();
        let mut outputs = Map::new();
        outputs.insert("decisionId".to_string(), Value::String(decision_id.clone()));
        Self::Pending {
            decision_id,
            outputs: Value::Object(outputs),
        }
    }

    /// Fold an `anyhow` result into an outcome.
    pub fn from_result(result: anyhow::Result<Value>) -> Self {
        match result {
            Ok(outputs) => Self::success(outputs),
            Err(error) => Self::failure(format!("{error:#}")),
        }
    }
}

/// Status of an executed step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StepStatus {
    /// Step executed and returned successfully.
    Succeeded,
    /// Step could not run or the action reported failure.
    Failed,
    /// Step is waiting on a decision.
    Pending,
}

/// Result of running a step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    /// Step identifier.
    pub step_id: String,
    /// Final status of this step execution.
    pub status: StepStatus,
    /// Outputs recorded for the step.
    pub outputs: Value,
    /// Failure message when `status` is `Failed`.
    pub error: Option<String>,
    /// Classification of the failure (`resolution_error`, `module_not_found`, ...).
    pub error_kind: Option<String>,
    /// Decision awaited when `status` is `Pending`.
    pub decision_id: Option<String>,
    /// Wall-clock time spent in the action.
    pub duration_ms: u64,
    /// Step to run next according to the step's transitions. `None` ends the
    /// workflow (or, for failures, means there is no failure handler).
    pub next_step: Option<String>,
}

impl StepResult {
    pub fn succeeded(&self) -> bool {
        self.status == StepStatus::Succeeded
    }
}
