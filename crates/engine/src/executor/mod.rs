//! Execution engine: runs individual steps and repeated blocks of steps,
//! persisting every transition through the store.
//!
//! - [`StepExecutor`] resolves inputs, dispatches to the module registry, and
//!   records the outcome plus the next transition
//! - [`SubloopController`] repeats a contiguous block under an iteration bound
//!   and a continuation condition, pausing on decisions when asked to
//! - [`ActionContext`] is what handlers see: identifiers, a state snapshot, the
//!   store, the decision coordinator, and a step-scoped logger

use std::sync::Arc;

use cadence_store::WorkflowStore;
use cadence_types::ExecutionState;
use tracing::{debug, error, info, warn};

use crate::decision::DecisionCoordinator;

pub mod step;
pub mod subloop;
pub mod types;

pub use step::{StepExecutor, determine_next_step};
pub use subloop::{SubloopController, SubloopResult, SubloopStopReason};
pub use types::{StepOutcome, StepResult, StepStatus};

/// Everything an action handler may touch while it runs.
#[derive(Clone)]
pub struct ActionContext {
    pub execution_id: String,
    pub step_id: String,
    /// Subloop iteration the step runs in, when inside a block.
    pub iteration: Option<u32>,
    /// Read-only snapshot of the execution state before the step ran.
    pub state: ExecutionState,
    pub store: Arc<dyn WorkflowStore>,
    pub decisions: DecisionCoordinator,
    pub logger: StepLogger,
}

/// Logger handed to actions; every event carries the execution and step ids.
#[derive(Debug, Clone)]
pub struct StepLogger {
    execution_id: String,
    step_id: String,
}

impl StepLogger {
    pub fn new(execution_id: impl Into<String>, step_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            step_id: step_id.into(),
        }
    }

    pub fn debug(&self, message: &str) {
        debug!(execution_id = %self.execution_id, step_id = %self.step_id, "{message}");
    }

    pub fn info(&self, message: &str) {
        info!(execution_id = %self.execution_id, step_id = %self.step_id, "{message}");
    }

    pub fn warn(&self, message: &str) {
        warn!(execution_id = %self.execution_id, step_id = %self.step_id, "{message}");
    }

    pub fn error(&self, message: &str) {
        error!(execution_id = %self.execution_id, step_id = %self.step_id, "{message}");
    }

    /// Log at a level named by workflow input; unknown names fall back to info.
    pub fn log(&self, level: &str, message: &str) {
        match level.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => self.debug(message),
            "warn" | "warning" => self.warn(message),
            "error" => self.error(message),
            _ => self.info(message),
        }
    }
}
