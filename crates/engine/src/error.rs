//! Error taxonomy for the engine.
//!
//! Step-level failures ([`StepError`]) never escape the step executor; they are
//! folded into a failed step result and, one level up, into a `failed`
//! execution. [`EngineError`] is reserved for infrastructure problems and for
//! driver calls that do not fit the execution's current state.

use cadence_store::StoreError;
use cadence_types::ExecutionStatus;
use thiserror::Error;

/// A reference in a step input that could not be resolved.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("unresolved reference '{reference}'")]
    Unresolved { reference: String },
    #[error("invalid reference '{reference}': {reason}")]
    InvalidSyntax { reference: String, reason: String },
}

/// Terminal failure of a single step.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("failed to resolve inputs for step '{step_id}': {source}")]
    Resolution {
        step_id: String,
        #[source]
        source: ResolutionError,
    },
    #[error("module '{module}' is not registered")]
    ModuleNotFound { module: String },
    #[error("module '{module}' has no action '{action}'")]
    ActionNotFound { module: String, action: String },
    #[error("action '{module}.{action}' failed: {message}")]
    Action { module: String, action: String, message: String },
}

impl StepError {
    /// Short machine-readable classification recorded in history metadata.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Resolution { .. } => "resolution_error",
            Self::ModuleNotFound { .. } => "module_not_found",
            Self::ActionNotFound { .. } => "action_not_found",
            Self::Action { .. } => "action_error",
        }
    }
}

/// Rejections surfaced to callers of the decision protocol.
#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("decision '{0}' not found")]
    NotFound(String),
    #[error("decision '{0}' is already resolved")]
    AlreadyResolved(String),
    #[error("a non-empty choice is required to resolve decision '{0}'")]
    EmptyChoice(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures of the driver-facing engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Decision(#[from] DecisionError),
    #[error("execution '{0}' not found")]
    ExecutionNotFound(String),
    #[error("workflow '{workflow}' has no step '{step_id}'")]
    UnknownStep { workflow: String, step_id: String },
    #[error("workflow '{workflow}' has no subloop '{label}'")]
    UnknownSubloop { workflow: String, label: String },
    #[error("execution '{execution_id}' is {status}; {operation} requires a {expected} execution")]
    InvalidState {
        execution_id: String,
        status: ExecutionStatus,
        operation: &'static str,
        expected: ExecutionStatus,
    },
    #[error("execution '{execution_id}' belongs to workflow '{expected}', not '{actual}'")]
    WorkflowMismatch {
        execution_id: String,
        expected: String,
        actual: String,
    },
    #[error("execution '{execution_id}' has no decision recorded for step '{step_id}'")]
    MissingDecision { execution_id: String, step_id: String },
    #[error("decision '{decision_id}' is still pending")]
    DecisionPending { decision_id: String },
    #[error("invalid workflow: {}", .0.join("; "))]
    InvalidWorkflow(Vec<String>),
}
