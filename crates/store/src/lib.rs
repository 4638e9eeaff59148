//! Persistence boundary for the Cadence workflow engine.
//!
//! The engine never touches files directly. It talks to a [`WorkflowStore`], which
//! owns four collections:
//!
//! - execution records (mutable; current step, status, accumulated state),
//! - the per-execution history log (append-only, ordered by sequence),
//! - step executions, one row per step run (settled once, then frozen),
//! - pending decisions (mutable until resolved).
//!
//! Two backends ship with the crate: [`InMemoryStore`] for tests and embedding,
//! and [`JsonFileStore`], which mirrors every write to a pretty-printed JSON file.

mod json_file;
mod memory;
mod state;

use cadence_types::{
    DecisionStatus, DecisionUpdate, ExecutionFilter, ExecutionRecord, ExecutionUpdate, HistoryEntry, HistoryEventKind, PendingDecision,
    StepExecution, StepExecutionUpdate,
};
use serde_json::Value;
use thiserror::Error;

pub use json_file::{JsonFileStore, STORE_FILE_NAME, STORE_PATH_ENV, default_store_path, expand_tilde_path};
pub use memory::InMemoryStore;

/// Errors surfaced by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O failure while reading or writing the store file.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization or deserialization failure.
    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("execution '{0}' not found")]
    ExecutionNotFound(String),
    #[error("decision '{0}' not found")]
    DecisionNotFound(String),
    #[error("step execution {sequence} of execution '{execution_id}' not found")]
    StepExecutionNotFound { execution_id: String, sequence: u64 },
    /// A conditional update found a status other than the one it expected.
    #[error("decision '{id}' is {actual}, expected {expected}")]
    Conflict {
        id: String,
        expected: DecisionStatus,
        actual: DecisionStatus,
    },
    #[error("{kind} '{id}' already exists")]
    DuplicateKey { kind: &'static str, id: String },
}

/// Shared trait implemented by persistence backends.
///
/// Implementations serialize all access internally, so a single instance can be
/// shared across tasks behind an `Arc`.
pub trait WorkflowStore: Send + Sync {
    /// Insert a new execution record. Fails when the id is already taken.
    fn create_execution(&self, record: ExecutionRecord) -> Result<ExecutionRecord, StoreError>;

    fn get_execution(&self, execution_id: &str) -> Result<Option<ExecutionRecord>, StoreError>;

    /// List executions ordered from most recently created to oldest.
    fn list_executions(&self, filter: &ExecutionFilter) -> Result<Vec<ExecutionRecord>, StoreError>;

    /// Apply a partial update and return the stored record.
    ///
    /// Moving into a terminal status stamps `completed_at`.
    fn update_execution(&self, execution_id: &str, update: ExecutionUpdate) -> Result<ExecutionRecord, StoreError>;

    /// Append an entry to the execution's history log.
    fn add_history(
        &self,
        execution_id: &str,
        event: HistoryEventKind,
        step_id: Option<&str>,
        metadata: Value,
    ) -> Result<HistoryEntry, StoreError>;

    /// History for an execution, oldest first.
    fn history(&self, execution_id: &str) -> Result<Vec<HistoryEntry>, StoreError>;

    /// Record a step run. The store assigns the next per-execution sequence.
    fn create_step_execution(&self, step: StepExecution) -> Result<StepExecution, StoreError>;

    /// Settle a step run with its final status and outputs.
    fn update_step_execution(
        &self,
        execution_id: &str,
        sequence: u64,
        update: StepExecutionUpdate,
    ) -> Result<StepExecution, StoreError>;

    /// Step runs for an execution, oldest first.
    fn step_executions(&self, execution_id: &str) -> Result<Vec<StepExecution>, StoreError>;

    fn create_pending_decision(&self, decision: PendingDecision) -> Result<PendingDecision, StoreError>;

    fn get_pending_decision(&self, decision_id: &str) -> Result<Option<PendingDecision>, StoreError>;

    /// Apply a partial update. Honors [`DecisionUpdate::expect_status`] atomically.
    fn update_pending_decision(&self, decision_id: &str, update: DecisionUpdate) -> Result<PendingDecision, StoreError>;

    /// Decisions raised by one execution, oldest first.
    fn decisions_for_execution(&self, execution_id: &str) -> Result<Vec<PendingDecision>, StoreError>;

    /// Every decision still awaiting a choice, across executions.
    fn open_decisions(&self) -> Result<Vec<PendingDecision>, StoreError>;
}
