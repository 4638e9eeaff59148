//! Shared type definitions for the Cadence workflow engine.
//!
//! The crate is split by concern:
//!
//! - [`workflow`]: immutable workflow definitions as authored in YAML/JSON.
//! - [`execution`]: execution records, accumulated step state, and history entries.
//! - [`decision`]: pending decisions used to suspend a run for human input.
//!
//! Everything here is plain data with `serde` support so that the store, engine,
//! and CLI crates agree on a single wire shape.

pub mod decision;
pub mod execution;
pub mod workflow;

pub use decision::{DecisionProposal, DecisionStatus, DecisionUpdate, PendingDecision};
pub use execution::{
    ExecutionFilter, ExecutionMode, ExecutionOutcome, ExecutionRecord, ExecutionState, ExecutionStatus, ExecutionUpdate, FollowUpSuggestion,
    HistoryEntry, HistoryEventKind, StepExecution, StepExecutionStatus, StepExecutionUpdate, StepRecord, StepRecordStatus, SubloopCursor,
    WorkflowContext,
};
pub use workflow::{
    ConditionalTransition, FollowUpWorkflow, OutcomeMatch, StepDefinition, SubloopDefinition, Transition, WorkflowBundle, WorkflowDefinition,
    validate_workflow,
};
