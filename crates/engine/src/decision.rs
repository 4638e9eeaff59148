//! Decision Coordinator: the suspend/resume protocol for human input.
//!
//! `request_decision` persists a pending record and returns immediately; it
//! never blocks waiting for an answer. `resolve_decision` flips the record to
//! `resolved` exactly once. Resuming the execution afterwards is the driver's
//! job (see [`crate::runner::WorkflowRunner::resume`]).

use std::sync::Arc;

use cadence_store::{StoreError, WorkflowStore};
use cadence_types::{DecisionProposal, DecisionStatus, DecisionUpdate, HistoryEventKind, PendingDecision};
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::DecisionError;

/// What a step asks the human to decide.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecisionRequest {
    pub title: String,
    pub description: Option<String>,
    pub proposals: Vec<DecisionProposal>,
}

#[derive(Clone)]
pub struct DecisionCoordinator {
    store: Arc<dyn WorkflowStore>,
}

impl DecisionCoordinator {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self { store }
    }

    /// Persist a pending decision and return its id.
    ///
    /// Ids are random v4 UUIDs, so they cannot be guessed from other ids.
    pub fn request_decision(&self, request: DecisionRequest, execution_id: &str, step_id: &str) -> Result<String, DecisionError> {
        let decision_id = Uuid::new_v4().simple().to_string();
        let decision = PendingDecision {
            id: decision_id.clone(),
            execution_id: execution_id.to_string(),
            step_id: step_id.to_string(),
            title: request.title,
            description: request.description,
            proposals: request.proposals,
            status: DecisionStatus::Pending,
            choice: None,
            notes: None,
            created_at: Utc::now(),
            resolved_at: None,
        };
        let proposal_ids: Vec<&str> = decision.proposals.iter().map(|proposal| proposal.id.as_str()).collect();
        let metadata = json!({
            "decisionId": decision_id,
            "title": decision.title,
            "proposals": proposal_ids,
        });

        self.store.create_pending_decision(decision)?;
        self.store
            .add_history(execution_id, HistoryEventKind::DecisionRequested, Some(step_id), metadata)?;
        info!(execution_id, step_id, decision_id = %decision_id, "decision requested");
        Ok(decision_id)
    }

    /// Resolve a pending decision with `choice`.
    ///
    /// The store performs the pending check and the write under one lock, so
    /// of several concurrent attempts exactly one succeeds.
    pub fn resolve_decision(&self, decision_id: &str, choice: &str, notes: Option<String>) -> Result<PendingDecision, DecisionError> {
        if choice.trim().is_empty() {
            return Err(DecisionError::EmptyChoice(decision_id.to_string()));
        }

        let existing = self
            .store
            .get_pending_decision(decision_id)?
            .ok_or_else(|| DecisionError::NotFound(decision_id.to_string()))?;
        if !existing.is_pending() {
            return Err(DecisionError::AlreadyResolved(decision_id.to_string()));
        }

        let resolved = match self
            .store
            .update_pending_decision(decision_id, DecisionUpdate::resolve(choice.trim(), notes))
        {
            Ok(resolved) => resolved,
            Err(StoreError::Conflict { .. }) => return Err(DecisionError::AlreadyResolved(decision_id.to_string())),
            Err(StoreError::DecisionNotFound(id)) => return Err(DecisionError::NotFound(id)),
            Err(other) => return Err(other.into()),
        };

        let metadata = json!({
            "decisionId": resolved.id,
            "choice": resolved.choice,
            "notes": resolved.notes,
        });
        if let Err(error) = self.store.add_history(
            &resolved.execution_id,
            HistoryEventKind::DecisionResolved,
            Some(&resolved.step_id),
            metadata,
        ) {
            warn!(decision_id, %error, "decision resolved but history entry could not be written");
        }
        info!(execution_id = %resolved.execution_id, decision_id, choice = choice.trim(), "decision resolved");
        Ok(resolved)
    }

    pub fn get_decision(&self, decision_id: &str) -> Result<Option<PendingDecision>, DecisionError> {
        Ok(self.store.get_pending_decision(decision_id)?)
    }

    pub fn decisions_for_execution(&self, execution_id: &str) -> Result<Vec<PendingDecision>, DecisionError> {
        Ok(self.store.decisions_for_execution(execution_id)?)
    }

    /// Every decision still awaiting a choice.
    pub fn open_decisions(&self) -> Result<Vec<PendingDecision>, DecisionError> {
        Ok(self.store.open_decisions()?)
    }
}
