//! Collections shared by every backend.

use std::collections::BTreeMap;

use cadence_types::{
    DecisionStatus, DecisionUpdate, ExecutionFilter, ExecutionRecord, ExecutionUpdate, HistoryEntry, HistoryEventKind, PendingDecision,
    StepExecution, StepExecutionUpdate,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::StoreError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StoreState {
    #[serde(default)]
    executions: Vec<ExecutionRecord>,
    #[serde(default)]
    history: BTreeMap<String, Vec<HistoryEntry>>,
    #[serde(default)]
    step_executions: BTreeMap<String, Vec<StepExecution>>,
    #[serde(default)]
    decisions: Vec<PendingDecision>,
}

impl StoreState {
    pub(crate) fn create_execution(&mut self, record: ExecutionRecord) -> Result<ExecutionRecord, StoreError> {
        if self.executions.iter().any(|existing| existing.id == record.id) {
            return Err(StoreError::DuplicateKey {
                kind: "execution",
                id: record.id,
            });
        }
        self.executions.push(record.clone());
        Ok(record)
    }

    pub(crate) fn get_execution(&self, execution_id: &str) -> Option<ExecutionRecord> {
        self.executions.iter().find(|record| record.id == execution_id).cloned()
    }

    pub(crate) fn list_executions(&self, filter: &ExecutionFilter) -> Vec<ExecutionRecord> {
        let matches = self
            .executions
            .iter()
            .rev()
            .filter(|record| filter.workflow_id.as_deref().is_none_or(|workflow_id| record.workflow_id == workflow_id))
            .filter(|record| filter.status.is_none_or(|status| record.status == status))
            .cloned();
        if filter.limit == 0 {
            matches.collect()
        } else {
            matches.take(filter.limit).collect()
        }
    }

    pub(crate) fn update_execution(&mut self, execution_id: &str, update: ExecutionUpdate) -> Result<ExecutionRecord, StoreError> {
        let record = self
            .executions
            .iter_mut()
            .find(|record| record.id == execution_id)
            .ok_or_else(|| StoreError::ExecutionNotFound(execution_id.to_string()))?;
        record.apply(update);
        Ok(record.clone())
    }

    pub(crate) fn add_history(
        &mut self,
        execution_id: &str,
        event: HistoryEventKind,
        step_id: Option<&str>,
        metadata: Value,
    ) -> Result<HistoryEntry, StoreError> {
        if !self.executions.iter().any(|record| record.id == execution_id) {
            return Err(StoreError::ExecutionNotFound(execution_id.to_string()));
        }
        let log = self.history.entry(execution_id.to_string()).or_default();
        let sequence = log.last().map(|entry| entry.sequence + 1).unwrap_or(1);
        let entry = HistoryEntry {
            sequence,
            execution_id: execution_id.to_string(),
            event,
            step_id: step_id.map(str::to_string),
            timestamp: Utc::now(),
            metadata,
        };
        log.push(entry.clone());
        Ok(entry)
    }

    pub(crate) fn history(&self, execution_id: &str) -> Vec<HistoryEntry> {
        self.history.get(execution_id).cloned().unwrap_or_default()
    }

    pub(crate) fn create_step_execution(&mut self, mut step: StepExecution) -> Result<StepExecution, StoreError> {
        if !self.executions.iter().any(|record| record.id == step.execution_id) {
            return Err(StoreError::ExecutionNotFound(step.execution_id));
        }
        let runs = self.step_executions.entry(step.execution_id.clone()).or_default();
        step.sequence = runs.last().map(|run| run.sequence + 1).unwrap_or(1);
        runs.push(step.clone());
        Ok(step)
    }

    pub(crate) fn update_step_execution(
        &mut self,
        execution_id: &str,
        sequence: u64,
        update: StepExecutionUpdate,
    ) -> Result<StepExecution, StoreError> {
        let run = self
            .step_executions
            .get_mut(execution_id)
            .and_then(|runs| runs.iter_mut().find(|run| run.sequence == sequence))
            .ok_or_else(|| StoreError::StepExecutionNotFound {
                execution_id: execution_id.to_string(),
                sequence,
            })?;
        run.apply(update);
        Ok(run.clone())
    }

    pub(crate) fn step_executions(&self, execution_id: &str) -> Vec<StepExecution> {
        self.step_executions.get(execution_id).cloned().unwrap_or_default()
    }

    pub(crate) fn create_pending_decision(&mut self, decision: PendingDecision) -> Result<PendingDecision, StoreError> {
        if self.decisions.iter().any(|existing| existing.id == decision.id) {
            return Err(StoreError::DuplicateKey {
                kind: "decision",
                id: decision.id,
            });
        }
        self.decisions.push(decision.clone());
        Ok(decision)
    }

    pub(crate) fn get_pending_decision(&self, decision_id: &str) -> Option<PendingDecision> {
        self.decisions.iter().find(|decision| decision.id == decision_id).cloned()
    }

    pub(crate) fn update_pending_decision(&mut self, decision_id: &str, update: DecisionUpdate) -> Result<PendingDecision, StoreError> {
        let decision = self
            .decisions
            .iter_mut()
            .find(|decision| decision.id == decision_id)
            .ok_or_else(|| StoreError::DecisionNotFound(decision_id.to_string()))?;

        if let Some(expected) = update.expect_status
            && decision.status != expected
        {
            return Err(StoreError::Conflict {
                id: decision_id.to_string(),
                expected,
                actual: decision.status,
            });
        }

        if let Some(status) = update.status {
            decision.status = status;
        }
        if let Some(choice) = update.choice {
            decision.choice = Some(choice);
        }
        if let Some(notes) = update.notes {
            decision.notes = Some(notes);
        }
        if let Some(resolved_at) = update.resolved_at {
            decision.resolved_at = Some(resolved_at);
        }
        Ok(decision.clone())
    }

    pub(crate) fn decisions_for_execution(&self, execution_id: &str) -> Vec<PendingDecision> {
        self.decisions
            .iter()
            .filter(|decision| decision.execution_id == execution_id)
            .cloned()
            .collect()
    }

    pub(crate) fn open_decisions(&self) -> Vec<PendingDecision> {
        self.decisions
            .iter()
            .filter(|decision| decision.status == DecisionStatus::Pending)
            .cloned()
            .collect()
    }
}
