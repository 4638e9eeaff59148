use std::sync::Mutex;

use cadence_types::{
    DecisionUpdate, ExecutionFilter, ExecutionRecord, ExecutionUpdate, HistoryEntry, HistoryEventKind, PendingDecision, StepExecution,
    StepExecutionUpdate,
};
use serde_json::Value;

use crate::state::StoreState;
use crate::{StoreError, WorkflowStore};

/// In-memory store used by tests and short-lived embeddings.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkflowStore for InMemoryStore {
    fn create_execution(&self, record: ExecutionRecord) -> Result<ExecutionRecord, StoreError> {
        self.state.lock().expect("store lock poisoned").create_execution(record)
    }

    fn get_execution(&self, execution_id: &str) -> Result<Option<ExecutionRecord>, StoreError> {
        Ok(self.state.lock().expect("store lock poisoned").get_execution(execution_id))
    }

    fn list_executions(&self, filter: &ExecutionFilter) -> Result<Vec<ExecutionRecord>, StoreError> {
        Ok(self.state.lock().expect("store lock poisoned").list_executions(filter))
    }

    fn update_execution(&self, execution_id: &str, update: ExecutionUpdate) -> Result<ExecutionRecord, StoreError> {
        self.state.lock().expect("store lock poisoned").update_execution(execution_id, update)
    }

    fn add_history(
        &self,
        execution_id: &str,
        event: HistoryEventKind,
        step_id: Option<&str>,
        metadata: Value,
    ) -> Result<HistoryEntry, StoreError> {
        self.state
            .lock()
            .expect("store lock poisoned")
            .add_history(execution_id, event, step_id, metadata)
    }

    fn history(&self, execution_id: &str) -> Result<Vec<HistoryEntry>, StoreError> {
        Ok(self.state.lock().expect("store lock poisoned").history(execution_id))
    }

    fn create_step_execution(&self, step: StepExecution) -> Result<StepExecution, StoreError> {
        self.state.lock().expect("store lock poisoned").create_step_execution(step)
    }

    fn update_step_execution(
        &self,
        execution_id: &str,
        sequence: u64,
        update: StepExecutionUpdate,
    ) -> Result<StepExecution, StoreError> {
        self.state
            .lock()
            .expect("store lock poisoned")
            .update_step_execution(execution_id, sequence, update)
    }

    fn step_executions(&self, execution_id: &str) -> Result<Vec<StepExecution>, StoreError> {
        Ok(self.state.lock().expect("store lock poisoned").step_executions(execution_id))
    }

    fn create_pending_decision(&self, decision: PendingDecision) -> Result<PendingDecision, StoreError> {
        self.state.lock().expect("store lock poisoned").create_pending_decision(decision)
    }

    fn get_pending_decision(&self, decision_id: &str) -> Result<Option<PendingDecision>, StoreError> {
        Ok(self.state.lock().expect("store lock poisoned").get_pending_decision(decision_id))
    }

    fn update_pending_decision(&self, decision_id: &str, update: DecisionUpdate) -> Result<PendingDecision, StoreError> {
        self.state
            .lock()
            .expect("store lock poisoned")
            .update_pending_decision(decision_id, update)
    }

    fn decisions_for_execution(&self, execution_id: &str) -> Result<Vec<PendingDecision>, StoreError> {
        Ok(self.state.lock().expect("store lock poisoned").decisions_for_execution(execution_id))
    }

    fn open_decisions(&self) -> Result<Vec<PendingDecision>, StoreError> {
        Ok(self.state.lock().expect("store lock poisoned").open_decisions())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_types::{DecisionStatus, ExecutionMode, ExecutionState, ExecutionStatus, StepExecutionStatus};
    use chrono::Utc;
    use serde_json::json;

    fn execution(id: &str, workflow_id: &str) -> ExecutionRecord {
        ExecutionRecord::new(id, workflow_id, ExecutionMode::Auto, ExecutionState::default())
    }

    fn decision(id: &str, execution_id: &str) -> PendingDecision {
        PendingDecision {
            id: id.into(),
            execution_id: execution_id.into(),
            step_id: "review".into(),
            title: "Approve?".into(),
            description: None,
            proposals: Vec::new(),
            status: DecisionStatus::Pending,
            choice: None,
            notes: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    #[test]
    fn duplicate_execution_ids_are_rejected() {
        let store = InMemoryStore::new();
        store.create_execution(execution("e1", "wf")).unwrap();
        let error = store.create_execution(execution("e1", "wf")).unwrap_err();
        assert!(matches!(error, StoreError::DuplicateKey { kind: "execution", .. }));
    }

    #[test]
    fn history_sequence_is_monotonic_per_execution() {
        let store = InMemoryStore::new();
        store.create_execution(execution("e1", "wf")).unwrap();
        store.create_execution(execution("e2", "wf")).unwrap();

        store.add_history("e1", HistoryEventKind::WorkflowStarted, None, json!({})).unwrap();
        store.add_history("e2", HistoryEventKind::WorkflowStarted, None, json!({})).unwrap();
        let last = store
            .add_history("e1", HistoryEventKind::StepStarted, Some("build"), json!({}))
            .unwrap();

        assert_eq!(last.sequence, 2);
        let history = store.history("e1").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].step_id.as_deref(), Some("build"));
        assert_eq!(store.history("e2").unwrap().len(), 1);
    }

    #[test]
    fn history_requires_existing_execution() {
        let store = InMemoryStore::new();
        let error = store
            .add_history("missing", HistoryEventKind::WorkflowStarted, None, json!({}))
            .unwrap_err();
        assert!(matches!(error, StoreError::ExecutionNotFound(_)));
    }

    #[test]
    fn list_executions_filters_newest_first() {
        let store = InMemoryStore::new();
        store.create_execution(execution("e1", "alpha")).unwrap();
        store.create_execution(execution("e2", "beta")).unwrap();
        store.create_execution(execution("e3", "alpha")).unwrap();
        store
            .update_execution("e3", ExecutionUpdate::status(ExecutionStatus::Completed))
            .unwrap();

        let alpha = store
            .list_executions(&ExecutionFilter {
                workflow_id: Some("alpha".into()),
                ..Default::default()
            })
            .unwrap();
        let ids: Vec<_> = alpha.iter().map(|record| record.id.as_str()).collect();
        assert_eq!(ids, vec!["e3", "e1"]);

        let completed = store
            .list_executions(&ExecutionFilter {
                status: Some(ExecutionStatus::Completed),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(completed.len(), 1);
        assert!(completed[0].completed_at.is_some());

        let limited = store
            .list_executions(&ExecutionFilter {
                limit: 1,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn conditional_decision_update_keeps_first_writer() {
        let store = InMemoryStore::new();
        store.create_pending_decision(decision("d1", "e1")).unwrap();

        store
            .update_pending_decision("d1", DecisionUpdate::resolve("approve", None))
            .unwrap();
        let error = store
            .update_pending_decision("d1", DecisionUpdate::resolve("reject", None))
            .unwrap_err();
        assert!(matches!(
            error,
            StoreError::Conflict {
                actual: DecisionStatus::Resolved,
                ..
            }
        ));

        let stored = store.get_pending_decision("d1").unwrap().unwrap();
        assert_eq!(stored.choice.as_deref(), Some("approve"));
        assert!(store.open_decisions().unwrap().is_empty());
    }

    #[test]
    fn step_executions_keep_every_run() {
        let store = InMemoryStore::new();
        store.create_execution(execution("e1", "wf")).unwrap();

        for iteration in 1..=2 {
            let run = store
                .create_step_execution(StepExecution::started("e1", "fix", "claude", "run-prompt", json!({"round": iteration}), Some(iteration)))
                .unwrap();
            assert_eq!(run.sequence, u64::from(iteration));
            store
                .update_step_execution(
                    "e1",
                    run.sequence,
                    StepExecutionUpdate::status(StepExecutionStatus::Completed).with_outputs(json!({"ok": true})),
                )
                .unwrap();
        }

        let runs = store.step_executions("e1").unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].inputs["round"], 1);
        assert_eq!(runs[1].inputs["round"], 2);
        assert!(runs.iter().all(|run| run.return_code == Some(0)));

        let error = store
            .update_step_execution("e1", 9, StepExecutionUpdate::status(StepExecutionStatus::Failed))
            .unwrap_err();
        assert!(matches!(error, StoreError::StepExecutionNotFound { sequence: 9, .. }));
        assert!(matches!(
            store.create_step_execution(StepExecution::started("ghost", "s", "m", "a", json!({}), None)),
            Err(StoreError::ExecutionNotFound(_))
        ));
    }

    #[test]
    fn updating_unknown_decision_reports_not_found() {
        let store = InMemoryStore::new();
        let error = store
            .update_pending_decision("nope", DecisionUpdate::resolve("x", None))
            .unwrap_err();
        assert!(matches!(error, StoreError::DecisionNotFound(id) if id == "nope"));
    }
}
