//! Workflow runner: the driver that walks a workflow definition.
//!
//! The runner owns the outer control flow that the step executor and subloop
//! controller leave to their caller: following transitions, delegating
//! declared blocks to the subloop controller, parking step-mode executions,
//! resuming after a resolved decision, and writing terminal statuses.
//!
//! Control flow for one execution never interleaves: every entry point takes
//! a per-execution async lock first. Distinct executions run independently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use cadence_store::WorkflowStore;
use cadence_types::{
    ExecutionFilter, ExecutionMode, ExecutionOutcome, ExecutionRecord, ExecutionState, ExecutionStatus, ExecutionUpdate, HistoryEntry,
    HistoryEventKind, PendingDecision, StepDefinition, StepExecution, StepExecutionStatus, StepExecutionUpdate, StepRecord,
    SubloopDefinition, WorkflowContext, WorkflowDefinition, validate_workflow,
};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{error, info};
use uuid::Uuid;

use crate::decision::DecisionCoordinator;
use crate::error::{DecisionError, EngineError};
use crate::executor::{StepExecutor, StepResult, StepStatus, SubloopController, SubloopResult, SubloopStopReason, determine_next_step};
use crate::outcome::{determine_outcome, execution_summary, failure_outcome, follow_up_suggestions};
use crate::registry::ModuleRegistry;

/// Execution record together with its audit trail, step runs, and decisions.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSnapshot {
    pub execution: ExecutionRecord,
    pub history: Vec<HistoryEntry>,
    pub step_executions: Vec<StepExecution>,
    pub decisions: Vec<PendingDecision>,
}

type LockTable = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

/// Held for the duration of one driver call on an execution. Dropping it
/// releases the lock and forgets the table entry once nobody else wants it.
struct ExecutionLease<'a> {
    table: &'a LockTable,
    execution_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ExecutionLease<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let Ok(mut locks) = self.table.lock() else {
            return;
        };
        // Waiters hold a clone of the Arc, so a count of one means the table is the only owner.
        if locks.get(&self.execution_id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.execution_id);
        }
    }
}

/// What the walker does after a step or block settles.
enum Flow {
    Continue(Option<String>),
    Stop(ExecutionRecord),
}

pub struct WorkflowRunner {
    store: Arc<dyn WorkflowStore>,
    executor: StepExecutor,
    subloops: SubloopController,
    decisions: DecisionCoordinator,
    locks: LockTable,
}

impl WorkflowRunner {
    pub fn new(store: Arc<dyn WorkflowStore>, registry: ModuleRegistry) -> Self {
        let executor = StepExecutor::new(Arc::clone(&store), Arc::new(registry));
        let subloops = SubloopController::new(Arc::clone(&store), executor.clone());
        let decisions = DecisionCoordinator::new(Arc::clone(&store));
        Self {
            store,
            executor,
            subloops,
            decisions,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn WorkflowStore> {
        &self.store
    }

    pub fn decisions(&self) -> &DecisionCoordinator {
        &self.decisions
    }

    pub fn registry(&self) -> &ModuleRegistry {
        self.executor.registry()
    }

    /// Create an execution and drive it.
    ///
    /// In [`ExecutionMode::Auto`] the run continues until it completes, fails,
    /// or waits on a decision. In [`ExecutionMode::Step`] exactly one step (or
    /// one whole subloop) runs before the execution is parked as `paused`.
    pub async fn start(&self, workflow: &WorkflowDefinition, trigger: Value, mode: ExecutionMode) -> Result<ExecutionRecord, EngineError> {
        validate_workflow(workflow).map_err(EngineError::InvalidWorkflow)?;

        let execution_id = Uuid::new_v4().simple().to_string();
        let workflow_id = workflow.identifier().to_string();
        let state = ExecutionState::new(
            trigger,
            WorkflowContext {
                execution_id: execution_id.clone(),
                workflow_id: workflow_id.clone(),
                version_tag: Some(workflow.version.clone()),
            },
        );
        let first_step = workflow.first_step().map(|step| step.id.clone());
        let mut record = ExecutionRecord::new(&execution_id, &workflow_id, mode, state.clone());
        record.current_step = first_step.clone();
        self.store.create_execution(record)?;
        self.store.add_history(
            &execution_id,
            HistoryEventKind::WorkflowStarted,
            None,
            json!({
                "workflowId": workflow_id,
                "version": workflow.version,
                "mode": mode,
            }),
        )?;
        info!(execution_id = %execution_id, workflow_id = %workflow_id, ?mode, "workflow started");

        let _lease = self.lease(&execution_id).await;
        self.drive(&execution_id, workflow, state, first_step, mode).await
    }

    /// Advance a paused step-mode execution by one step.
    pub async fn execute_next_step(&self, execution_id: &str, workflow: &WorkflowDefinition) -> Result<ExecutionRecord, EngineError> {
        let _lease = self.lease(execution_id).await;

        let record = self.load(execution_id)?;
        ensure_workflow(&record, workflow)?;
        ensure_status(&record, ExecutionStatus::Paused, "execute_next_step")?;

        let Some(next_step) = record.current_step.clone() else {
            return self.complete(execution_id, workflow, &record.state);
        };
        self.store
            .update_execution(execution_id, ExecutionUpdate::status(ExecutionStatus::Running))?;
        self.drive(execution_id, workflow, record.state, Some(next_step), ExecutionMode::Step)
            .await
    }

    /// Continue a waiting execution whose decision has been resolved.
    ///
    /// The waiting step is recorded as successful with outputs
    /// `{decision, decisionId, notes}`; the run then continues from that step's
    /// transition, or inside the subloop when it paused mid-block.
    pub async fn resume(&self, execution_id: &str, workflow: &WorkflowDefinition) -> Result<ExecutionRecord, EngineError> {
        let _lease = self.lease(execution_id).await;

        let record = self.load(execution_id)?;
        ensure_workflow(&record, workflow)?;
        ensure_status(&record, ExecutionStatus::Waiting, "resume")?;

        let missing_decision = |step_id: &str| EngineError::MissingDecision {
            execution_id: execution_id.to_string(),
            step_id: step_id.to_string(),
        };
        let step_id = record.current_step.clone().ok_or_else(|| missing_decision("<none>"))?;
        let mut state = record.state;
        let (decision_id, iteration) = state
            .steps
            .get(&step_id)
            .and_then(|step_record| step_record.decision_id.clone().map(|id| (id, step_record.iteration)))
            .ok_or_else(|| missing_decision(&step_id))?;
        let decision = self
            .decisions
            .get_decision(&decision_id)?
            .ok_or_else(|| DecisionError::NotFound(decision_id.clone()))?;
        if decision.is_pending() {
            return Err(EngineError::DecisionPending { decision_id });
        }

        let outputs = json!({
            "decision": decision.choice,
            "decisionId": decision.id,
            "notes": decision.notes,
        });
        let mut settled = StepRecord::success(outputs.clone());
        settled.iteration = iteration;
        state.record_step(&step_id, settled);
        let waiting_run = self
            .store
            .step_executions(execution_id)?
            .into_iter()
            .rev()
            .find(|run| run.step_id == step_id && run.status == StepExecutionStatus::Pending);
        if let Some(run) = waiting_run {
            self.store.update_step_execution(
                execution_id,
                run.sequence,
                StepExecutionUpdate::status(StepExecutionStatus::Completed).with_outputs(outputs.clone()),
            )?;
        }
        self.store.update_execution(
            execution_id,
            ExecutionUpdate::status(ExecutionStatus::Running).with_state(&state),
        )?;
        self.store.add_history(
            execution_id,
            HistoryEventKind::WorkflowResumed,
            Some(&step_id),
            json!({
                "decisionId": decision.id,
                "choice": decision.choice,
            }),
        )?;
        info!(execution_id, step_id = %step_id, decision_id = %decision.id, "workflow resumed");

        let next = match state.subloop.clone() {
            Some(cursor) => {
                let subloop = workflow
                    .subloop_by_label(&cursor.subloop)
                    .ok_or_else(|| EngineError::UnknownSubloop {
                        workflow: workflow.identifier().to_string(),
                        label: cursor.subloop.clone(),
                    })?;
                let steps = subloop_steps(workflow, subloop)?;
                let result = self
                    .subloops
                    .resume_subloop(execution_id, workflow, &mut state, subloop, &steps, cursor)
                    .await?;
                match self.after_subloop(execution_id, workflow, &state, &steps, result)? {
                    Flow::Stop(record) => return Ok(record),
                    Flow::Continue(next) => next,
                }
            }
            None => {
                let step = lookup_step(workflow, &step_id)?;
                determine_next_step(step, StepStatus::Succeeded, &outputs, &state)
            }
        };

        if record.mode == ExecutionMode::Step {
            return self.settle_step_mode(execution_id, workflow, &state, next);
        }
        self.drive(execution_id, workflow, state, next, record.mode).await
    }

    /// Execution record, history, step runs, and decisions for `execution_id`.
    pub fn status(&self, execution_id: &str) -> Result<ExecutionSnapshot, EngineError> {
        let execution = self.load(execution_id)?;
        let history = self.store.history(execution_id)?;
        let step_executions = self.store.step_executions(execution_id)?;
        let decisions = self.decisions.decisions_for_execution(execution_id)?;
        Ok(ExecutionSnapshot {
            execution,
            history,
            step_executions,
            decisions,
        })
    }

    pub fn list_executions(&self, filter: &ExecutionFilter) -> Result<Vec<ExecutionRecord>, EngineError> {
        Ok(self.store.list_executions(filter)?)
    }

    async fn drive(
        &self,
        execution_id: &str,
        workflow: &WorkflowDefinition,
        mut state: ExecutionState,
        mut next: Option<String>,
        mode: ExecutionMode,
    ) -> Result<ExecutionRecord, EngineError> {
        loop {
            let Some(step_id) = next.take() else {
                return self.complete(execution_id, workflow, &state);
            };

            let flow = match workflow.subloop_starting_at(&step_id) {
                Some(subloop) => {
                    let steps = subloop_steps(workflow, subloop)?;
                    let result = self
                        .subloops
                        .execute_subloop(execution_id, workflow, &mut state, subloop, &steps)
                        .await?;
                    self.after_subloop(execution_id, workflow, &state, &steps, result)?
                }
                None => {
                    let step = lookup_step(workflow, &step_id)?;
                    let result = self.executor.execute_step(execution_id, step, &mut state, workflow, None).await?;
                    self.after_step(execution_id, workflow, &state, result)?
                }
            };

            match flow {
                Flow::Stop(record) => return Ok(record),
                Flow::Continue(following) => next = following,
            }

            if mode == ExecutionMode::Step {
                return self.settle_step_mode(execution_id, workflow, &state, next);
            }
        }
    }

    fn after_step(
        &self,
        execution_id: &str,
        workflow: &WorkflowDefinition,
        state: &ExecutionState,
        result: StepResult,
    ) -> Result<Flow, EngineError> {
        match result.status {
            StepStatus::Succeeded => Ok(Flow::Continue(result.next_step)),
            StepStatus::Failed => match result.next_step {
                Some(handler) => {
                    info!(execution_id, step_id = %result.step_id, on_failure = %handler, "following failure transition");
                    Ok(Flow::Continue(Some(handler)))
                }
                None => {
                    let message = result.error.unwrap_or_else(|| format!("step '{}' failed", result.step_id));
                    Ok(Flow::Stop(self.fail(execution_id, workflow, state, &result.step_id, &message)?))
                }
            },
            StepStatus::Pending => {
                let decision_id = result.decision_id.unwrap_or_default();
                Ok(Flow::Stop(self.wait(execution_id, state, &result.step_id, &decision_id, None)?))
            }
        }
    }

    fn after_subloop(
        &self,
        execution_id: &str,
        workflow: &WorkflowDefinition,
        state: &ExecutionState,
        steps: &[&StepDefinition],
        result: SubloopResult,
    ) -> Result<Flow, EngineError> {
        match result {
            SubloopResult::Paused {
                iteration,
                step_id,
                decision_id,
                ..
            } => Ok(Flow::Stop(self.wait(execution_id, state, &step_id, &decision_id, Some(iteration))?)),
            SubloopResult::Completed {
                stop_reason: SubloopStopReason::StepFailed { step_id },
                ..
            } => {
                let step = lookup_step(workflow, &step_id)?;
                if let Some(handler) = &step.on_failure {
                    info!(execution_id, step_id = %step_id, on_failure = %handler, "following failure transition out of subloop");
                    return Ok(Flow::Continue(Some(handler.clone())));
                }
                let message = state
                    .steps
                    .get(&step_id)
                    .and_then(|record| record.error.clone())
                    .unwrap_or_else(|| format!("step '{step_id}' failed"));
                Ok(Flow::Stop(self.fail(execution_id, workflow, state, &step_id, &message)?))
            }
            SubloopResult::Completed { .. } => {
                let Some(last_step) = steps.last() else {
                    return Ok(Flow::Continue(None));
                };
                let outputs = state
                    .steps
                    .get(&last_step.id)
                    .map(|record| record.outputs.clone())
                    .unwrap_or_else(|| json!({}));
                Ok(Flow::Continue(determine_next_step(last_step, StepStatus::Succeeded, &outputs, state)))
            }
        }
    }

    fn settle_step_mode(
        &self,
        execution_id: &str,
        workflow: &WorkflowDefinition,
        state: &ExecutionState,
        next: Option<String>,
    ) -> Result<ExecutionRecord, EngineError> {
        match next {
            Some(next_step) => {
                let record = self.store.update_execution(
                    execution_id,
                    ExecutionUpdate::status(ExecutionStatus::Paused)
                        .with_current_step(Some(&next_step))
                        .with_state(state),
                )?;
                info!(execution_id, next_step = %next_step, "execution paused between steps");
                Ok(record)
            }
            None => self.complete(execution_id, workflow, state),
        }
    }

    fn wait(
        &self,
        execution_id: &str,
        state: &ExecutionState,
        step_id: &str,
        decision_id: &str,
        iteration: Option<u32>,
    ) -> Result<ExecutionRecord, EngineError> {
        let record = self.store.update_execution(
            execution_id,
            ExecutionUpdate::status(ExecutionStatus::Waiting)
                .with_current_step(Some(step_id))
                .with_state(state),
        )?;
        self.store.add_history(
            execution_id,
            HistoryEventKind::WorkflowWaiting,
            Some(step_id),
            json!({
                "decisionId": decision_id,
                "iteration": iteration,
            }),
        )?;
        info!(execution_id, step_id, decision_id, "workflow waiting for decision");
        Ok(record)
    }

    fn complete(&self, execution_id: &str, workflow: &WorkflowDefinition, state: &ExecutionState) -> Result<ExecutionRecord, EngineError> {
        let record = self.store.update_execution(
            execution_id,
            ExecutionUpdate::status(ExecutionStatus::Completed)
                .with_current_step(None)
                .with_state(state),
        )?;
        let outcome = determine_outcome(state);
        let record = self.record_outcome(record, workflow, outcome)?;
        self.store.add_history(
            execution_id,
            HistoryEventKind::WorkflowCompleted,
            None,
            json!({
                "stepsRecorded": state.steps.len(),
                "outcome": outcome,
                "followUps": record.follow_up_suggestions.len(),
            }),
        )?;
        info!(execution_id, %outcome, "workflow completed");
        Ok(record)
    }

    fn fail(
        &self,
        execution_id: &str,
        workflow: &WorkflowDefinition,
        state: &ExecutionState,
        step_id: &str,
        message: &str,
    ) -> Result<ExecutionRecord, EngineError> {
        let record = self.store.update_execution(
            execution_id,
            ExecutionUpdate::status(ExecutionStatus::Failed)
                .with_state(state)
                .with_error(message),
        )?;
        let outcome = failure_outcome(state);
        let record = self.record_outcome(record, workflow, outcome)?;
        self.store.add_history(
            execution_id,
            HistoryEventKind::WorkflowFailed,
            Some(step_id),
            json!({ "error": message, "outcome": outcome }),
        )?;
        error!(execution_id, step_id, error = %message, %outcome, "workflow failed");
        Ok(record)
    }

    /// Attach outcome, follow-up suggestions, and the summary to a record
    /// that just reached a terminal status.
    fn record_outcome(
        &self,
        record: ExecutionRecord,
        workflow: &WorkflowDefinition,
        outcome: ExecutionOutcome,
    ) -> Result<ExecutionRecord, EngineError> {
        let suggestions = follow_up_suggestions(outcome, workflow);
        let step_runs = self.store.step_executions(&record.id)?;
        let summary = execution_summary(&record, workflow, outcome, &suggestions, &step_runs);
        Ok(self
            .store
            .update_execution(&record.id, ExecutionUpdate::default().with_outcome(outcome, suggestions, summary))?)
    }

    fn load(&self, execution_id: &str) -> Result<ExecutionRecord, EngineError> {
        self.store
            .get_execution(execution_id)?
            .ok_or_else(|| EngineError::ExecutionNotFound(execution_id.to_string()))
    }

    async fn lease(&self, execution_id: &str) -> ExecutionLease<'_> {
        let lock = {
            let mut locks = self.locks.lock().expect("execution lock table poisoned");
            Arc::clone(locks.entry(execution_id.to_string()).or_default())
        };
        let guard = lock.lock_owned().await;
        ExecutionLease {
            table: &self.locks,
            execution_id: execution_id.to_string(),
            guard: Some(guard),
        }
    }
}

fn ensure_workflow(record: &ExecutionRecord, workflow: &WorkflowDefinition) -> Result<(), EngineError> {
    if record.workflow_id == workflow.identifier() {
        return Ok(());
    }
    Err(EngineError::WorkflowMismatch {
        execution_id: record.id.clone(),
        expected: record.workflow_id.clone(),
        actual: workflow.identifier().to_string(),
    })
}

fn ensure_status(record: &ExecutionRecord, expected: ExecutionStatus, operation: &'static str) -> Result<(), EngineError> {
    if record.status == expected {
        return Ok(());
    }
    Err(EngineError::InvalidState {
        execution_id: record.id.clone(),
        status: record.status,
        operation,
        expected,
    })
}

fn lookup_step<'a>(workflow: &'a WorkflowDefinition, step_id: &str) -> Result<&'a StepDefinition, EngineError> {
    workflow.step(step_id).ok_or_else(|| EngineError::UnknownStep {
        workflow: workflow.identifier().to_string(),
        step_id: step_id.to_string(),
    })
}

fn subloop_steps<'a>(workflow: &'a WorkflowDefinition, subloop: &SubloopDefinition) -> Result<Vec<&'a StepDefinition>, EngineError> {
    workflow.subloop_steps(subloop).ok_or_else(|| EngineError::UnknownSubloop {
        workflow: workflow.identifier().to_string(),
        label: subloop.label(),
    })
}
