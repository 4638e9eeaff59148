//! Single-step execution.

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use cadence_store::WorkflowStore;
use cadence_types::{
    ExecutionState, ExecutionUpdate, HistoryEventKind, StepDefinition, StepExecution, StepExecutionStatus, StepExecutionUpdate, StepRecord,
    StepRecordStatus, Transition, WorkflowDefinition,
};
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::condition::evaluate_condition;
use crate::decision::DecisionCoordinator;
use crate::error::{EngineError, StepError};
use crate::registry::{ActionHandler, ModuleRegistry};
use crate::resolve::resolve_inputs;

use super::{ActionContext, StepLogger, StepOutcome, StepResult, StepStatus};

/// Runs one workflow step against the module registry and records the outcome.
#[derive(Clone)]
pub struct StepExecutor {
    store: Arc<dyn WorkflowStore>,
    registry: Arc<ModuleRegistry>,
    decisions: DecisionCoordinator,
}

impl StepExecutor {
    pub fn new(store: Arc<dyn WorkflowStore>, registry: Arc<ModuleRegistry>) -> Self {
        let decisions = DecisionCoordinator::new(Arc::clone(&store));
        Self {
            store,
            registry,
            decisions,
        }
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Execute `step` and record its outcome into `state` and the store.
    ///
    /// Resolution, lookup, and action failures (a panicking handler included)
    /// are captured in the returned [`StepResult`]; only store failures
    /// surface as errors. Every call also leaves one [`StepExecution`] row
    /// holding the resolved inputs and the settled status. `iteration` tags
    /// the recorded entry when the step runs inside a subloop.
    pub async fn execute_step(
        &self,
        execution_id: &str,
        step: &StepDefinition,
        state: &mut ExecutionState,
        workflow: &WorkflowDefinition,
        iteration: Option<u32>,
    ) -> Result<StepResult, EngineError> {
        self.store
            .update_execution(execution_id, ExecutionUpdate::position(Some(&step.id), state))?;
        self.store.add_history(
            execution_id,
            HistoryEventKind::StepStarted,
            Some(&step.id),
            json!({
                "module": step.module,
                "action": step.action,
                "iteration": iteration,
                "subloop": iteration.is_some(),
            }),
        )?;
        info!(
            execution_id,
            workflow_id = %workflow.identifier(),
            step_id = %step.id,
            module = %step.module,
            action = %step.action,
            ?iteration,
            "step started"
        );

        let started = Instant::now();
        let prepared = self.prepare(step, state);
        let resolved_inputs = match &prepared {
            Ok((_, inputs)) => Value::Object(inputs.clone()),
            Err(_) => Value::Null,
        };
        let run = self.store.create_step_execution(StepExecution::started(
            execution_id,
            &step.id,
            &step.module,
            &step.action,
            resolved_inputs,
            iteration,
        ))?;

        let (outcome, failure) = match prepared {
            Ok((handler, inputs)) => {
                let context = ActionContext {
                    execution_id: execution_id.to_string(),
                    step_id: step.id.clone(),
                    iteration,
                    state: state.clone(),
                    store: Arc::clone(&self.store),
                    decisions: self.decisions.clone(),
                    logger: StepLogger::new(execution_id, &step.id),
                };
                match invoke_handler(step, handler, inputs, context).await {
                    Ok(outcome) => {
                        let failure = match &outcome {
                            StepOutcome::Failure { error, .. } => Some(StepError::Action {
                                module: step.module.clone(),
                                action: step.action.clone(),
                                message: error.clone(),
                            }),
                            _ => None,
                        };
                        (outcome, failure)
                    }
                    Err(error) => (StepOutcome::failure(error.to_string()), Some(error)),
                }
            }
            Err(error) => (StepOutcome::failure(error.to_string()), Some(error)),
        };
        let error_kind = failure.as_ref().map(|error| error.kind().to_string());
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let mut result = StepResult {
            step_id: step.id.clone(),
            status: StepStatus::Succeeded,
            outputs: Value::Object(Map::new()),
            error: None,
            error_kind,
            decision_id: None,
            duration_ms,
            next_step: None,
        };
        let mut record = StepRecord::success(Value::Object(Map::new()));
        record.iteration = iteration;
        record.duration_ms = duration_ms;

        match outcome {
            StepOutcome::Success { outputs } => {
                result.outputs = normalize_outputs(outputs);
                record.outputs = result.outputs.clone();
                state.record_step(&step.id, record);
                result.next_step = determine_next_step(step, StepStatus::Succeeded, &result.outputs, state);
                self.store.add_history(
                    execution_id,
                    HistoryEventKind::StepCompleted,
                    Some(&step.id),
                    json!({
                        "outputs": result.outputs,
                        "durationMs": duration_ms,
                        "iteration": iteration,
                        "nextStep": result.next_step,
                    }),
                )?;
                info!(execution_id, step_id = %step.id, duration_ms, next_step = ?result.next_step, "step completed");
            }
            StepOutcome::Failure { error, outputs } => {
                result.status = StepStatus::Failed;
                result.outputs = normalize_outputs(outputs);
                result.error = Some(error.clone());
                record.status = StepRecordStatus::Failure;
                record.outputs = result.outputs.clone();
                record.error = Some(error.clone());
                state.record_step(&step.id, record);
                result.next_step = determine_next_step(step, StepStatus::Failed, &result.outputs, state);
                self.store.add_history(
                    execution_id,
                    HistoryEventKind::StepFailed,
                    Some(&step.id),
                    json!({
                        "error": error,
                        "errorKind": result.error_kind,
                        "durationMs": duration_ms,
                        "iteration": iteration,
                        "nextStep": result.next_step,
                    }),
                )?;
                warn!(execution_id, step_id = %step.id, %error, error_kind = ?result.error_kind, "step failed");
            }
            StepOutcome::Pending { decision_id, outputs } => {
                result.status = StepStatus::Pending;
                result.outputs = normalize_outputs(outputs);
                result.decision_id = Some(decision_id.clone());
                record.status = StepRecordStatus::Pending;
                record.outputs = result.outputs.clone();
                record.decision_id = Some(decision_id.clone());
                state.record_step(&step.id, record);
                self.store.add_history(
                    execution_id,
                    HistoryEventKind::StepPending,
                    Some(&step.id),
                    json!({
                        "decisionId": decision_id,
                        "durationMs": duration_ms,
                        "iteration": iteration,
                    }),
                )?;
                info!(execution_id, step_id = %step.id, %decision_id, "step awaiting decision");
            }
        }

        let mut settled = StepExecutionUpdate::status(match result.status {
            StepStatus::Succeeded => StepExecutionStatus::Completed,
            StepStatus::Failed => StepExecutionStatus::Failed,
            StepStatus::Pending => StepExecutionStatus::Pending,
        })
        .with_outputs(result.outputs.clone())
        .with_duration(duration_ms);
        if let Some(error) = &result.error {
            settled = settled.with_error(error.clone());
        }
        self.store.update_step_execution(execution_id, run.sequence, settled)?;

        self.store
            .update_execution(execution_id, ExecutionUpdate::position(Some(&step.id), state))?;
        Ok(result)
    }

    fn prepare(
        &self,
        step: &StepDefinition,
        state: &ExecutionState,
    ) -> Result<(Arc<dyn ActionHandler>, Map<String, Value>), StepError> {
        let inputs = resolve_inputs(&step.inputs, state).map_err(|source| StepError::Resolution {
            step_id: step.id.clone(),
            source,
        })?;
        let handler = self.registry.resolve(&step.module, &step.action)?;
        Ok((handler, inputs))
    }
}

/// Run the handler on its own task so a panic becomes an action failure
/// instead of unwinding through the driver.
async fn invoke_handler(
    step: &StepDefinition,
    handler: Arc<dyn ActionHandler>,
    inputs: Map<String, Value>,
    context: ActionContext,
) -> Result<StepOutcome, StepError> {
    let task = tokio::spawn(async move { handler.invoke(inputs, context).await });
    task.await.map_err(|error| {
        let message = if error.is_panic() {
            format!("handler panicked: {}", panic_message(error.into_panic()))
        } else {
            "handler was cancelled".to_string()
        };
        StepError::Action {
            module: step.module.clone(),
            action: step.action.clone(),
            message,
        }
    })
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "non-string panic payload".to_string()
}

/// Pick the step that follows `step` given its status.
///
/// Failures follow `onFailure`. Successes follow `onSuccess`, evaluating a
/// conditional branch against `{status, outputs, steps, trigger, workflow}`.
pub fn determine_next_step(step: &StepDefinition, status: StepStatus, outputs: &Value, state: &ExecutionState) -> Option<String> {
    match status {
        StepStatus::Failed => step.on_failure.clone(),
        StepStatus::Pending => None,
        StepStatus::Succeeded => match step.on_success.as_ref()? {
            Transition::Step(next) => Some(next.clone()),
            Transition::Conditional(branch) => {
                let root = json!({
                    "status": "success",
                    "outputs": outputs,
                    "steps": state.steps_value(),
                    "trigger": state.trigger,
                    "workflow": state.workflow,
                });
                if evaluate_condition(&branch.condition, &root) {
                    branch.then_step.clone()
                } else {
                    branch.else_step.clone()
                }
            }
        },
    }
}

fn normalize_outputs(outputs: Value) -> Value {
    match outputs {
        Value::Null => Value::Object(Map::new()),
        other => other,
    }
}
