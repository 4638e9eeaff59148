//! Subloop execution.
//!
//! A subloop repeats a contiguous block of steps. Every iteration runs the
//! whole block in order through the [`StepExecutor`]; after a full iteration
//! the optional continuation condition decides whether to go again. The
//! iteration bound is always enforced, even when the condition never turns
//! false.

use std::sync::Arc;

use cadence_store::WorkflowStore;
use cadence_types::{
    ExecutionState, ExecutionStatus, ExecutionUpdate, HistoryEventKind, StepDefinition, SubloopCursor, SubloopDefinition,
    WorkflowDefinition,
};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::condition::evaluate_condition;
use crate::error::EngineError;

use super::{StepExecutor, StepStatus};

/// Why a subloop stopped iterating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SubloopStopReason {
    /// The continuation condition evaluated to false.
    ConditionFalse,
    /// The safety bound was reached.
    MaxIterations,
    /// A step failed; the loop stopped without finishing the iteration.
    StepFailed {
        #[serde(rename = "stepId")]
        step_id: String,
    },
}

/// Outcome of running (or resuming) a subloop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum SubloopResult {
    Completed {
        /// Number of the last iteration that ran.
        iteration: u32,
        max_iterations_reached: bool,
        stop_reason: SubloopStopReason,
        /// Decisions raised by steps while `breakOnDecision` was off.
        deferred_decisions: Vec<String>,
    },
    Paused {
        iteration: u32,
        step_id: String,
        decision_id: String,
        waiting_for_decision: bool,
    },
}

/// Drives repeated blocks of steps.
#[derive(Clone)]
pub struct SubloopController {
    store: Arc<dyn WorkflowStore>,
    executor: StepExecutor,
}

/// Where to start iterating: fresh, or mid-iteration after a resolved decision.
struct LoopPosition {
    iteration: u32,
    step_index: usize,
    deferred: Vec<String>,
    resuming: bool,
}

impl SubloopController {
    pub fn new(store: Arc<dyn WorkflowStore>, executor: StepExecutor) -> Self {
        Self { store, executor }
    }

    /// Run `steps_to_repeat` from the first iteration.
    pub async fn execute_subloop(
        &self,
        execution_id: &str,
        workflow: &WorkflowDefinition,
        state: &mut ExecutionState,
        subloop: &SubloopDefinition,
        steps_to_repeat: &[&StepDefinition],
    ) -> Result<SubloopResult, EngineError> {
        info!(
            execution_id,
            subloop = %subloop.label(),
            max_iterations = subloop.max_iterations,
            break_on_decision = subloop.break_on_decision,
            "subloop started"
        );
        let position = LoopPosition {
            iteration: 0,
            step_index: 0,
            deferred: Vec::new(),
            resuming: false,
        };
        self.run(execution_id, workflow, state, subloop, steps_to_repeat, position).await
    }

    /// Continue a paused subloop after the step at `cursor.step_index` was
    /// settled by a resolved decision.
    pub async fn resume_subloop(
        &self,
        execution_id: &str,
        workflow: &WorkflowDefinition,
        state: &mut ExecutionState,
        subloop: &SubloopDefinition,
        steps_to_repeat: &[&StepDefinition],
        cursor: SubloopCursor,
    ) -> Result<SubloopResult, EngineError> {
        info!(execution_id, subloop = %cursor.subloop, iteration = cursor.iteration, "subloop resumed");
        let position = LoopPosition {
            iteration: cursor.iteration,
            step_index: cursor.step_index + 1,
            deferred: cursor.deferred_decisions,
            resuming: true,
        };
        self.run(execution_id, workflow, state, subloop, steps_to_repeat, position).await
    }

    async fn run(
        &self,
        execution_id: &str,
        workflow: &WorkflowDefinition,
        state: &mut ExecutionState,
        subloop: &SubloopDefinition,
        steps_to_repeat: &[&StepDefinition],
        position: LoopPosition,
    ) -> Result<SubloopResult, EngineError> {
        let label = subloop.label();
        let max_iterations = subloop.max_iterations;
        let LoopPosition {
            mut iteration,
            mut step_index,
            mut deferred,
            mut resuming,
        } = position;

        if !resuming && max_iterations == 0 {
            return self.finish(execution_id, state, &label, 0, max_iterations, SubloopStopReason::MaxIterations, deferred);
        }

        loop {
            if !resuming {
                iteration += 1;
                step_index = 0;
                self.store.add_history(
                    execution_id,
                    HistoryEventKind::SubloopIterationStart,
                    None,
                    json!({
                        "subloop": label,
                        "iteration": iteration,
                        "maxIterations": max_iterations,
                    }),
                )?;
                info!(execution_id, subloop = %label, iteration, max_iterations, "subloop iteration started");
            }
            resuming = false;

            for (index, step) in steps_to_repeat.iter().enumerate().skip(step_index) {
                let result = self
                    .executor
                    .execute_step(execution_id, step, state, workflow, Some(iteration))
                    .await?;

                match result.status {
                    StepStatus::Succeeded => {}
                    StepStatus::Pending => {
                        let decision_id = result.decision_id.unwrap_or_default();
                        if subloop.break_on_decision {
                            state.subloop = Some(SubloopCursor {
                                subloop: label.clone(),
                                iteration,
                                step_index: index,
                                deferred_decisions: deferred,
                            });
                            self.store.update_execution(
                                execution_id,
                                ExecutionUpdate::status(ExecutionStatus::Waiting)
                                    .with_current_step(Some(&step.id))
                                    .with_state(state),
                            )?;
                            info!(execution_id, subloop = %label, iteration, step_id = %step.id, %decision_id, "subloop paused for decision");
                            return Ok(SubloopResult::Paused {
                                iteration,
                                step_id: step.id.clone(),
                                decision_id,
                                waiting_for_decision: true,
                            });
                        }

                        self.store.add_history(
                            execution_id,
                            HistoryEventKind::DecisionDeferred,
                            Some(&step.id),
                            json!({
                                "subloop": label,
                                "iteration": iteration,
                                "decisionId": decision_id,
                            }),
                        )?;
                        info!(execution_id, subloop = %label, iteration, step_id = %step.id, %decision_id, "decision deferred; continuing");
                        deferred.push(decision_id);
                    }
                    StepStatus::Failed => {
                        self.store.add_history(
                            execution_id,
                            HistoryEventKind::SubloopIterationComplete,
                            None,
                            json!({
                                "subloop": label,
                                "iteration": iteration,
                                "continue": false,
                                "failedStep": step.id,
                            }),
                        )?;
                        warn!(execution_id, subloop = %label, iteration, step_id = %step.id, "subloop stopped by step failure");
                        let reason = SubloopStopReason::StepFailed { step_id: step.id.clone() };
                        return self.finish(execution_id, state, &label, iteration, max_iterations, reason, deferred);
                    }
                }
            }

            let condition_met = subloop
                .condition
                .as_deref()
                .map(|condition| evaluate_condition(condition, &condition_root(state)))
                .unwrap_or(true);
            let will_continue = condition_met && iteration < max_iterations;
            self.store.add_history(
                execution_id,
                HistoryEventKind::SubloopIterationComplete,
                None,
                json!({
                    "subloop": label,
                    "iteration": iteration,
                    "conditionMet": condition_met,
                    "continue": will_continue,
                }),
            )?;
            info!(execution_id, subloop = %label, iteration, condition_met, will_continue, "subloop iteration completed");

            if !condition_met {
                return self.finish(execution_id, state, &label, iteration, max_iterations, SubloopStopReason::ConditionFalse, deferred);
            }
            if iteration >= max_iterations {
                return self.finish(execution_id, state, &label, iteration, max_iterations, SubloopStopReason::MaxIterations, deferred);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        execution_id: &str,
        state: &mut ExecutionState,
        label: &str,
        iteration: u32,
        max_iterations: u32,
        stop_reason: SubloopStopReason,
        deferred_decisions: Vec<String>,
    ) -> Result<SubloopResult, EngineError> {
        state.subloop = None;
        self.store.update_execution(
            execution_id,
            ExecutionUpdate {
                state: Some(state.clone()),
                ..Default::default()
            },
        )?;
        let max_iterations_reached = iteration >= max_iterations;
        info!(execution_id, subloop = %label, iteration, max_iterations_reached, reason = ?stop_reason, "subloop completed");
        Ok(SubloopResult::Completed {
            iteration,
            max_iterations_reached,
            stop_reason,
            deferred_decisions,
        })
    }
}

/// Root document for continuation conditions: `{status, outputs, steps, trigger, workflow}`,
/// where `outputs` and `steps` both hold the step records keyed by id.
fn condition_root(state: &ExecutionState) -> serde_json::Value {
    let steps = state.steps_value();
    json!({
        "status": "success",
        "outputs": steps,
        "steps": steps,
        "trigger": state.trigger,
        "workflow": state.workflow,
    })
}
