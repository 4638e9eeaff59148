//! `system` module: engine-level actions.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cadence_types::DecisionProposal;
use chrono::Utc;
use serde_json::{Map, Value, json};

use super::{number_input, string_input};
use crate::decision::DecisionRequest;
use crate::executor::{ActionContext, StepOutcome};
use crate::registry::{ActionCapability, ActionHandler, ModuleDefinition};
use crate::resolve::format_json_value;

const DEFAULT_WAIT_SECONDS: f64 = 1.0;
const DEFAULT_COMPLETION_STATUS: &str = "completed";

pub fn module() -> ModuleDefinition {
    ModuleDefinition::new("system", ActionCapability::System)
        .with_version("1.0.0")
        .with_description("Logging, delays, error handling, and human decisions")
        .with_action("log", Arc::new(LogAction))
        .with_action("wait", Arc::new(WaitAction))
        .with_action("handle-error", Arc::new(HandleErrorAction))
        .with_action("notify-completion", Arc::new(NotifyCompletionAction))
        .with_action("request-decision", Arc::new(RequestDecisionAction))
}

/// Writes `message` to the engine log at `level` (default `info`).
pub struct LogAction;

#[async_trait]
impl ActionHandler for LogAction {
    async fn invoke(&self, inputs: Map<String, Value>, context: ActionContext) -> StepOutcome {
        let message = inputs.get("message").map(format_json_value).unwrap_or_default();
        let level = string_input(&inputs, "level").unwrap_or("info");
        context.logger.log(level, &message);
        StepOutcome::success(json!({
            "logged": true,
            "level": level,
            "message": message,
        }))
    }
}

/// Sleeps for `seconds` (default 1).
pub struct WaitAction;

#[async_trait]
impl ActionHandler for WaitAction {
    async fn invoke(&self, inputs: Map<String, Value>, context: ActionContext) -> StepOutcome {
        let seconds = match inputs.get("seconds") {
            None | Some(Value::Null) => DEFAULT_WAIT_SECONDS,
            Some(_) => match number_input(&inputs, "seconds") {
                Some(seconds) if seconds.is_finite() && seconds >= 0.0 => seconds,
                _ => return StepOutcome::failure("'seconds' must be a non-negative number"),
            },
        };
        let Ok(duration) = Duration::try_from_secs_f64(seconds) else {
            return StepOutcome::failure(format!("'seconds' is out of range: {seconds}"));
        };
        context.logger.debug(&format!("waiting {seconds}s"));
        tokio::time::sleep(duration).await;
        StepOutcome::success(json!({ "waited": seconds }))
    }
}

/// Records an upstream failure so a workflow can route `onFailure` somewhere useful.
pub struct HandleErrorAction;

#[async_trait]
impl ActionHandler for HandleErrorAction {
    async fn invoke(&self, inputs: Map<String, Value>, context: ActionContext) -> StepOutcome {
        let error = inputs
            .get("error")
            .map(format_json_value)
            .filter(|error| !error.is_empty())
            .unwrap_or_else(|| "unknown error".to_string());
        let failed_step = string_input(&inputs, "step");
        context.logger.error(&format!("handling error from {}: {error}", failed_step.unwrap_or("previous step")));
        StepOutcome::success(json!({
            "handled": true,
            "error": error,
            "step": failed_step,
            "timestamp": Utc::now().to_rfc3339(),
        }))
    }
}

/// Announces that a workflow (or part of one) finished.
pub struct NotifyCompletionAction;

#[async_trait]
impl ActionHandler for NotifyCompletionAction {
    async fn invoke(&self, inputs: Map<String, Value>, context: ActionContext) -> StepOutcome {
        // Unrendered template text falls back to the default status.
        let status = string_input(&inputs, "status")
            .filter(|status| !status.contains("{{"))
            .unwrap_or(DEFAULT_COMPLETION_STATUS);
        let execution_id = string_input(&inputs, "executionId").unwrap_or(&context.execution_id);
        let duration = inputs.get("duration").cloned().unwrap_or(Value::Null);
        context
            .logger
            .info(&format!("execution {execution_id} finished with status {status}"));
        StepOutcome::success(json!({
            "notified": true,
            "status": status,
            "executionId": execution_id,
            "duration": duration,
            "completedAt": Utc::now().to_rfc3339(),
        }))
    }
}

/// Suspends the step on a human decision.
///
/// `proposals` entries may be plain strings or `{id, title, description}`
/// objects. The step outcome is pending until the decision is resolved.
pub struct RequestDecisionAction;

#[async_trait]
impl ActionHandler for RequestDecisionAction {
    async fn invoke(&self, inputs: Map<String, Value>, context: ActionContext) -> StepOutcome {
        let Some(title) = string_input(&inputs, "title") else {
            return StepOutcome::failure("request-decision requires a 'title' input");
        };
        let request = DecisionRequest {
            title: title.to_string(),
            description: string_input(&inputs, "description").map(str::to_string),
            proposals: parse_proposals(inputs.get("proposals")),
        };

        match context.decisions.request_decision(request, &context.execution_id, &context.step_id) {
            Ok(decision_id) => {
                context.logger.info(&format!("waiting on decision {decision_id}"));
                StepOutcome::pending(decision_id)
            }
            Err(error) => StepOutcome::failure(format!("failed to request decision: {error}")),
        }
    }
}

fn parse_proposals(raw: Option<&Value>) -> Vec<DecisionProposal> {
    let Some(Value::Array(entries)) = raw else {
        return Vec::new();
    };
    entries
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| match entry {
            Value::String(text) => Some(DecisionProposal {
                id: text.clone(),
                title: text.clone(),
                description: None,
            }),
            Value::Object(fields) => {
                let text = |key: &str| fields.get(key).and_then(Value::as_str).map(str::to_string);
                let id = text("id").unwrap_or_else(|| format!("proposal-{}", index + 1));
                Some(DecisionProposal {
                    title: text("title").unwrap_or_else(|| id.clone()),
                    description: text("description"),
                    id,
                })
            }
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::test_support::{EXECUTION_ID, STEP_ID, context, inputs};
    use cadence_types::HistoryEventKind;

    #[tokio::test]
    async fn log_echoes_the_message() {
        let outcome = LogAction
            .invoke(inputs(json!({"message": "hello", "level": "warn"})), context())
            .await;
        assert_eq!(
            outcome,
            StepOutcome::success(json!({"logged": true, "level": "warn", "message": "hello"}))
        );
    }

    #[tokio::test]
    async fn wait_rejects_negative_durations() {
        let outcome = WaitAction.invoke(inputs(json!({"seconds": -1})), context()).await;
        assert!(matches!(outcome, StepOutcome::Failure { .. }));

        let outcome = WaitAction.invoke(inputs(json!({"seconds": 0})), context()).await;
        assert_eq!(outcome, StepOutcome::success(json!({"waited": 0.0})));
    }

    #[tokio::test]
    async fn wait_rejects_durations_that_overflow() {
        let outcome = WaitAction.invoke(inputs(json!({"seconds": 1e30})), context()).await;
        let StepOutcome::Failure { error, .. } = outcome else {
            panic!("expected failure");
        };
        assert!(error.contains("out of range"));
    }

    #[tokio::test]
    async fn notify_completion_ignores_unrendered_status() {
        let outcome = NotifyCompletionAction
            .invoke(inputs(json!({"status": "{{ steps.x.status }}"})), context())
            .await;
        let StepOutcome::Success { outputs } = outcome else {
            panic!("expected success");
        };
        assert_eq!(outputs["status"], "completed");
        assert_eq!(outputs["executionId"], EXECUTION_ID);
    }

    #[tokio::test]
    async fn handle_error_defaults_the_message() {
        let StepOutcome::Success { outputs } = HandleErrorAction.invoke(Map::new(), context()).await else {
            panic!("expected success");
        };
        assert_eq!(outputs["handled"], true);
        assert_eq!(outputs["error"], "unknown error");
    }

    #[tokio::test]
    async fn request_decision_creates_a_pending_decision() {
        let context = context();
        let decisions = context.decisions.clone();
        let store = context.store.clone();
        let outcome = RequestDecisionAction
            .invoke(
                inputs(json!({
                    "title": "Ship it?",
                    "proposals": ["yes", {"id": "no", "title": "Not yet", "description": "needs work"}, 42]
                })),
                context,
            )
            .await;

        let StepOutcome::Pending { decision_id, outputs } = outcome else {
            panic!("expected pending outcome");
        };
        assert_eq!(outputs["decisionId"], decision_id.as_str());

        let decision = decisions.get_decision(&decision_id).unwrap().expect("decision stored");
        assert_eq!(decision.step_id, STEP_ID);
        assert!(decision.is_pending());
        let ids: Vec<&str> = decision.proposals.iter().map(|proposal| proposal.id.as_str()).collect();
        assert_eq!(ids, vec!["yes", "no"]);
        assert_eq!(decision.proposals[1].title, "Not yet");

        let history = store.history(EXECUTION_ID).unwrap();
        assert!(history.iter().any(|entry| entry.event == HistoryEventKind::DecisionRequested));
    }

    #[tokio::test]
    async fn request_decision_requires_a_title() {
        let outcome = RequestDecisionAction.invoke(Map::new(), context()).await;
        assert!(matches!(outcome, StepOutcome::Failure { .. }));
    }
}
