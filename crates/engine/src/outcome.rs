//! Outcome classification, follow-up suggestions, and the execution summary
//! written when a run reaches a terminal status.

use cadence_types::{
    ExecutionOutcome, ExecutionRecord, ExecutionState, FollowUpSuggestion, StepExecution, StepExecutionStatus, StepRecordStatus,
    WorkflowDefinition,
};
use serde_json::Value;

/// Classify how a run ended from the outputs it accumulated.
///
/// The most recently recorded step is inspected first: `count: 0` or
/// `nextStepsCount: 0` means there was nothing to do, `allComplete: true`
/// means everything is done, and a `versionTag` means a version was cut. A
/// failed last step is `failed`. Failing that, any step reporting `count: 0`,
/// an empty `nextSteps` list, or `allComplete: true` decides the outcome.
pub fn determine_outcome(state: &ExecutionState) -> ExecutionOutcome {
    let Some((_, last)) = state.steps.last() else {
        return ExecutionOutcome::Unknown;
    };

    let outputs = &last.outputs;
    if is_zero(outputs.get("count")) || is_zero(outputs.get("nextStepsCount")) {
        return ExecutionOutcome::NoTasks;
    }
    if outputs.get("allComplete") == Some(&Value::Bool(true)) {
        return ExecutionOutcome::AllComplete;
    }
    if outputs.get("versionTag").is_some_and(|tag| !tag.is_null()) {
        return ExecutionOutcome::VersionCreated;
    }
    if last.status == StepRecordStatus::Failure {
        return ExecutionOutcome::Failed;
    }

    for record in state.steps.values() {
        let outputs = &record.outputs;
        let no_next_steps = outputs
            .get("nextSteps")
            .and_then(Value::as_array)
            .is_some_and(Vec::is_empty);
        if is_zero(outputs.get("count")) || no_next_steps {
            return ExecutionOutcome::NoTasks;
        }
        if outputs.get("allComplete") == Some(&Value::Bool(true)) {
            return ExecutionOutcome::AllComplete;
        }
    }

    ExecutionOutcome::Completed
}

/// Outcome recorded for a failed run. Indicators other than plain success
/// still win, so a run that found no work before failing says so.
pub fn failure_outcome(state: &ExecutionState) -> ExecutionOutcome {
    match determine_outcome(state) {
        ExecutionOutcome::Completed | ExecutionOutcome::Unknown => ExecutionOutcome::Failed,
        other => other,
    }
}

fn is_zero(value: Option<&Value>) -> bool {
    value.and_then(Value::as_f64).is_some_and(|number| number == 0.0)
}

/// Follow-up workflows declared by `workflow` whose `onOutcome` matches.
pub fn follow_up_suggestions(outcome: ExecutionOutcome, workflow: &WorkflowDefinition) -> Vec<FollowUpSuggestion> {
    workflow
        .follow_up_workflows
        .iter()
        .filter(|follow_up| follow_up.applies_to(outcome))
        .map(|follow_up| FollowUpSuggestion {
            workflow_id: follow_up.workflow_id.clone(),
            name: follow_up.name.clone().unwrap_or_else(|| follow_up.workflow_id.clone()),
            description: follow_up
                .description
                .clone()
                .unwrap_or_else(|| format!("Run {} workflow", follow_up.workflow_id)),
            reason: follow_up
                .reason
                .clone()
                .unwrap_or_else(|| format!("Suggested because workflow completed with outcome: {outcome}")),
        })
        .collect()
}

/// Markdown report of a finished run: headline facts, the error if any,
/// suggestions, then every step run with its inputs and outputs.
pub fn execution_summary(
    record: &ExecutionRecord,
    workflow: &WorkflowDefinition,
    outcome: ExecutionOutcome,
    suggestions: &[FollowUpSuggestion],
    step_runs: &[StepExecution],
) -> String {
    let succeeded = step_runs
        .iter()
        .filter(|run| run.status == StepExecutionStatus::Completed)
        .count();
    let failed = step_runs
        .iter()
        .filter(|run| run.status == StepExecutionStatus::Failed)
        .count();
    let return_code = match (step_runs.len(), failed) {
        (0, _) => "N/A".to_string(),
        (_, 0) => "0 (success)".to_string(),
        (_, failures) => format!("{failures} (failed)"),
    };
    let workflow_name = [workflow.name.as_str(), workflow.identifier()]
        .into_iter()
        .find(|candidate| !candidate.trim().is_empty())
        .unwrap_or("unknown");

    let mut lines = vec![
        format!("# Execution Summary: {}", record.id),
        String::new(),
        "## Basic Information".to_string(),
        format!("- **Execution ID:** {}", record.id),
        format!("- **Status:** {}", record.status),
        format!("- **Workflow:** {workflow_name}"),
        format!(
            "- **Version Tag:** {}",
            record.state.workflow.version_tag.as_deref().unwrap_or("N/A")
        ),
        format!("- **Outcome:** {outcome}"),
        format!(
            "- **Steps Summary:** {succeeded} succeeded, {failed} failed, {} total",
            step_runs.len()
        ),
        format!("- **Overall Return Code:** {return_code}"),
        format!("- **Started:** {}", record.created_at.to_rfc3339()),
    ];
    match record.completed_at {
        Some(completed_at) => {
            lines.push(format!("- **Completed:** {}", completed_at.to_rfc3339()));
            let seconds = (completed_at - record.created_at).num_milliseconds() as f64 / 1000.0;
            lines.push(format!("- **Duration:** {}s", seconds.round()));
        }
        None => lines.push("- **Completed:** Still running".to_string()),
    }

    if let Some(error) = &record.error {
        lines.extend([String::new(), "## Error".to_string(), "```".to_string(), error.clone(), "```".to_string()]);
    }

    if !suggestions.is_empty() {
        lines.extend([String::new(), "## Follow-up Suggestions".to_string()]);
        for suggestion in suggestions {
            lines.push(format!(
                "- **{}** (`{}`): {}",
                suggestion.name, suggestion.workflow_id, suggestion.reason
            ));
        }
    }

    if !step_runs.is_empty() {
        lines.extend([String::new(), format!("## Step Executions ({})", step_runs.len())]);
        for (index, run) in step_runs.iter().enumerate() {
            lines.push(String::new());
            match run.iteration {
                Some(iteration) => lines.push(format!("### Step {}: {} (iteration {iteration})", index + 1, run.step_id)),
                None => lines.push(format!("### Step {}: {}", index + 1, run.step_id)),
            }
            lines.push(format!("- **Module:** {}", run.module));
            lines.push(format!("- **Action:** {}", run.action));
            lines.push(format!("- **Status:** {}", run.status.as_str()));
            lines.push(format!(
                "- **Return Code:** {}",
                run.return_code.map(|code| code.to_string()).unwrap_or_else(|| "N/A".to_string())
            ));
            lines.push(format!("- **Duration:** {}ms", run.duration_ms));
            if !run.inputs.is_null() {
                lines.extend(json_block("Inputs", &run.inputs));
            }
            lines.extend(json_block("Outputs", &run.outputs));
            if let Some(error) = &run.error {
                lines.extend(["- **Error:**".to_string(), "```".to_string(), error.clone(), "```".to_string()]);
            }
        }
    }

    lines.push(String::new());
    lines.join("\n")
}

fn json_block(label: &str, value: &Value) -> [String; 4] {
    let rendered = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    [format!("- **{label}:**"), "```json".to_string(), rendered, "```".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_types::{ExecutionMode, ExecutionStatus, FollowUpWorkflow, OutcomeMatch, StepRecord, WorkflowContext};
    use serde_json::json;

    fn state_with(steps: &[(&str, StepRecord)]) -> ExecutionState {
        let mut state = ExecutionState::default();
        for (step_id, record) in steps {
            state.record_step(*step_id, record.clone());
        }
        state
    }

    fn failed(error: &str) -> StepRecord {
        let mut record = StepRecord::success(json!({}));
        record.status = StepRecordStatus::Failure;
        record.error = Some(error.to_string());
        record
    }

    #[test]
    fn empty_state_is_unknown() {
        assert_eq!(determine_outcome(&ExecutionState::default()), ExecutionOutcome::Unknown);
    }

    #[test]
    fn last_step_indicators_decide_first() {
        let cases = [
            (json!({"count": 0}), ExecutionOutcome::NoTasks),
            (json!({"nextStepsCount": 0}), ExecutionOutcome::NoTasks),
            (json!({"allComplete": true}), ExecutionOutcome::AllComplete),
            (json!({"versionTag": "version0-3"}), ExecutionOutcome::VersionCreated),
            (json!({"count": 4}), ExecutionOutcome::Completed),
        ];
        for (outputs, expected) in cases {
            let state = state_with(&[("scan", StepRecord::success(outputs.clone()))]);
            assert_eq!(determine_outcome(&state), expected, "outputs {outputs}");
        }
    }

    #[test]
    fn failed_last_step_is_failed() {
        let state = state_with(&[("plan", StepRecord::success(json!({"count": 2}))), ("apply", failed("boom"))]);
        assert_eq!(determine_outcome(&state), ExecutionOutcome::Failed);
    }

    #[test]
    fn earlier_steps_are_scanned_for_indicators() {
        let state = state_with(&[
            ("scan", StepRecord::success(json!({"nextSteps": []}))),
            ("report", StepRecord::success(json!({"written": true}))),
        ]);
        assert_eq!(determine_outcome(&state), ExecutionOutcome::NoTasks);
    }

    #[test]
    fn failure_outcome_keeps_specific_indicators() {
        let state = state_with(&[("apply", StepRecord::success(json!({"ok": true})))]);
        assert_eq!(failure_outcome(&state), ExecutionOutcome::Failed);
        assert_eq!(failure_outcome(&ExecutionState::default()), ExecutionOutcome::Failed);

        let state = state_with(&[("scan", StepRecord::success(json!({"count": 0})))]);
        assert_eq!(failure_outcome(&state), ExecutionOutcome::NoTasks);
    }

    #[test]
    fn follow_ups_match_declared_outcomes() {
        let workflow = WorkflowDefinition {
            id: "execute".into(),
            follow_up_workflows: vec![
                FollowUpWorkflow {
                    workflow_id: "review".into(),
                    name: Some("Review".into()),
                    description: None,
                    reason: Some("nothing left to build".into()),
                    on_outcome: Some(OutcomeMatch::One(ExecutionOutcome::NoTasks)),
                },
                FollowUpWorkflow {
                    workflow_id: "release".into(),
                    name: None,
                    description: None,
                    reason: None,
                    on_outcome: Some(OutcomeMatch::Many(vec![ExecutionOutcome::AllComplete, ExecutionOutcome::NoTasks])),
                },
                FollowUpWorkflow {
                    workflow_id: "unconditional".into(),
                    name: None,
                    description: None,
                    reason: None,
                    on_outcome: None,
                },
            ],
            ..Default::default()
        };

        let suggestions = follow_up_suggestions(ExecutionOutcome::NoTasks, &workflow);
        let ids: Vec<&str> = suggestions.iter().map(|suggestion| suggestion.workflow_id.as_str()).collect();
        assert_eq!(ids, vec!["review", "release"]);
        assert_eq!(suggestions[0].reason, "nothing left to build");
        assert_eq!(suggestions[1].name, "release");
        assert_eq!(suggestions[1].description, "Run release workflow");
        assert_eq!(
            suggestions[1].reason,
            "Suggested because workflow completed with outcome: no-tasks"
        );

        assert!(follow_up_suggestions(ExecutionOutcome::Completed, &workflow).is_empty());
    }

    #[test]
    fn summary_lists_step_runs_and_error() {
        let state = ExecutionState::new(
            json!({}),
            WorkflowContext {
                execution_id: "e1".into(),
                workflow_id: "deploy".into(),
                version_tag: Some("2.1.0".into()),
            },
        );
        let mut record = ExecutionRecord::new("e1", "deploy", ExecutionMode::Auto, state);
        record.status = ExecutionStatus::Failed;
        record.error = Some("tests failed".into());
        record.completed_at = Some(record.created_at);

        let mut build = StepExecution::started("e1", "build", "system", "log", json!({"message": "go"}), None);
        build.status = StepExecutionStatus::Completed;
        build.return_code = Some(0);
        let mut test = StepExecution::started("e1", "test", "testing", "run-tests", Value::Null, Some(2));
        test.status = StepExecutionStatus::Failed;
        test.return_code = Some(1);
        test.error = Some("tests failed".into());

        let workflow = WorkflowDefinition {
            id: "deploy".into(),
            name: "Deploy".into(),
            ..Default::default()
        };
        let summary = execution_summary(&record, &workflow, ExecutionOutcome::Failed, &[], &[build, test]);

        assert!(summary.starts_with("# Execution Summary: e1"));
        assert!(summary.contains("- **Workflow:** Deploy"));
        assert!(summary.contains("- **Version Tag:** 2.1.0"));
        assert!(summary.contains("- **Outcome:** failed"));
        assert!(summary.contains("1 succeeded, 1 failed, 2 total"));
        assert!(summary.contains("- **Overall Return Code:** 1 (failed)"));
        assert!(summary.contains("## Error"));
        assert!(summary.contains("### Step 2: test (iteration 2)"));
        assert!(summary.contains("\"message\": \"go\""));
        assert!(!summary.contains("Follow-up Suggestions"));
    }
}
