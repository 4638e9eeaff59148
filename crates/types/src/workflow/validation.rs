//! Structural validation for workflow definitions.
//!
//! All problems are collected in one pass so authors can fix a document
//! without re-running validation for every individual mistake.

use std::collections::HashSet;

use super::{Transition, WorkflowDefinition};

/// Validate a workflow definition, returning every problem found.
///
/// Checks performed:
/// - the workflow has a name or identifier and at least one step
/// - every step has an id, module, and action, and ids are unique
/// - transition targets reference existing steps
/// - subloops reference existing, contiguous, non-overlapping steps and have a positive bound
pub fn validate_workflow(workflow: &WorkflowDefinition) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if workflow.identifier().trim().is_empty() {
        errors.push("workflow must have a name or id".to_string());
    }
    if workflow.steps.is_empty() {
        errors.push("workflow must have at least one step".to_string());
    }

    let mut seen = HashSet::new();
    for (index, step) in workflow.steps.iter().enumerate() {
        if step.id.trim().is_empty() {
            errors.push(format!("step {index} is missing an id"));
        } else if !seen.insert(step.id.as_str()) {
            errors.push(format!("duplicate step id: {}", step.id));
        }
        if step.module.trim().is_empty() {
            errors.push(format!("step '{}' is missing a module", step.id));
        }
        if step.action.trim().is_empty() {
            errors.push(format!("step '{}' is missing an action", step.id));
        }

        match &step.on_success {
            Some(Transition::Step(target)) => check_target(workflow, &step.id, "onSuccess", target, &mut errors),
            Some(Transition::Conditional(branch)) => {
                if branch.condition.trim().is_empty() {
                    errors.push(format!("step '{}' has an empty onSuccess condition", step.id));
                }
                if let Some(target) = &branch.then_step {
                    check_target(workflow, &step.id, "onSuccess.then", target, &mut errors);
                }
                if let Some(target) = &branch.else_step {
                    check_target(workflow, &step.id, "onSuccess.else", target, &mut errors);
                }
            }
            None => {}
        }
        if let Some(target) = &step.on_failure {
            check_target(workflow, &step.id, "onFailure", target, &mut errors);
        }
    }

    let mut claimed: HashSet<&str> = HashSet::new();
    for subloop in &workflow.subloops {
        let label = subloop.label();
        if subloop.steps.is_empty() {
            errors.push(format!("subloop '{label}' has no steps"));
            continue;
        }
        if subloop.max_iterations == 0 {
            errors.push(format!("subloop '{label}' must allow at least one iteration"));
        }

        let mut positions = Vec::with_capacity(subloop.steps.len());
        for step_id in &subloop.steps {
            match workflow.step_index(step_id) {
                Some(position) => positions.push(position),
                None => errors.push(format!("subloop '{label}' references unknown step: {step_id}")),
            }
            if !claimed.insert(step_id.as_str()) {
                errors.push(format!("step '{step_id}' belongs to more than one subloop"));
            }
        }
        let contiguous = positions.windows(2).all(|pair| pair[1] == pair[0] + 1);
        if positions.len() == subloop.steps.len() && !contiguous {
            errors.push(format!("subloop '{label}' steps must be contiguous and in workflow order"));
        }
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

fn check_target(workflow: &WorkflowDefinition, step_id: &str, field: &str, target: &str, errors: &mut Vec<String>) {
    if workflow.step(target).is_none() {
        errors.push(format!("step '{step_id}' references unknown step in {field}: {target}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{ConditionalTransition, StepDefinition, SubloopDefinition};

    fn step(id: &str) -> StepDefinition {
        StepDefinition {
            id: id.into(),
            module: "system".into(),
            action: "log".into(),
            ..Default::default()
        }
    }

    fn workflow(steps: Vec<StepDefinition>) -> WorkflowDefinition {
        WorkflowDefinition {
            id: "wf".into(),
            name: "Workflow".into(),
            steps,
            ..Default::default()
        }
    }

    #[test]
    fn valid_workflow_passes() {
        let mut first = step("first");
        first.on_success = Some(Transition::Step("second".into()));
        assert!(validate_workflow(&workflow(vec![first, step("second")])).is_ok());
    }

    #[test]
    fn reports_duplicate_ids_and_missing_fields_together() {
        let mut broken = step("a");
        broken.module.clear();
        let errors = validate_workflow(&workflow(vec![broken, step("a")])).expect_err("should fail");
        assert!(errors.iter().any(|error| error.contains("duplicate step id: a")), "{errors:?}");
        assert!(errors.iter().any(|error| error.contains("missing a module")), "{errors:?}");
    }

    #[test]
    fn reports_unknown_transition_targets() {
        let mut first = step("first");
        first.on_success = Some(Transition::Conditional(ConditionalTransition {
            condition: "steps.first.outputs.ok".into(),
            then_step: Some("ghost".into()),
            else_step: None,
        }));
        first.on_failure = Some("phantom".into());
        let errors = validate_workflow(&workflow(vec![first])).expect_err("should fail");
        assert!(errors.iter().any(|error| error.contains("onSuccess.then: ghost")), "{errors:?}");
        assert!(errors.iter().any(|error| error.contains("onFailure: phantom")), "{errors:?}");
    }

    #[test]
    fn rejects_non_contiguous_and_zero_bound_subloops() {
        let mut definition = workflow(vec![step("a"), step("b"), step("c")]);
        definition.subloops.push(SubloopDefinition {
            steps: vec!["a".into(), "c".into()],
            max_iterations: 0,
            ..Default::default()
        });
        let errors = validate_workflow(&definition).expect_err("should fail");
        assert!(errors.iter().any(|error| error.contains("contiguous")), "{errors:?}");
        assert!(errors.iter().any(|error| error.contains("at least one iteration")), "{errors:?}");
    }
}
