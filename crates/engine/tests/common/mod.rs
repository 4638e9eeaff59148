#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use cadence_engine::{
    ActionCapability, DecisionRequest, ModuleDefinition, ModuleRegistry, StepOutcome, WorkflowRunner, action_fn,
};
use cadence_store::{InMemoryStore, WorkflowStore};
use cadence_types::{
    DecisionProposal, HistoryEventKind, StepDefinition, SubloopDefinition, Transition, WorkflowDefinition,
};
use serde_json::{Value, json};

/// Ordered log of step ids whose handlers actually ran.
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// `script` module with scripted actions:
///
/// - `ok`: succeeds, echoing its resolved inputs
/// - `count`: succeeds with how many times this step has run
/// - `fail`: fails with `boom`
/// - `decide`: raises a decision and goes pending
/// - `panic`: panics inside the handler
pub fn script_registry(calls: CallLog) -> ModuleRegistry {
    let ok_calls = Arc::clone(&calls);
    let count_calls = Arc::clone(&calls);
    let fail_calls = Arc::clone(&calls);
    let decide_calls = Arc::clone(&calls);
    let panic_calls = calls;

    let module = ModuleDefinition::new("script", ActionCapability::Custom)
        .with_description("scripted test actions")
        .with_action(
            "ok",
            action_fn(move |inputs, context| {
                let calls = Arc::clone(&ok_calls);
                async move {
                    calls.lock().unwrap().push(context.step_id.clone());
                    StepOutcome::success(json!({ "step": context.step_id, "inputs": inputs }))
                }
            }),
        )
        .with_action(
            "count",
            action_fn(move |_inputs, context| {
                let calls = Arc::clone(&count_calls);
                async move {
                    let mut calls = calls.lock().unwrap();
                    calls.push(context.step_id.clone());
                    let count = calls.iter().filter(|id| **id == context.step_id).count();
                    StepOutcome::success(json!({ "count": count }))
                }
            }),
        )
        .with_action(
            "fail",
            action_fn(move |_inputs, context| {
                let calls = Arc::clone(&fail_calls);
                async move {
                    calls.lock().unwrap().push(context.step_id.clone());
                    StepOutcome::failure("boom")
                }
            }),
        )
        .with_action(
            "decide",
            action_fn(move |_inputs, context| {
                let calls = Arc::clone(&decide_calls);
                async move {
                    calls.lock().unwrap().push(context.step_id.clone());
                    let request = DecisionRequest {
                        title: "Pick a path".to_string(),
                        description: None,
                        proposals: vec![
                            DecisionProposal {
                                id: "approve".to_string(),
                                title: "Approve".to_string(),
                                description: None,
                            },
                            DecisionProposal {
                                id: "reject".to_string(),
                                title: "Reject".to_string(),
                                description: None,
                            },
                        ],
                    };
                    match context.decisions.request_decision(request, &context.execution_id, &context.step_id) {
                        Ok(decision_id) => StepOutcome::pending(decision_id),
                        Err(error) => StepOutcome::failure(error.to_string()),
                    }
                }
            }),
        )
        .with_action(
            "panic",
            action_fn(move |_inputs, context| {
                let calls = Arc::clone(&panic_calls);
                async move {
                    calls.lock().unwrap().push(context.step_id.clone());
                    let scripted: Vec<StepOutcome> = Vec::new();
                    scripted[0].clone()
                }
            }),
        );
    ModuleRegistry::new().with_module(module)
}

pub struct Harness {
    pub store: Arc<dyn WorkflowStore>,
    pub runner: WorkflowRunner,
    pub calls: CallLog,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(InMemoryStore::new()))
    }

    pub fn with_store(store: Arc<dyn WorkflowStore>) -> Self {
        let calls = CallLog::default();
        let runner = WorkflowRunner::new(Arc::clone(&store), script_registry(Arc::clone(&calls)));
        Self { store, runner, calls }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn events(&self, execution_id: &str) -> Vec<HistoryEventKind> {
        self.store
            .history(execution_id)
            .unwrap()
            .into_iter()
            .map(|entry| entry.event)
            .collect()
    }

    pub fn count_events(&self, execution_id: &str, kind: HistoryEventKind) -> usize {
        self.events(execution_id).into_iter().filter(|event| *event == kind).count()
    }
}

pub fn step(id: &str, action: &str) -> StepDefinition {
    StepDefinition {
        id: id.to_string(),
        module: "script".to_string(),
        action: action.to_string(),
        ..Default::default()
    }
}

pub fn then(mut step: StepDefinition, next: &str) -> StepDefinition {
    step.on_success = Some(Transition::Step(next.to_string()));
    step
}

pub fn with_inputs(mut step: StepDefinition, inputs: Value) -> StepDefinition {
    if let Value::Object(map) = inputs {
        step.inputs = map.into_iter().collect();
    }
    step
}

pub fn subloop(steps: &[&str], max_iterations: u32) -> SubloopDefinition {
    SubloopDefinition {
        steps: steps.iter().map(|id| id.to_string()).collect(),
        max_iterations,
        ..Default::default()
    }
}

pub fn workflow(id: &str, steps: Vec<StepDefinition>, subloops: Vec<SubloopDefinition>) -> WorkflowDefinition {
    WorkflowDefinition {
        id: id.to_string(),
        name: id.to_string(),
        steps,
        subloops,
        ..Default::default()
    }
}
