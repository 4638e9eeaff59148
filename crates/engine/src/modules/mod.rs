//! Built-in modules registered by [`builtin_registry`].
//!
//! - `system`: logging, delays, error handling, completion notices, decisions
//! - `testing`: runs a project's test command
//! - `claude`: single-turn prompts against the Claude Messages API

use serde_json::{Map, Value};

use crate::registry::ModuleRegistry;

pub mod claude;
pub mod system;
pub mod testing;

/// Registry pre-populated with every built-in module.
pub fn builtin_registry() -> ModuleRegistry {
    ModuleRegistry::new()
        .with_module(system::module())
        .with_module(testing::module())
        .with_module(claude::module())
}

impl ModuleRegistry {
    pub fn with_builtins() -> Self {
        builtin_registry()
    }
}

/// Non-blank string input.
pub(crate) fn string_input<'a>(inputs: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    inputs.get(key).and_then(Value::as_str).filter(|value| !value.trim().is_empty())
}

/// Numeric input; numeric strings are accepted as well.
pub(crate) fn number_input(inputs: &Map<String, Value>, key: &str) -> Option<f64> {
    match inputs.get(key)? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}


#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use cadence_store::{InMemoryStore, WorkflowStore};
    use cadence_types::{ExecutionMode, ExecutionRecord, ExecutionState, WorkflowContext};
    use serde_json::{Map, Value, json};

    use crate::decision::DecisionCoordinator;
    use crate::executor::{ActionContext, StepLogger};

    pub(crate) const EXECUTION_ID: &str = "exec-1";
    pub(crate) const STEP_ID: &str = "step-1";

    /// Context backed by a fresh in-memory store holding one execution.
    pub(crate) fn context() -> ActionContext {
        let store: Arc<dyn WorkflowStore> = Arc::new(InMemoryStore::new());
        let state = ExecutionState::new(
            json!({}),
            WorkflowContext {
                execution_id: EXECUTION_ID.to_string(),
                workflow_id: "wf".to_string(),
                version_tag: None,
            },
        );
        store
            .create_execution(ExecutionRecord::new(EXECUTION_ID, "wf", ExecutionMode::Auto, state.clone()))
            .expect("create execution");
        ActionContext {
            execution_id: EXECUTION_ID.to_string(),
            step_id: STEP_ID.to_string(),
            iteration: None,
            state,
            decisions: DecisionCoordinator::new(Arc::clone(&store)),
            store,
            logger: StepLogger::new(EXECUTION_ID, STEP_ID),
        }
    }

    pub(crate) fn inputs(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }
}
