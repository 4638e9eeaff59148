//! Module Registry: maps `(module, action)` pairs to action handlers.
//!
//! Modules are registered once at startup and carry a capability tag so that
//! callers can reason about what a module does without string matching on its
//! name. Lookups are read-only after construction.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::StepError;
use crate::executor::{ActionContext, StepOutcome};

/// Broad class of work a module performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionCapability {
    /// Prompts against an AI model.
    Claude,
    /// Test-suite execution.
    Testing,
    /// Engine-level actions: logging, delays, decisions.
    System,
    /// Anything registered by an embedder.
    Custom,
}

/// Executable behavior behind one module action.
///
/// Handlers report failure through [`StepOutcome::Failure`] rather than by
/// panicking; the executor records whatever outcome is returned.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn invoke(&self, inputs: Map<String, Value>, context: ActionContext) -> StepOutcome;
}

/// Adapts an async closure into an [`ActionHandler`].
pub struct FnAction<F>(F);

#[async_trait]
impl<F, Fut> ActionHandler for FnAction<F>
where
    F: Fn(Map<String, Value>, ActionContext) -> Fut + Send + Sync,
    Fut: Future<Output = StepOutcome> + Send + 'static,
{
    async fn invoke(&self, inputs: Map<String, Value>, context: ActionContext) -> StepOutcome {
        (self.0)(inputs, context).await
    }
}

/// Wrap an async closure as a shareable handler.
pub fn action_fn<F, Fut>(handler: F) -> Arc<dyn ActionHandler>
where
    F: Fn(Map<String, Value>, ActionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StepOutcome> + Send + 'static,
{
    Arc::new(FnAction(handler))
}

/// A named group of actions.
#[derive(Clone)]
pub struct ModuleDefinition {
    pub name: String,
    pub version: String,
    pub description: String,
    pub capability: ActionCapability,
    actions: IndexMap<String, Arc<dyn ActionHandler>>,
}

impl ModuleDefinition {
    pub fn new(name: impl Into<String>, capability: ActionCapability) -> Self {
        Self {
            name: name.into(),
            version: "1.0.0".to_string(),
            description: String::new(),
            capability,
            actions: IndexMap::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_action(mut self, name: impl Into<String>, handler: Arc<dyn ActionHandler>) -> Self {
        self.actions.insert(name.into(), handler);
        self
    }

    pub fn action(&self, name: &str) -> Option<Arc<dyn ActionHandler>> {
        self.actions.get(name).cloned()
    }

    pub fn action_names(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }
}

/// Serializable description of a registered module.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ModuleSummary {
    pub name: String,
    pub version: String,
    pub description: String,
    pub capability: ActionCapability,
    pub actions: Vec<String>,
}

/// Lookup table of modules keyed by name.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: IndexMap<String, ModuleDefinition>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module, replacing any module with the same name.
    pub fn register(&mut self, module: ModuleDefinition) {
        debug!(module = %module.name, actions = module.actions.len(), "registering module");
        if let Some(previous) = self.modules.insert(module.name.clone(), module) {
            warn!(module = %previous.name, "module registered twice; keeping the latest definition");
        }
    }

    pub fn with_module(mut self, module: ModuleDefinition) -> Self {
        self.register(module);
        self
    }

    /// Resolve the handler for `module.action`.
    pub fn resolve(&self, module: &str, action: &str) -> Result<Arc<dyn ActionHandler>, StepError> {
        let definition = self.modules.get(module).ok_or_else(|| StepError::ModuleNotFound {
            module: module.to_string(),
        })?;
        definition.action(action).ok_or_else(|| StepError::ActionNotFound {
            module: module.to_string(),
            action: action.to_string(),
        })
    }

    pub fn module(&self, name: &str) -> Option<&ModuleDefinition> {
        self.modules.get(name)
    }

    /// Registered modules in registration order.
    pub fn summaries(&self) -> Vec<ModuleSummary> {
        self.modules
            .values()
            .map(|module| ModuleSummary {
                name: module.name.clone(),
                version: module.version.clone(),
                description: module.description.clone(),
                capability: module.capability,
                actions: module.action_names().map(str::to_string).collect(),
            })
            .collect()
    }
}
