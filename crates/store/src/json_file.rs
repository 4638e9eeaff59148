//! JSON-backed store persisted on disk.
//!
//! Path handling mirrors the rest of the toolchain: tilde expansion, an
//! environment override, then the platform config directory.
//!
//! Writes go to a sibling temp file that is renamed over the store, so a
//! crash mid-write leaves the previous contents intact. A file that fails to
//! parse is moved aside to `<name>.corrupt-<timestamp>` rather than
//! overwritten.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use cadence_types::{
    DecisionUpdate, ExecutionFilter, ExecutionRecord, ExecutionUpdate, HistoryEntry, HistoryEventKind, PendingDecision, StepExecution,
    StepExecutionUpdate,
};
use chrono::Utc;
use dirs_next::{config_dir, home_dir};
use serde_json::Value;
use tracing::{debug, warn};

use crate::state::StoreState;
use crate::{StoreError, WorkflowStore};

/// Environment variable controlling the store file location.
pub const STORE_PATH_ENV: &str = "CADENCE_STORE_PATH";

/// Default filename for the persisted store.
pub const STORE_FILE_NAME: &str = "store.json";

/// Store that rewrites its backing file after every mutation.
pub struct JsonFileStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl JsonFileStore {
    /// Open the store at `path`, or the default location when omitted.
    pub fn new<P: Into<Option<PathBuf>>>(path: P) -> Result<Self, StoreError> {
        let resolved_path = match path.into() {
            Some(path) => expand_tilde_path(path),
            None => default_store_path(),
        };

        let state = load_store_file(&resolved_path)?;
        debug!(path = %resolved_path.display(), "opened workflow store");
        Ok(Self {
            path: resolved_path,
            state: Mutex::new(state),
        })
    }

    pub fn with_defaults() -> Result<Self, StoreError> {
        Self::new(None::<PathBuf>)
    }

    /// Access the underlying file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save_locked(&self, state: &StoreState) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(state)?;
        let staging = sibling_path(&self.path, ".tmp");
        fs::write(&staging, content)?;
        if let Err(error) = fs::rename(&staging, &self.path) {
            let _ = fs::remove_file(&staging);
            return Err(StoreError::Io(error));
        }
        Ok(())
    }

    /// Apply `apply` to a copy and commit it only once the copy is on disk.
    fn mutate<T>(&self, apply: impl FnOnce(&mut StoreState) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let mut state = self.state.lock().expect("store lock poisoned");
        let mut next = state.clone();
        let result = apply(&mut next)?;
        self.save_locked(&next)?;
        *state = next;
        Ok(result)
    }

    fn read<T>(&self, query: impl FnOnce(&StoreState) -> T) -> T {
        let state = self.state.lock().expect("store lock poisoned");
        query(&state)
    }
}

impl WorkflowStore for JsonFileStore {
    fn create_execution(&self, record: ExecutionRecord) -> Result<ExecutionRecord, StoreError> {
        self.mutate(|state| state.create_execution(record))
    }

    fn get_execution(&self, execution_id: &str) -> Result<Option<ExecutionRecord>, StoreError> {
        Ok(self.read(|state| state.get_execution(execution_id)))
    }

    fn list_executions(&self, filter: &ExecutionFilter) -> Result<Vec<ExecutionRecord>, StoreError> {
        Ok(self.read(|state| state.list_executions(filter)))
    }

    fn update_execution(&self, execution_id: &str, update: ExecutionUpdate) -> Result<ExecutionRecord, StoreError> {
        self.mutate(|state| state.update_execution(execution_id, update))
    }

    fn add_history(
        &self,
        execution_id: &str,
        event: HistoryEventKind,
        step_id: Option<&str>,
        metadata: Value,
    ) -> Result<HistoryEntry, StoreError> {
        self.mutate(|state| state.add_history(execution_id, event, step_id, metadata))
    }

    fn history(&self, execution_id: &str) -> Result<Vec<HistoryEntry>, StoreError> {
        Ok(self.read(|state| state.history(execution_id)))
    }

    fn create_step_execution(&self, step: StepExecution) -> Result<StepExecution, StoreError> {
        self.mutate(|state| state.create_step_execution(step))
    }

    fn update_step_execution(
        &self,
        execution_id: &str,
        sequence: u64,
        update: StepExecutionUpdate,
    ) -> Result<StepExecution, StoreError> {
        self.mutate(|state| state.update_step_execution(execution_id, sequence, update))
    }

    fn step_executions(&self, execution_id: &str) -> Result<Vec<StepExecution>, StoreError> {
        Ok(self.read(|state| state.step_executions(execution_id)))
    }

    fn create_pending_decision(&self, decision: PendingDecision) -> Result<PendingDecision, StoreError> {
        self.mutate(|state| state.create_pending_decision(decision))
    }

    fn get_pending_decision(&self, decision_id: &str) -> Result<Option<PendingDecision>, StoreError> {
        Ok(self.read(|state| state.get_pending_decision(decision_id)))
    }

    fn update_pending_decision(&self, decision_id: &str, update: DecisionUpdate) -> Result<PendingDecision, StoreError> {
        self.mutate(|state| state.update_pending_decision(decision_id, update))
    }

    fn decisions_for_execution(&self, execution_id: &str) -> Result<Vec<PendingDecision>, StoreError> {
        Ok(self.read(|state| state.decisions_for_execution(execution_id)))
    }

    fn open_decisions(&self) -> Result<Vec<PendingDecision>, StoreError> {
        Ok(self.read(|state| state.open_decisions()))
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde_path(path: PathBuf) -> PathBuf {
    if let Some(first) = path.components().next()
        && first.as_os_str() != "~"
    {
        return path;
    }

    let input = path.to_string_lossy();
    let trimmed = input.trim();
    let home = || home_dir().unwrap_or_else(|| PathBuf::from("~"));

    if trimmed == "~" {
        return home();
    }
    if let Some(rest) = trimmed.strip_prefix("~/").or_else(|| trimmed.strip_prefix("~\\")) {
        return home().join(rest);
    }

    PathBuf::from(trimmed)
}

/// `$CADENCE_STORE_PATH`, falling back to `<config dir>/cadence/store.json`.
pub fn default_store_path() -> PathBuf {
    if let Ok(path) = env::var(STORE_PATH_ENV)
        && !path.trim().is_empty()
    {
        return expand_tilde_path(PathBuf::from(path));
    }

    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cadence")
        .join(STORE_FILE_NAME)
}

fn load_store_file(path: &Path) -> Result<StoreState, StoreError> {
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<StoreState>(&content) {
            Ok(state) => Ok(state),
            Err(error) => {
                let quarantine = sibling_path(path, &format!(".corrupt-{}", Utc::now().format("%Y%m%dT%H%M%S%.3fZ")));
                if fs::rename(path, &quarantine).is_err() {
                    return Err(StoreError::Serialization(error));
                }
                warn!(
                    path = %path.display(),
                    moved_to = %quarantine.display(),
                    %error,
                    "store file is unreadable; moved it aside and starting empty"
                );
                Ok(StoreState::default())
            }
        },
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(StoreState::default()),
        Err(error) => Err(StoreError::Io(error)),
    }
}

/// `path` with `suffix` appended to its file name.
fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|name| name.to_os_string()).unwrap_or_else(|| STORE_FILE_NAME.into());
    name.push(suffix);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_types::{DecisionStatus, ExecutionMode, ExecutionState, ExecutionStatus};
    use serde_json::json;
    use std::sync::Arc;
    use std::thread;
    use tempfile::tempdir;

    #[test]
    fn executions_and_history_survive_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");
        let store = JsonFileStore::new(Some(path.clone())).unwrap();

        let record = ExecutionRecord::new("e1", "deploy", ExecutionMode::Step, ExecutionState::default());
        store.create_execution(record).unwrap();
        store
            .add_history("e1", HistoryEventKind::WorkflowStarted, None, json!({"mode": "step"}))
            .unwrap();
        store
            .update_execution(
                "e1",
                ExecutionUpdate::status(ExecutionStatus::Paused).with_current_step(Some("build")),
            )
            .unwrap();

        drop(store);
        let reloaded = JsonFileStore::new(Some(path)).unwrap();
        let record = reloaded.get_execution("e1").unwrap().unwrap();
        assert_eq!(record.status, ExecutionStatus::Paused);
        assert_eq!(record.mode, ExecutionMode::Step);
        assert_eq!(record.current_step.as_deref(), Some("build"));
        let history = reloaded.history("e1").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].metadata["mode"], "step");
    }

    #[test]
    fn resolved_decisions_persist() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = JsonFileStore::new(Some(path.clone())).unwrap();
        store
            .create_pending_decision(PendingDecision {
                id: "d1".into(),
                execution_id: "e1".into(),
                step_id: "gate".into(),
                title: "Merge?".into(),
                description: None,
                proposals: Vec::new(),
                status: DecisionStatus::Pending,
                choice: None,
                notes: None,
                created_at: Utc::now(),
                resolved_at: None,
            })
            .unwrap();
        store
            .update_pending_decision("d1", DecisionUpdate::resolve("merge", Some("ship it".into())))
            .unwrap();

        drop(store);
        let reloaded = JsonFileStore::new(Some(path)).unwrap();
        let decision = reloaded.get_pending_decision("d1").unwrap().unwrap();
        assert_eq!(decision.status, DecisionStatus::Resolved);
        assert_eq!(decision.notes.as_deref(), Some("ship it"));
        assert_eq!(reloaded.decisions_for_execution("e1").unwrap().len(), 1);
    }

    #[test]
    fn failed_mutation_does_not_touch_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = JsonFileStore::new(Some(path.clone())).unwrap();
        assert!(store.update_execution("missing", ExecutionUpdate::default()).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn unreadable_store_is_moved_aside_not_overwritten() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = JsonFileStore::new(Some(path.clone())).unwrap();
        store
            .create_execution(ExecutionRecord::new("keep-me", "wf", ExecutionMode::Auto, ExecutionState::default()))
            .unwrap();
        drop(store);

        let mut damaged = fs::read_to_string(&path).unwrap();
        damaged.push('x');
        fs::write(&path, &damaged).unwrap();

        let reopened = JsonFileStore::new(Some(path.clone())).unwrap();
        assert!(reopened.list_executions(&ExecutionFilter::default()).unwrap().is_empty());
        reopened
            .create_execution(ExecutionRecord::new("fresh", "wf", ExecutionMode::Auto, ExecutionState::default()))
            .unwrap();

        let quarantined: Vec<PathBuf> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|candidate| candidate.to_string_lossy().contains("store.json.corrupt-"))
            .collect();
        assert_eq!(quarantined.len(), 1);
        assert_eq!(fs::read_to_string(&quarantined[0]).unwrap(), damaged);
        assert!(fs::read_to_string(&path).unwrap().contains("fresh"));
    }

    #[test]
    fn failed_save_leaves_decision_pending() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = JsonFileStore::new(Some(path.clone())).unwrap();
        store
            .create_pending_decision(PendingDecision {
                id: "d1".into(),
                execution_id: "e1".into(),
                step_id: "gate".into(),
                title: "Merge?".into(),
                description: None,
                proposals: Vec::new(),
                status: DecisionStatus::Pending,
                choice: None,
                notes: None,
                created_at: Utc::now(),
                resolved_at: None,
            })
            .unwrap();

        // A directory in place of the file makes the final rename fail.
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();
        let error = store
            .update_pending_decision("d1", DecisionUpdate::resolve("a", None))
            .unwrap_err();
        assert!(matches!(error, StoreError::Io(_)));
        assert!(store.get_pending_decision("d1").unwrap().unwrap().is_pending());
        assert!(!sibling_path(&path, ".tmp").exists());

        fs::remove_dir(&path).unwrap();
        let resolved = store
            .update_pending_decision("d1", DecisionUpdate::resolve("b", None))
            .unwrap();
        assert_eq!(resolved.choice.as_deref(), Some("b"));
        let reloaded = JsonFileStore::new(Some(path)).unwrap();
        assert_eq!(reloaded.get_pending_decision("d1").unwrap().unwrap().choice.as_deref(), Some("b"));
    }

    #[test]
    fn default_path_honors_env_override() {
        let override_path = "~/custom/store.json";
        temp_env::with_var(STORE_PATH_ENV, Some(override_path), || {
            let path = default_store_path();
            let expected = expand_tilde_path(PathBuf::from(override_path));
            assert_eq!(path, expected);
        });
    }

    #[test]
    fn concurrent_history_appends_get_distinct_sequences() {
        let dir = tempdir().unwrap();
        let store = Arc::new(JsonFileStore::new(Some(dir.path().join("store.json"))).unwrap());
        store
            .create_execution(ExecutionRecord::new("e1", "wf", ExecutionMode::Auto, ExecutionState::default()))
            .unwrap();

        let mut handles = Vec::new();
        for index in 0..5 {
            let handle_store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                handle_store
                    .add_history("e1", HistoryEventKind::StepStarted, Some("s"), json!({"index": index}))
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let sequences: Vec<u64> = store.history("e1").unwrap().iter().map(|entry| entry.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
    }
}
