//! Engine configuration resolved from the environment.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use cadence_store::{default_store_path, expand_tilde_path};
use cadence_types::workflow::DEFAULT_MAX_ITERATIONS;

pub const WORKFLOWS_DIR_ENV: &str = "CADENCE_WORKFLOWS_DIR";
pub const DEFAULT_MAX_ITERATIONS_ENV: &str = "CADENCE_DEFAULT_MAX_ITERATIONS";
pub const DEFAULT_WORKFLOWS_DIR: &str = "workflows";

/// Runtime settings shared by the CLI and embedders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// JSON store file backing executions, history, and decisions.
    pub store_path: PathBuf,
    /// Directory searched for workflow files given by bare name.
    pub workflows_dir: PathBuf,
    /// Bound applied to subloops that omit `maxIterations`.
    pub default_max_iterations: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            workflows_dir: PathBuf::from(DEFAULT_WORKFLOWS_DIR),
            default_max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl EngineConfig {
    /// Resolve configuration from `CADENCE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(dir) = non_empty_var(WORKFLOWS_DIR_ENV) {
            config.workflows_dir = expand_tilde_path(PathBuf::from(dir));
        }

        if let Some(raw) = non_empty_var(DEFAULT_MAX_ITERATIONS_ENV) {
            let parsed: u32 = raw
                .trim()
                .parse()
                .with_context(|| format!("{DEFAULT_MAX_ITERATIONS_ENV} must be a positive integer, got '{raw}'"))?;
            if parsed == 0 {
                bail!("{DEFAULT_MAX_ITERATIONS_ENV} must be greater than zero");
            }
            config.default_max_iterations = parsed;
        }

        Ok(config)
    }

    /// Override the store location.
    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = expand_tilde_path(path.into());
        self
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_store::STORE_PATH_ENV;

    #[test]
    fn defaults_apply_without_environment() {
        temp_env::with_vars(
            [
                (WORKFLOWS_DIR_ENV, None::<&str>),
                (DEFAULT_MAX_ITERATIONS_ENV, None),
                (STORE_PATH_ENV, Some("/tmp/cadence-test/store.json")),
            ],
            || {
                let config = EngineConfig::from_env().unwrap();
                assert_eq!(config.workflows_dir, PathBuf::from("workflows"));
                assert_eq!(config.default_max_iterations, DEFAULT_MAX_ITERATIONS);
                assert_eq!(config.store_path, PathBuf::from("/tmp/cadence-test/store.json"));
            },
        );
    }

    #[test]
    fn environment_overrides_are_parsed() {
        temp_env::with_vars(
            [(WORKFLOWS_DIR_ENV, Some("/srv/flows")), (DEFAULT_MAX_ITERATIONS_ENV, Some("4"))],
            || {
                let config = EngineConfig::from_env().unwrap();
                assert_eq!(config.workflows_dir, PathBuf::from("/srv/flows"));
                assert_eq!(config.default_max_iterations, 4);
            },
        );
    }

    #[test]
    fn invalid_iteration_bound_is_rejected() {
        temp_env::with_var(DEFAULT_MAX_ITERATIONS_ENV, Some("zero"), || {
            assert!(EngineConfig::from_env().is_err());
        });
        temp_env::with_var(DEFAULT_MAX_ITERATIONS_ENV, Some("0"), || {
            assert!(EngineConfig::from_env().is_err());
        });
    }
}
