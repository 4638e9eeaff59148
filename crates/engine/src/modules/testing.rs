//! `testing` module: runs a project's test command.
//!
//! A test suite that runs and fails is still a successful step: the outcome
//! carries `passed: false` so workflows can branch on it. Only a command that
//! cannot be spawned or overruns its timeout fails the step.

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio::process::Command;

use super::{number_input, string_input};
use crate::executor::{ActionContext, StepOutcome};
use crate::registry::{ActionCapability, ActionHandler, ModuleDefinition};

pub const DEFAULT_TEST_TIMEOUT_MS: u64 = 60_000;

pub fn module() -> ModuleDefinition {
    ModuleDefinition::new("testing", ActionCapability::Testing)
        .with_version("1.0.0")
        .with_description("Runs test suites through the shell")
        .with_action("run-tests", Arc::new(RunTestsAction))
}

/// Inputs: `testCommand` (or `command`), optional `cwd`, optional `timeout` in ms.
pub struct RunTestsAction;

#[async_trait]
impl ActionHandler for RunTestsAction {
    async fn invoke(&self, inputs: Map<String, Value>, context: ActionContext) -> StepOutcome {
        let Some(test_command) = string_input(&inputs, "testCommand").or_else(|| string_input(&inputs, "command")) else {
            return StepOutcome::failure("run-tests requires a 'testCommand' input");
        };
        let timeout_ms = number_input(&inputs, "timeout")
            .filter(|timeout| timeout.is_finite() && *timeout > 0.0)
            .map(|timeout| timeout as u64)
            .unwrap_or(DEFAULT_TEST_TIMEOUT_MS);

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(test_command)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(cwd) = string_input(&inputs, "cwd") {
            command.current_dir(cwd);
        }

        context.logger.info(&format!("running tests: {test_command}"));
        let started = Instant::now();
        let output = match tokio::time::timeout(Duration::from_millis(timeout_ms), command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(error)) => return StepOutcome::failure(format!("failed to spawn test command: {error}")),
            Err(_) => {
                return StepOutcome::failure_with_outputs(
                    format!("test command timed out after {timeout_ms}ms"),
                    json!({
                        "passed": false,
                        "timedOut": true,
                        "command": test_command,
                    }),
                );
            }
        };
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let passed = output.status.success();
        let exit_code = output.status.code();
        if passed {
            context.logger.info(&format!("tests passed in {duration_ms}ms"));
        } else {
            context.logger.warn(&format!("tests failed with exit code {exit_code:?}"));
        }

        StepOutcome::success(json!({
            "passed": passed,
            "exitCode": exit_code,
            "output": format!("{stdout}{stderr}"),
            "durationMs": duration_ms,
            "command": test_command,
        }))
    }
}
