//! Step executor - runs individual steps through a command runner

use crate::{
    core::{RunContext, Step},
    execution::shell::{CommandRunner, CommandSpec},
};
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info};

/// Result of executing a step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Command exited with status zero
    Succeeded { output: String },
    /// Non-zero exit, spawn failure or timeout
    Failed {
        error: String,
        exit_code: Option<i32>,
        output: String,
    },
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Succeeded { .. })
    }
}

/// Executes a single step
pub struct StepExecutor<R> {
    runner: R,
}

impl<R: CommandRunner> StepExecutor<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Build the command spec for a step in a context
    pub fn command_spec(step: &Step, context: &RunContext) -> CommandSpec {
        CommandSpec {
            command: step.render_command(context),
            env: context.step_env(&step.env),
            working_directory: step.working_directory.as_ref().map(|d| context.render(d)),
        }
    }

    /// Execute a step and return the outcome; captured output is masked
    pub async fn execute(&self, step: &Step, context: &RunContext) -> StepOutcome {
        info!("Executing step: {}", step.name);

        let spec = Self::command_spec(step, context);
        debug!("Command for step {}: {}", step.id, context.mask(&spec.command));

        let timeout_duration = Duration::from_secs(step.timeout_secs);
        let output = match timeout(timeout_duration, self.runner.run(&spec)).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                error!("Runner error for step {}: {}", step.id, e);
                return StepOutcome::Failed {
                    error: e.to_string(),
                    exit_code: None,
                    output: String::new(),
                };
            }
            Err(_) => {
                error!("Timeout for step {} after {}s", step.id, step.timeout_secs);
                return StepOutcome::Failed {
                    error: format!("Timeout after {} seconds", step.timeout_secs),
                    exit_code: None,
                    output: String::new(),
                };
            }
        };

        let combined = context.mask(&output.combined());
        if output.success() {
            debug!("Step {} succeeded", step.id);
            StepOutcome::Succeeded { output: combined }
        } else {
            let error = match output.exit_code {
                Some(code) => format!("exited with code {}", code),
                None => "terminated by signal".to_string(),
            };
            error!("Step {} failed: {}", step.id, error);
            StepOutcome::Failed {
                error,
                exit_code: output.exit_code,
                output: combined,
            }
        }
    }
}
