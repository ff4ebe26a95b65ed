//! Shell command runner - runs step commands as subprocesses

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Error types for command execution
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to spawn '{shell}': {message}")]
    Spawn { shell: String, message: String },

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// A fully rendered command ready to run
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub command: String,
    /// Overlay on top of the runner's own environment
    pub env: HashMap<String, String>,
    pub working_directory: Option<String>,
}

/// Captured result of a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout followed by stderr
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

/// Trait for command execution - allows for different implementations
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion and capture its output
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, RunnerError>;
}

/// Runs commands through `sh -c` (or another shell)
#[derive(Debug, Clone)]
pub struct ShellRunner {
    /// Shell executable
    shell: String,

    /// Arguments placed before the command string
    shell_args: Vec<String>,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new("sh".to_string(), vec!["-c".to_string()])
    }
}

impl ShellRunner {
    pub fn new(shell: String, shell_args: Vec<String>) -> Self {
        Self { shell, shell_args }
    }

    /// `bash -e -o pipefail -c`, matching hosted runners
    pub fn bash() -> Self {
        Self::new(
            "bash".to_string(),
            vec!["-e".into(), "-o".into(), "pipefail".into(), "-c".into()],
        )
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, RunnerError> {
        debug!("Spawning {} with command length: {}", self.shell, spec.command.len());

        let mut command = Command::new(&self.shell);
        command
            .args(&self.shell_args)
            .arg(&spec.command)
            .envs(&spec.env)
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_directory {
            command.current_dir(dir);
        }

        let output = command.output().await.map_err(|e| RunnerError::Spawn {
            shell: self.shell.clone(),
            message: e.to_string(),
        })?;

        let exit_code = output.status.code();
        if !output.status.success() {
            warn!("command exited with code {:?}", exit_code);
        }

        Ok(CommandOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
