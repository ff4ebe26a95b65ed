//! Test utilities for matrixci scenarios

use async_trait::async_trait;
use matrixci::core::config::WorkflowConfig;
use matrixci::core::trigger::TriggerEvent;
use matrixci::core::{ExecutionStatus, Run, StepState, WorkflowPlan};
use matrixci::execution::{
    CommandOutput, CommandRunner, CommandSpec, ExecutionEngine, ExecutionEvent, RunnerError,
    SchedulingStrategy,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// The sample workflow shipped in `demos/`
pub const PYTHON_WORKFLOW: &str = include_str!("../../demos/python-matrix.yml");

pub const TOKEN: &str = "ghs_test_token";

/// Mock runner: commands containing a scripted substring exit with its code,
/// everything else succeeds. Every command is recorded.
#[derive(Clone, Default)]
pub struct MockRunner {
    rules: Vec<(String, i32)>,
    panic_on: Option<String>,
    delay: Option<Duration>,
    log: Arc<Mutex<Vec<CommandSpec>>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail commands containing `pattern` with `exit_code`
    pub fn failing(mut self, pattern: &str, exit_code: i32) -> Self {
        self.rules.push((pattern.to_string(), exit_code));
        self
    }

    /// Panic inside the runner for commands containing `pattern`
    pub fn panicking(mut self, pattern: &str) -> Self {
        self.panic_on = Some(pattern.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Shared handle to the recorded commands
    pub fn log(&self) -> Arc<Mutex<Vec<CommandSpec>>> {
        self.log.clone()
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, RunnerError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.log.lock().unwrap().push(spec.clone());
        if let Some(pattern) = &self.panic_on {
            if spec.command.contains(pattern.as_str()) {
                panic!("runner crashed on {}", spec.command);
            }
        }

        let exit_code = self
            .rules
            .iter()
            .find(|(pattern, _)| spec.command.contains(pattern.as_str()))
            .map(|(_, code)| *code)
            .unwrap_or(0);

        Ok(CommandOutput {
            exit_code: Some(exit_code),
            stdout: format!("ran: {}", spec.command),
            stderr: if exit_code == 0 {
                String::new()
            } else {
                format!("exit {}", exit_code)
            },
        })
    }
}

/// Process environment handed to plans in tests
pub fn test_env() -> HashMap<String, String> {
    let mut env = HashMap::new();
    env.insert("GITHUB_TOKEN".to_string(), TOKEN.to_string());
    env
}

/// Load a workflow and plan it for an event
pub fn plan(yaml: &str, event: &TriggerEvent) -> WorkflowPlan {
    WorkflowConfig::from_yaml(yaml)
        .expect("workflow should parse")
        .to_workflow()
        .expect("workflow should build")
        .plan_with_env(event, &test_env())
}

/// Plan and run a workflow sequentially
pub async fn run_workflow(yaml: &str, event: TriggerEvent, runner: MockRunner) -> WorkflowTestResult {
    run_plan(plan(yaml, &event), runner, SchedulingStrategy::Sequential).await
}

/// Run an already planned workflow
pub async fn run_plan(
    mut plan: WorkflowPlan,
    runner: MockRunner,
    strategy: SchedulingStrategy,
) -> WorkflowTestResult {
    let log = runner.log();
    let events = Arc::new(Mutex::new(Vec::new()));

    let engine = ExecutionEngine::new(runner, strategy);
    let sink = events.clone();
    engine.add_event_handler(move |event| sink.lock().unwrap().push(event));

    let status = engine.execute(&mut plan).await.expect("engine should not abort");

    let commands = log.lock().unwrap().clone();
    let events = events.lock().unwrap().clone();
    WorkflowTestResult {
        plan,
        status,
        commands,
        events,
    }
}

/// Everything observable about one workflow execution
#[derive(Debug)]
pub struct WorkflowTestResult {
    pub plan: WorkflowPlan,
    pub status: ExecutionStatus,
    pub commands: Vec<CommandSpec>,
    pub events: Vec<ExecutionEvent>,
}

impl WorkflowTestResult {
    pub fn run(&self, name: &str) -> &Run {
        self.plan
            .run_by_name(name)
            .unwrap_or_else(|| panic!("no configuration named {}", name))
    }

    pub fn step_state(&self, run: &str, step: &str) -> &StepState {
        &self
            .run(run)
            .step(step)
            .unwrap_or_else(|| panic!("no step {} in {}", step, run))
            .state
    }

    /// Number of commands run that contain `pattern`
    pub fn count_commands(&self, pattern: &str) -> usize {
        self.commands.iter().filter(|c| c.command.contains(pattern)).count()
    }

    /// Commands in the order they ran
    pub fn command_lines(&self) -> Vec<&str> {
        self.commands.iter().map(|c| c.command.as_str()).collect()
    }
}

/// Assert the workflow completed successfully
pub fn assert_workflow_completed(result: &WorkflowTestResult) {
    assert_eq!(
        result.status,
        ExecutionStatus::Completed,
        "workflow should complete, got {:?}",
        result.status
    );
    assert_eq!(result.plan.state.status, ExecutionStatus::Completed);
}

pub fn assert_workflow_failed(result: &WorkflowTestResult) {
    assert_eq!(
        result.status,
        ExecutionStatus::Failed,
        "workflow should fail, got {:?}",
        result.status
    );
}

pub fn assert_step_executed(result: &WorkflowTestResult, run: &str, step: &str) {
    let state = result.step_state(run, step);
    assert!(
        matches!(state, StepState::Completed { .. } | StepState::Failed { .. }),
        "step {} in {} should have executed, got {:?}",
        step,
        run,
        state
    );
}

pub fn assert_step_skipped(result: &WorkflowTestResult, run: &str, step: &str) {
    let state = result.step_state(run, step);
    assert!(
        matches!(state, StepState::Skipped { .. }),
        "step {} in {} should be skipped, got {:?}",
        step,
        run,
        state
    );
}

/// Assert the steps that executed in a configuration, in order
pub fn assert_execution_order(result: &WorkflowTestResult, run: &str, expected: &[&str]) {
    assert_eq!(result.run(run).executed_steps(), expected, "execution order of {}", run);
}
