//! Test: Failure Isolation - short-circuiting within a configuration only

use crate::helpers::*;
use matrixci::core::trigger::TriggerEvent;
use matrixci::core::{ExecutionStatus, StepState};
use matrixci::execution::{EngineError, ExecutionEngine, SchedulingStrategy};

#[tokio::test]
async fn test_failing_step_short_circuits_its_configuration_only() {
    let runner = MockRunner::new().failing("torch==1.9.1", 1);
    let result = run_workflow(PYTHON_WORKFLOW, TriggerEvent::push("master"), runner).await;

    assert_workflow_failed(&result);
    assert_eq!(result.plan.count_runs(), (3, 3, 0));

    let broken = "py3.8 / torch 1.9.1";
    assert_eq!(result.run(broken).status, ExecutionStatus::Failed);
    assert_execution_order(&result, broken, &["Upgrade pip", "Install PyTorch"]);
    assert_step_skipped(&result, broken, "install");
    assert_step_skipped(&result, broken, "test");
    match result.step_state(broken, "install-torch") {
        StepState::Failed { exit_code, .. } => assert_eq!(*exit_code, Some(1)),
        other => panic!("expected failure, got {:?}", other),
    }

    let healthy = "py3.8 / torch 1.9.0";
    assert_eq!(result.run(healthy).status, ExecutionStatus::Completed);
    assert_execution_order(
        &result,
        healthy,
        &["Upgrade pip", "Install PyTorch", "Install test dependencies", "Run test"],
    );
}

#[tokio::test]
async fn test_failure_and_always_guards_run_after_a_failure() {
    let yaml = r#"
name: "Cleanup"
on:
  push:
    branches: ["*"]
strategy:
  matrix:
    python-version: ["3.7", "3.8"]
steps:
  - name: Test
    run: make test PY={{ matrix.python-version }}
  - name: Lint
    run: make lint
  - name: Report failure
    if: failure()
    run: echo failed on {{ matrix.python-version }}
  - name: Cleanup
    if: always()
    run: make clean
"#;
    let runner = MockRunner::new().failing("PY=3.8", 2);
    let result = run_workflow(yaml, TriggerEvent::push("main"), runner).await;

    assert_workflow_failed(&result);
    assert_execution_order(&result, "Cleanup (python-version=3.7)", &["Test", "Lint", "Cleanup"]);
    assert_execution_order(&result, "Cleanup (python-version=3.8)", &["Test", "Report failure", "Cleanup"]);
    assert_step_skipped(&result, "Cleanup (python-version=3.8)", "Lint");
    assert_eq!(result.count_commands("make clean"), 2);
}

#[tokio::test]
async fn test_fail_fast_cancels_configurations_not_started() {
    let yaml = PYTHON_WORKFLOW.replace("fail_fast: false", "fail_fast: true");
    let runner = MockRunner::new().failing("torch==1.9.0", 1);
    let result = run_workflow(&yaml, TriggerEvent::push("master"), runner).await;

    assert_workflow_failed(&result);
    assert_eq!(result.plan.count_runs(), (0, 1, 5));
    assert_eq!(result.count_commands("pip install torch"), 1);
    for run in result.plan.runs.iter().skip(1) {
        assert_eq!(run.status, ExecutionStatus::Cancelled, "{}", run.name());
        assert!(run.executed_steps().is_empty());
    }
    assert_eq!(result.count_commands("--finish"), 0);
}

#[tokio::test]
async fn test_without_fail_fast_every_configuration_runs() {
    let runner = MockRunner::new().failing("torch==1.9.0", 1);
    let plan = plan(PYTHON_WORKFLOW, &TriggerEvent::push("master"));
    let result = run_plan(plan, runner, SchedulingStrategy::LimitedParallel(2)).await;

    assert_workflow_failed(&result);
    assert_eq!(result.plan.count_runs(), (3, 3, 0));
    assert_eq!(result.count_commands("pip install torch"), 6);
}

#[tokio::test]
async fn test_crashed_task_keeps_the_other_configurations() {
    let runner = MockRunner::new().panicking("torch==1.9.1");
    let mut plan = plan(PYTHON_WORKFLOW, &TriggerEvent::push("master"));
    let engine = ExecutionEngine::new(runner, SchedulingStrategy::Parallel);

    let err = engine.execute(&mut plan).await.unwrap_err();
    assert!(matches!(err, EngineError::Join(_)));

    assert_eq!(plan.runs.len(), 3);
    assert!(plan
        .runs
        .iter()
        .all(|r| r.status == ExecutionStatus::Completed && r.name().ends_with("1.9.0")));
    assert_eq!(plan.state.status, ExecutionStatus::Failed);
    assert_eq!(plan.state.completed_runs, 3);
}
