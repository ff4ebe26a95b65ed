//! Test: Coverage Join - flagged uploads and a single parallel finalization

use crate::helpers::*;
use matrixci::core::config::{ConfigError, WorkflowConfig};
use matrixci::core::coverage::{CoverageOutcome, Finalization};
use matrixci::core::trigger::TriggerEvent;
use matrixci::core::StepState;
use matrixci::execution::{ExecutionEvent, SchedulingStrategy};
use std::time::Duration;

const UPLOAD: &str = "coveralls --service=github";
const FINISH: &str = "coveralls --service=github --finish";

fn uploads(result: &WorkflowTestResult) -> usize {
    result.commands.iter().filter(|c| c.command == UPLOAD).count()
}

#[test]
fn test_flagged_exactly_for_coverage_versions() {
    let plan = plan(PYTHON_WORKFLOW, &TriggerEvent::push("master"));

    for run in &plan.runs {
        let python = run.configuration.get("python-version").unwrap();
        assert_eq!(
            run.is_flagged(),
            python == "3.7" || python == "3.9",
            "{} flagged={}",
            run.name(),
            run.is_flagged()
        );
    }
}

#[tokio::test]
async fn test_uploads_then_finalizes_once() {
    let result = run_workflow(PYTHON_WORKFLOW, TriggerEvent::push("master"), MockRunner::new()).await;

    assert_workflow_completed(&result);
    assert_eq!(uploads(&result), 4);
    assert_eq!(result.count_commands(FINISH), 1);
    assert_eq!(result.command_lines().last(), Some(&FINISH));

    let flags: Vec<&str> = result
        .commands
        .iter()
        .filter(|c| c.command == UPLOAD)
        .map(|c| c.env.get("COVERALLS_FLAG_NAME").unwrap().as_str())
        .collect();
    assert_eq!(flags, vec!["run-3.7-1.9.0", "run-3.7-1.9.1", "run-3.9-1.9.0", "run-3.9-1.9.1"]);

    for upload in result.commands.iter().filter(|c| c.command == UPLOAD) {
        assert_eq!(upload.env.get("COVERALLS_PARALLEL").map(String::as_str), Some("true"));
        assert_eq!(upload.env.get("GITHUB_TOKEN").map(String::as_str), Some(TOKEN));
    }

    let report = result.plan.coverage_report.as_ref().unwrap();
    assert_eq!(report.flagged, 4);
    assert_eq!(report.uploaded(), 4);
    assert_eq!(report.finalization, Finalization::Finalized);
}

#[tokio::test]
async fn test_parallel_runs_finalize_after_the_last_upload() {
    let plan = plan(PYTHON_WORKFLOW, &TriggerEvent::push("master"));
    let runner = MockRunner::new().with_delay(Duration::from_millis(5));
    let result = run_plan(plan, runner, SchedulingStrategy::Parallel).await;

    assert_workflow_completed(&result);
    assert_eq!(result.count_commands(FINISH), 1);

    let lines = result.command_lines();
    let finish_at = lines.iter().position(|c| *c == FINISH).unwrap();
    let last_upload = lines.iter().rposition(|c| *c == UPLOAD).unwrap();
    assert!(finish_at > last_upload, "finish ran before every upload: {:?}", lines);

    let finalized = result
        .events
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::CoverageFinalized { .. }))
        .count();
    assert_eq!(finalized, 1);
}

#[tokio::test]
async fn test_failed_upload_still_finalizes_the_others() {
    let yaml = PYTHON_WORKFLOW.replace(
        "upload: coveralls --service=github",
        "upload: coveralls --service=github --flag {{ matrix.python-version }}",
    );
    let runner = MockRunner::new().failing("--flag 3.9", 1);
    let result = run_workflow(&yaml, TriggerEvent::push("master"), runner).await;

    assert_workflow_failed(&result);
    assert_eq!(result.count_commands(FINISH), 1);

    let report = result.plan.coverage_report.as_ref().unwrap();
    assert_eq!(report.uploaded(), 2);
    assert!(matches!(
        report.outcome("run-3.9-1.9.0"),
        Some(CoverageOutcome::Failed { .. })
    ));
    assert_eq!(report.finalization, Finalization::Finalized);
}

#[tokio::test]
async fn test_nothing_uploaded_skips_finalization() {
    let runner = MockRunner::new().failing("make install-test", 2);
    let result = run_workflow(PYTHON_WORKFLOW, TriggerEvent::push("master"), runner).await;

    assert_workflow_failed(&result);
    assert_eq!(uploads(&result), 0);
    assert_eq!(result.count_commands(FINISH), 0);

    let report = result.plan.coverage_report.as_ref().unwrap();
    assert_eq!(report.outcomes.len(), 4);
    assert!(report
        .outcomes
        .values()
        .all(|o| matches!(o.outcome, CoverageOutcome::Skipped { .. })));
    assert_eq!(report.finalization, Finalization::Skipped);
}

#[tokio::test]
async fn test_failed_finalization_fails_the_workflow() {
    let runner = MockRunner::new().failing("--finish", 1);
    let result = run_workflow(PYTHON_WORKFLOW, TriggerEvent::push("master"), runner).await;

    assert_workflow_failed(&result);
    assert_eq!(result.plan.state.failed_runs, 0);
    let report = result.plan.coverage_report.as_ref().unwrap();
    assert!(matches!(report.finalization, Finalization::Failed(_)));
}

#[tokio::test]
async fn test_token_is_masked_in_captured_output() {
    let yaml = r#"
name: "Masking"
on:
  push:
    branches: ["*"]
strategy:
  matrix:
    python-version: ["3.7"]
steps:
  - name: Test
    run: make test
coverage:
  axis: python-version
  using: ["3.7"]
  upload: coveralls --repo-token {{ env.GITHUB_TOKEN }}
"#;
    let result = run_workflow(yaml, TriggerEvent::push("main"), MockRunner::new()).await;

    assert_workflow_completed(&result);
    let run = &result.plan.runs[0];
    match result.step_state(run.name(), "coverage-upload") {
        StepState::Completed { output, .. } => {
            assert_eq!(output, "ran: coveralls --repo-token ***");
        }
        other => panic!("upload should complete, got {:?}", other),
    }

    // Not parallel: nothing to finalize
    let report = result.plan.coverage_report.as_ref().unwrap();
    assert_eq!(report.finalization, Finalization::NotRequired);
}

#[tokio::test]
async fn test_token_is_masked_in_unflagged_configurations() {
    let yaml = r#"
name: "Masking"
on:
  push:
    branches: ["*"]
strategy:
  matrix:
    python-version: ["3.7", "3.8"]
steps:
  - name: Leak
    run: echo {{ env.GITHUB_TOKEN }}
coverage:
  axis: python-version
  using: ["3.7"]
  upload: coveralls
"#;
    let result = run_workflow(yaml, TriggerEvent::push("main"), MockRunner::new()).await;

    assert_workflow_completed(&result);
    for run in &result.plan.runs {
        match result.step_state(run.name(), "Leak") {
            StepState::Completed { output, .. } => {
                assert_eq!(output, "ran: echo ***", "{}", run.name());
            }
            other => panic!("step should complete, got {:?}", other),
        }
    }
    assert!(!result.events.iter().any(|e| format!("{:?}", e).contains(TOKEN)));
}

#[test]
fn test_flag_name_missing_an_axis_is_rejected() {
    let yaml = PYTHON_WORKFLOW.replace(
        "run-{{ matrix.python-version }}-{{ matrix.pytorch-version }}",
        "run-{{ matrix.python-version }}",
    );
    assert_ne!(yaml, PYTHON_WORKFLOW);

    match WorkflowConfig::from_yaml(&yaml) {
        Err(ConfigError::Coverage(message)) => assert!(message.contains("flag name"), "{}", message),
        other => panic!("expected a coverage error, got {:?}", other.map(|c| c.name)),
    }
}
