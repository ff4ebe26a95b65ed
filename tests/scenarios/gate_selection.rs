//! Test: Gate Selection - full tests on integration branches, light elsewhere

use crate::helpers::*;
use matrixci::core::config::{ConfigError, WorkflowConfig};
use matrixci::core::gate::GateVariant;
use matrixci::core::trigger::TriggerEvent;

#[tokio::test]
async fn test_master_runs_full_tests() {
    let result = run_workflow(PYTHON_WORKFLOW, TriggerEvent::push("master"), MockRunner::new()).await;

    assert_workflow_completed(&result);
    assert_eq!(result.plan.variant, Some(GateVariant::Full));
    for run in &result.plan.runs {
        assert_step_executed(&result, run.name(), "test");
        assert_step_skipped(&result, run.name(), "test-light");
    }
    assert_eq!(result.count_commands("make test-light"), 0);
    assert_eq!(result.count_commands("make test"), 6);
}

#[tokio::test]
async fn test_feature_branch_runs_light_tests() {
    let result = run_workflow(PYTHON_WORKFLOW, TriggerEvent::push("feature/faster-hbp"), MockRunner::new()).await;

    assert_workflow_completed(&result);
    assert_eq!(result.plan.variant, Some(GateVariant::Light));
    for run in &result.plan.runs {
        assert_step_skipped(&result, run.name(), "test");
        assert_step_executed(&result, run.name(), "test-light");
    }
    assert_eq!(result.count_commands("make test-light"), 6);
}

#[tokio::test]
async fn test_pull_request_gate_uses_target_branch() {
    let result = run_workflow(
        PYTHON_WORKFLOW,
        TriggerEvent::pull_request("development"),
        MockRunner::new(),
    )
    .await;

    assert_workflow_completed(&result);
    assert_eq!(result.plan.variant, Some(GateVariant::Full));
    assert_execution_order(
        &result,
        "py3.8 / torch 1.9.0",
        &["Upgrade pip", "Install PyTorch", "Install test dependencies", "Run test"],
    );
}

#[test]
fn test_exactly_one_variant_is_selected() {
    for branch in ["master", "development", "dev", "master-old", "release/1.0"] {
        let plan = plan(PYTHON_WORKFLOW, &TriggerEvent::push(branch));
        let run = &plan.runs[0];
        let selected: Vec<&str> = ["test", "test-light"]
            .into_iter()
            .filter(|id| {
                let step = &run.step(id).unwrap().step;
                step.decide(&run.context, plan.variant, false) == matrixci::core::StepDecision::Run
            })
            .collect();
        assert_eq!(selected.len(), 1, "branch {} selected {:?}", branch, selected);
    }
}

#[test]
fn test_inverted_containment_gate_is_rejected() {
    let yaml = r#"
name: "Inverted gate"
on:
  push:
    branches: ["*"]
strategy:
  matrix:
    python-version: ["3.7"]
steps:
  - name: Run light test
    if: contains(['master', 'development'], branch) != 1
    run: make test-light
"#;
    match WorkflowConfig::from_yaml(yaml) {
        Err(ConfigError::Guard { step, .. }) => assert_eq!(step, "Run light test"),
        other => panic!("expected a guard type error, got {:?}", other.map(|c| c.name)),
    }
}

#[tokio::test]
async fn test_explicit_guard_is_the_exact_negation() {
    let yaml = r#"
name: "Guards"
on:
  push:
    branches: ["*"]
strategy:
  matrix:
    python-version: ["3.7"]
steps:
  - name: Full
    if: contains(['master', 'development'], branch)
    run: make test
  - name: Light
    if: "!contains(['master', 'development'], branch)"
    run: make test-light
"#;
    let on_master = run_workflow(yaml, TriggerEvent::push("master"), MockRunner::new()).await;
    assert_eq!(on_master.command_lines(), vec!["make test"]);

    let elsewhere = run_workflow(yaml, TriggerEvent::push("topic"), MockRunner::new()).await;
    assert_eq!(elsewhere.command_lines(), vec!["make test-light"]);
}
