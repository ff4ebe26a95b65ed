//! Test: Matrix Expansion - configurations, names and matrix environment

use crate::helpers::*;
use matrixci::core::trigger::TriggerEvent;
use matrixci::execution::SchedulingStrategy;

#[test]
fn test_demo_expands_six_configurations() {
    let plan = plan(PYTHON_WORKFLOW, &TriggerEvent::push("master"));

    let names: Vec<&str> = plan.runs.iter().map(|r| r.name()).collect();
    assert_eq!(
        names,
        vec![
            "py3.7 / torch 1.9.0",
            "py3.7 / torch 1.9.1",
            "py3.8 / torch 1.9.0",
            "py3.8 / torch 1.9.1",
            "py3.9 / torch 1.9.0",
            "py3.9 / torch 1.9.1",
        ]
    );
}

#[tokio::test]
async fn test_every_configuration_runs_its_own_steps() {
    let result = run_workflow(PYTHON_WORKFLOW, TriggerEvent::push("master"), MockRunner::new()).await;

    assert_workflow_completed(&result);
    assert_eq!(result.count_commands("make install-test"), 6);
    assert_eq!(result.count_commands("pip install torch==1.9.0"), 3);
    assert_eq!(result.count_commands("pip install torch==1.9.1"), 3);
    assert_eq!(result.plan.state.completed_runs, 6);
    assert_eq!(result.plan.state.progress(), 1.0);
}

#[tokio::test]
async fn test_matrix_values_are_exported_to_the_environment() {
    let result = run_workflow(PYTHON_WORKFLOW, TriggerEvent::push("master"), MockRunner::new()).await;

    let torch_installs: Vec<_> = result
        .commands
        .iter()
        .filter(|c| c.command.starts_with("pip install torch"))
        .collect();
    assert_eq!(torch_installs.len(), 6);
    for spec in torch_installs {
        let version = spec.env.get("MATRIX_PYTORCH_VERSION").unwrap();
        assert_eq!(spec.command, format!("pip install torch=={}", version));
        assert!(spec.env.contains_key("MATRIX_PYTHON_VERSION"));
        assert_eq!(spec.env.get("USING_COVERAGE").map(String::as_str), Some("3.7,3.9"));
    }
}

#[tokio::test]
async fn test_include_and_exclude() {
    let yaml = r#"
name: "Matrix"
on:
  push:
    branches: ["*"]
strategy:
  matrix:
    python-version: ["3.7", "3.8"]
    pytorch-version: ["1.9.0", "1.9.1"]
    exclude:
      - python-version: "3.7"
        pytorch-version: "1.9.1"
    include:
      - python-version: "3.10"
        pytorch-version: "1.12.0"
steps:
  - name: Test
    run: echo {{ matrix.python-version }}-{{ matrix.pytorch-version }}
"#;
    let result = run_workflow(yaml, TriggerEvent::push("main"), MockRunner::new()).await;

    assert_workflow_completed(&result);
    assert_eq!(
        result.command_lines(),
        vec!["echo 3.7-1.9.0", "echo 3.8-1.9.0", "echo 3.8-1.9.1", "echo 3.10-1.12.0"]
    );
}

#[tokio::test]
async fn test_selected_configurations_only() {
    let mut plan = plan(PYTHON_WORKFLOW, &TriggerEvent::push("master"));
    plan.select_runs(&[("python-version".to_string(), "3.8".to_string())]);
    assert_eq!(plan.runs.len(), 2);

    let result = run_plan(plan, MockRunner::new(), SchedulingStrategy::Parallel).await;

    assert_workflow_completed(&result);
    assert_eq!(result.count_commands("make install-test"), 2);
    // 3.8 is not a coverage version, so nothing to upload or finalize
    assert_eq!(result.count_commands("coveralls"), 0);
}
