//! Test: Triggers - which events start the workflow

use crate::helpers::*;
use matrixci::core::trigger::TriggerEvent;
use matrixci::core::ExecutionStatus;
use matrixci::execution::ExecutionEvent;

#[tokio::test]
async fn test_push_to_any_branch_triggers() {
    for branch in ["master", "feature/nested/topic", "v2"] {
        let plan = plan(PYTHON_WORKFLOW, &TriggerEvent::push(branch));
        assert!(plan.triggered, "push to {} should trigger", branch);
    }
}

#[tokio::test]
async fn test_pull_request_only_into_allow_listed_branches() {
    assert!(plan(PYTHON_WORKFLOW, &TriggerEvent::pull_request("master")).triggered);
    assert!(plan(PYTHON_WORKFLOW, &TriggerEvent::pull_request("development")).triggered);

    let result = run_workflow(
        PYTHON_WORKFLOW,
        TriggerEvent::pull_request("release-1.0"),
        MockRunner::new(),
    )
    .await;

    assert_eq!(result.status, ExecutionStatus::Skipped);
    assert_eq!(result.plan.state.status, ExecutionStatus::Skipped);
    assert!(result.commands.is_empty());
    assert!(result
        .events
        .iter()
        .any(|e| matches!(e, ExecutionEvent::WorkflowSkipped { .. })));
}

#[tokio::test]
async fn test_missing_event_section_never_triggers() {
    let yaml = r#"
name: "Push only"
on:
  push:
    branches: [main, "release/*"]
strategy:
  matrix:
    python-version: ["3.9"]
steps:
  - name: Test
    run: make test
"#;
    assert!(plan(yaml, &TriggerEvent::push("main")).triggered);
    assert!(plan(yaml, &TriggerEvent::push("release/1.2")).triggered);
    assert!(!plan(yaml, &TriggerEvent::push("release/1.2/hotfix")).triggered);
    assert!(!plan(yaml, &TriggerEvent::pull_request("main")).triggered);

    let result = run_workflow(yaml, TriggerEvent::push("dev"), MockRunner::new()).await;
    assert_eq!(result.status, ExecutionStatus::Skipped);
    assert!(result.commands.is_empty());
}
