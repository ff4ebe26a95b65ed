//! Persistence layer for workflow execution history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteExecutionStore;

pub use crate::core::ExecutionStatus;
use crate::core::WorkflowPlan;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Outcome of one matrix configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub name: String,
    pub status: ExecutionStatus,
}

/// Summary of a workflow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    /// Unique execution ID
    pub execution_id: Uuid,

    /// Workflow name
    pub workflow_name: String,

    /// The event the workflow ran for, e.g. `push to master`
    pub event: String,

    /// Execution status
    pub status: ExecutionStatus,

    /// When execution started
    pub started_at: DateTime<Utc>,

    /// When execution completed (if complete)
    pub completed_at: Option<DateTime<Utc>>,

    /// Progress (0.0 to 1.0)
    pub progress: f64,

    pub total_runs: usize,
    pub completed_runs: usize,
    pub failed_runs: usize,
    pub cancelled_runs: usize,

    /// Per-configuration outcomes, in matrix order
    pub runs: Vec<RunSummary>,
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save a workflow execution
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()>;

    /// Load an execution by ID
    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>>;

    /// List all executions for a workflow, newest first
    async fn list_executions(&self, workflow_name: &str) -> Result<Vec<ExecutionSummary>>;

    /// Most recent execution of a workflow
    async fn get_latest_execution(&self, workflow_name: &str) -> Result<Option<ExecutionSummary>> {
        Ok(self.list_executions(workflow_name).await?.into_iter().next())
    }

    async fn delete_execution(&self, execution_id: Uuid) -> Result<()>;

    /// List all workflow names
    async fn list_workflows(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or ephemeral use)
#[derive(Default)]
pub struct InMemoryPersistence {
    executions: RwLock<HashMap<Uuid, ExecutionSummary>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()> {
        let mut execs = self.executions.write().await;
        execs.insert(execution.execution_id, execution.clone());
        Ok(())
    }

    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>> {
        let execs = self.executions.read().await;
        Ok(execs.get(&execution_id).cloned())
    }

    async fn list_executions(&self, workflow_name: &str) -> Result<Vec<ExecutionSummary>> {
        let execs = self.executions.read().await;
        let mut result: Vec<ExecutionSummary> = execs
            .values()
            .filter(|e| e.workflow_name == workflow_name)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(result)
    }

    async fn delete_execution(&self, execution_id: Uuid) -> Result<()> {
        self.executions.write().await.remove(&execution_id);
        Ok(())
    }

    async fn list_workflows(&self) -> Result<Vec<String>> {
        let execs = self.executions.read().await;
        let mut names: Vec<String> = execs.values().map(|e| e.workflow_name.clone()).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

/// Create a summary from an executed plan
pub fn create_summary(plan: &WorkflowPlan) -> ExecutionSummary {
    ExecutionSummary {
        execution_id: plan.state.execution_id,
        workflow_name: plan.name.clone(),
        event: plan.event.to_string(),
        status: plan.state.status,
        started_at: plan.state.started_at.unwrap_or_else(Utc::now),
        completed_at: plan.state.completed_at,
        progress: plan.state.progress(),
        total_runs: plan.state.total_runs,
        completed_runs: plan.state.completed_runs,
        failed_runs: plan.state.failed_runs,
        cancelled_runs: plan.state.cancelled_runs,
        runs: plan
            .runs
            .iter()
            .map(|r| RunSummary {
                name: r.name().to_string(),
                status: r.status,
            })
            .collect(),
    }
}
