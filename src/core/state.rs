//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a workflow execution or of one configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Not started yet
    Pending,
    /// Currently running
    Running,
    /// Finished successfully
    Completed,
    /// At least one step (or configuration) failed
    Failed,
    /// Never started because fail-fast stopped the matrix
    Cancelled,
    /// The trigger did not match the event
    Skipped,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed
                | ExecutionStatus::Failed
                | ExecutionStatus::Cancelled
                | ExecutionStatus::Skipped
        )
    }
}

/// State of a single step within a configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StepState {
    /// Not reached yet
    Pending,
    /// Command is running
    Running {
        started_at: DateTime<Utc>,
    },
    /// Command exited with status zero
    Completed {
        output: String,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
    /// Non-zero exit, spawn failure or timeout
    Failed {
        error: String,
        exit_code: Option<i32>,
        output: String,
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
    },
    /// Guard, gate or an earlier failure kept the step from running
    Skipped {
        reason: String,
    },
}

impl StepState {
    /// Check if step is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepState::Completed { .. } | StepState::Failed { .. } | StepState::Skipped { .. }
        )
    }
}

/// Overall workflow execution state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Unique execution ID
    pub execution_id: Uuid,

    /// Current execution status
    pub status: ExecutionStatus,

    /// When execution started
    pub started_at: Option<DateTime<Utc>>,

    /// When execution completed/failed
    pub completed_at: Option<DateTime<Utc>>,

    /// Number of configurations in the matrix
    pub total_runs: usize,

    /// Number of configurations that passed
    pub completed_runs: usize,

    /// Number of configurations that failed
    pub failed_runs: usize,

    /// Number of configurations cancelled by fail-fast
    pub cancelled_runs: usize,
}

impl WorkflowState {
    pub fn new() -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            total_runs: 0,
            completed_runs: 0,
            failed_runs: 0,
            cancelled_runs: 0,
        }
    }

    /// Mark workflow as started
    pub fn start(&mut self, total_runs: usize) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
        self.total_runs = total_runs;
    }

    pub fn complete(&mut self) {
        self.status = ExecutionStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self) {
        self.status = ExecutionStatus::Failed;
        self.completed_at = Some(Utc::now());
    }

    /// Mark as skipped because the trigger did not match
    pub fn skip(&mut self) {
        let now = Utc::now();
        self.status = ExecutionStatus::Skipped;
        self.started_at = Some(now);
        self.completed_at = Some(now);
    }

    pub fn update_counts(&mut self, completed: usize, failed: usize, cancelled: usize) {
        self.completed_runs = completed;
        self.failed_runs = failed;
        self.cancelled_runs = cancelled;
    }

    /// Calculate progress (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_runs == 0 {
            return 0.0;
        }
        (self.completed_runs + self.failed_runs + self.cancelled_runs) as f64
            / self.total_runs as f64
    }
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self::new()
    }
}
