//! matrixci - run CI workflows: triggers, build matrices, gated steps and coverage

pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;

// Re-export commonly used types
pub use core::config::{ConfigError, WorkflowConfig};
pub use core::trigger::TriggerEvent;
pub use core::{ExecutionStatus, Run, RunContext, Step, StepState, Workflow, WorkflowPlan};
pub use execution::{CommandRunner, ExecutionEngine, ExecutionEvent, SchedulingStrategy, ShellRunner};
