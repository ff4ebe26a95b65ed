//! Workflow execution engine

pub mod engine;
pub mod executor;
pub mod scheduler;
pub mod shell;

pub use engine::{EngineError, ExecutionEngine, ExecutionEvent};
pub use executor::{StepExecutor, StepOutcome};
pub use scheduler::{RunScheduler, SchedulingStrategy};
pub use shell::{CommandOutput, CommandRunner, CommandSpec, RunnerError, ShellRunner};
