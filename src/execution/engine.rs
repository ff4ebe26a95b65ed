//! Main execution engine - runs every configuration of a workflow plan

use crate::{
    core::{
        coverage::{CoverageAggregator, CoverageOutcome, Finalization},
        gate::GateVariant,
        trigger::TriggerEvent,
        ExecutionStatus, FinalizeTask, Run, StepDecision, StepState, WorkflowPlan,
    },
    execution::{
        executor::{StepExecutor, StepOutcome},
        scheduler::{RunScheduler, SchedulingStrategy},
        shell::CommandRunner,
    },
};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events that can occur during workflow execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    WorkflowStarted {
        execution_id: Uuid,
        workflow_name: String,
        event: TriggerEvent,
        total_runs: usize,
    },
    WorkflowSkipped {
        execution_id: Uuid,
        reason: String,
    },
    RunStarted {
        run_index: usize,
        run_name: String,
    },
    StepStarted {
        run_name: String,
        step_name: String,
    },
    StepOutput {
        run_name: String,
        step_name: String,
        output: String,
    },
    StepCompleted {
        run_name: String,
        step_name: String,
    },
    StepFailed {
        run_name: String,
        step_name: String,
        error: String,
    },
    StepSkipped {
        run_name: String,
        step_name: String,
        reason: String,
    },
    RunCompleted {
        run_index: usize,
        run_name: String,
        status: ExecutionStatus,
    },
    CoverageReported {
        run_name: String,
        flag_name: String,
        outcome: CoverageOutcome,
    },
    CoverageFinalized {
        finalization: Finalization,
    },
    WorkflowCompleted {
        execution_id: Uuid,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("run task failed: {0}")]
    Join(String),
}

#[derive(Clone, Default)]
struct EventBus {
    handlers: Arc<Mutex<Vec<EventHandler>>>,
}

impl EventBus {
    fn add(&self, handler: EventHandler) {
        if let Ok(mut handlers) = self.handlers.lock() {
            handlers.push(handler);
        }
    }

    fn emit(&self, event: ExecutionEvent) {
        let handlers = match self.handlers.lock() {
            Ok(handlers) => handlers.clone(),
            Err(_) => return,
        };
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }
}

/// Everything a spawned configuration task needs
struct RunDriver<R> {
    executor: Arc<StepExecutor<R>>,
    events: EventBus,
    coverage: Arc<tokio::sync::Mutex<CoverageAggregator>>,
    finalize: Option<Arc<FinalizeTask>>,
    variant: Option<GateVariant>,
}

impl<R> Clone for RunDriver<R> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            events: self.events.clone(),
            coverage: self.coverage.clone(),
            finalize: self.finalize.clone(),
            variant: self.variant,
        }
    }
}

impl<R: CommandRunner + 'static> RunDriver<R> {
    /// Run one configuration's steps in order
    async fn execute_run(&self, mut run: Run) -> Run {
        let run_name = run.name().to_string();
        info!("Starting configuration: {}", run_name);
        run.start();
        self.events.emit(ExecutionEvent::RunStarted {
            run_index: run.index(),
            run_name: run_name.clone(),
        });

        let mut failed = false;
        for i in 0..run.steps.len() {
            let step_name = run.steps[i].step.name.clone();

            match run.steps[i].step.decide(&run.context, self.variant, failed) {
                StepDecision::Skip(reason) => {
                    info!("Skipping step {} in {}: {}", step_name, run_name, reason);
                    self.events.emit(ExecutionEvent::StepSkipped {
                        run_name: run_name.clone(),
                        step_name,
                        reason: reason.clone(),
                    });
                    run.steps[i].state = StepState::Skipped { reason };
                }
                StepDecision::Run => {
                    let started_at = Utc::now();
                    run.steps[i].state = StepState::Running { started_at };
                    self.events.emit(ExecutionEvent::StepStarted {
                        run_name: run_name.clone(),
                        step_name: step_name.clone(),
                    });

                    let outcome = self.executor.execute(&run.steps[i].step, &run.context).await;
                    run.steps[i].state = self.settle(&run_name, &step_name, started_at, outcome, &mut failed);
                }
            }
        }

        run.finish(failed);
        info!("Configuration {} finished: {:?}", run_name, run.status);
        self.events.emit(ExecutionEvent::RunCompleted {
            run_index: run.index(),
            run_name,
            status: run.status,
        });

        self.report_coverage(&run).await;
        run
    }

    fn settle(
        &self,
        run_name: &str,
        step_name: &str,
        started_at: chrono::DateTime<Utc>,
        outcome: StepOutcome,
        failed: &mut bool,
    ) -> StepState {
        match outcome {
            StepOutcome::Succeeded { output } => {
                if !output.is_empty() {
                    self.events.emit(ExecutionEvent::StepOutput {
                        run_name: run_name.to_string(),
                        step_name: step_name.to_string(),
                        output: output.clone(),
                    });
                }
                self.events.emit(ExecutionEvent::StepCompleted {
                    run_name: run_name.to_string(),
                    step_name: step_name.to_string(),
                });
                StepState::Completed {
                    output,
                    started_at,
                    completed_at: Utc::now(),
                }
            }
            StepOutcome::Failed { error, exit_code, output } => {
                *failed = true;
                if !output.is_empty() {
                    self.events.emit(ExecutionEvent::StepOutput {
                        run_name: run_name.to_string(),
                        step_name: step_name.to_string(),
                        output: output.clone(),
                    });
                }
                self.events.emit(ExecutionEvent::StepFailed {
                    run_name: run_name.to_string(),
                    step_name: step_name.to_string(),
                    error: error.clone(),
                });
                StepState::Failed {
                    error,
                    exit_code,
                    output,
                    started_at,
                    failed_at: Utc::now(),
                }
            }
        }
    }

    /// Hand a flagged configuration's outcome to the aggregator and
    /// finalize when it was the last one outstanding
    async fn report_coverage(&self, run: &Run) {
        let (Some(flag), Some(outcome)) = (run.coverage_flag.as_ref(), run.coverage_outcome()) else {
            return;
        };

        self.events.emit(ExecutionEvent::CoverageReported {
            run_name: run.name().to_string(),
            flag_name: flag.clone(),
            outcome: outcome.clone(),
        });

        let ready = {
            let mut aggregator = self.coverage.lock().await;
            let ready = aggregator.record(run.index(), flag, outcome);
            if !ready && aggregator.all_reported() {
                let finalization = aggregator.report().finalization;
                if finalization == Finalization::Skipped {
                    warn!("No coverage was uploaded; skipping finalization");
                    self.events.emit(ExecutionEvent::CoverageFinalized { finalization });
                }
            }
            ready
        };

        if ready {
            self.finalize_coverage().await;
        }
    }

    async fn finalize_coverage(&self) {
        let Some(task) = &self.finalize else {
            return;
        };

        info!("All flagged configurations reported; finalizing coverage");
        let result = match self.executor.execute(&task.step, &task.context).await {
            StepOutcome::Succeeded { .. } => Ok(()),
            StepOutcome::Failed { error, .. } => Err(error),
        };

        let finalization = {
            let mut aggregator = self.coverage.lock().await;
            aggregator.finish(result);
            aggregator.report().finalization
        };
        self.events.emit(ExecutionEvent::CoverageFinalized { finalization });
    }
}

/// Main workflow execution engine
pub struct ExecutionEngine<R> {
    executor: Arc<StepExecutor<R>>,
    strategy: SchedulingStrategy,
    events: EventBus,
}

impl<R: CommandRunner + 'static> ExecutionEngine<R> {
    pub fn new(runner: R, strategy: SchedulingStrategy) -> Self {
        Self {
            executor: Arc::new(StepExecutor::new(runner)),
            strategy,
            events: EventBus::default(),
        }
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.events.add(Arc::new(handler));
    }

    /// Execute every configuration of the plan.
    ///
    /// Configurations are isolated: a failing step stops only its own
    /// configuration (unless fail-fast is enabled, which cancels the
    /// configurations that have not started).
    pub async fn execute(&self, plan: &mut WorkflowPlan) -> Result<ExecutionStatus, EngineError> {
        let execution_id = plan.state.execution_id;
        info!("Starting workflow execution: {} ({})", plan.name, execution_id);
        self.events.emit(ExecutionEvent::WorkflowStarted {
            execution_id,
            workflow_name: plan.name.clone(),
            event: plan.event.clone(),
            total_runs: plan.runs.len(),
        });

        if !plan.triggered {
            let reason = format!("{} does not match the workflow triggers", plan.event);
            info!("Skipping workflow {}: {}", plan.name, reason);
            plan.state.skip();
            self.events.emit(ExecutionEvent::WorkflowSkipped { execution_id, reason });
            self.events.emit(ExecutionEvent::WorkflowCompleted {
                execution_id,
                status: ExecutionStatus::Skipped,
            });
            return Ok(ExecutionStatus::Skipped);
        }

        plan.state.start(plan.runs.len());

        let finalize = plan.finalize.clone().map(Arc::new);
        let parallel_join = plan.coverage.as_ref().is_some_and(|c| c.parallel) && finalize.is_some();
        let driver = RunDriver {
            executor: self.executor.clone(),
            events: self.events.clone(),
            coverage: Arc::new(tokio::sync::Mutex::new(CoverageAggregator::new(
                parallel_join,
                plan.flagged_runs(),
            ))),
            finalize,
            variant: plan.variant,
        };

        let scheduler = RunScheduler::new(self.strategy, plan.runs.len(), plan.max_parallel, plan.fail_fast);
        let mut tasks = JoinSet::new();
        let mut finished = Vec::with_capacity(plan.runs.len());

        for mut run in std::mem::take(&mut plan.runs) {
            let Some(permit) = scheduler.acquire().await else {
                warn!("Cancelling configuration {} (fail-fast)", run.name());
                run.cancel("cancelled by fail-fast");
                self.events.emit(ExecutionEvent::RunCompleted {
                    run_index: run.index(),
                    run_name: run.name().to_string(),
                    status: run.status,
                });
                driver.report_coverage(&run).await;
                finished.push(run);
                continue;
            };

            let driver = driver.clone();
            let scheduler = scheduler.clone();
            tasks.spawn(async move {
                let run = driver.execute_run(run).await;
                scheduler.report(run.status == ExecutionStatus::Failed);
                drop(permit);
                run
            });
        }

        let mut join_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(run) => finished.push(run),
                Err(e) => {
                    error!("Configuration task failed: {}", e);
                    join_error.get_or_insert(EngineError::Join(e.to_string()));
                }
            }
        }

        finished.sort_by_key(Run::index);
        plan.runs = finished;

        if let Some(err) = join_error {
            let (completed, failed, cancelled) = plan.count_runs();
            plan.state.update_counts(completed, failed, cancelled);
            plan.state.fail();
            self.events.emit(ExecutionEvent::WorkflowCompleted {
                execution_id,
                status: ExecutionStatus::Failed,
            });
            return Err(err);
        }

        let (completed, failed, cancelled) = plan.count_runs();
        plan.state.update_counts(completed, failed, cancelled);
        if plan.coverage.is_some() {
            plan.coverage_report = Some(driver.coverage.lock().await.report());
        }

        let status = if plan.has_failed() {
            plan.state.fail();
            ExecutionStatus::Failed
        } else {
            plan.state.complete();
            ExecutionStatus::Completed
        };

        info!("Workflow execution finished: {} - {:?}", plan.name, status);
        self.events.emit(ExecutionEvent::WorkflowCompleted { execution_id, status });

        Ok(status)
    }
}
