//! Workflow domain model and execution plan

use crate::core::{
    config::{default_token_env, env_pairs, ConfigError, WorkflowConfig},
    context::RunContext,
    coverage::{CoverageOutcome, CoveragePlan, CoverageReport},
    gate::{Gate, GateVariant},
    matrix::{MatrixExpander, MatrixSpec, RunConfiguration},
    state::{ExecutionStatus, StepState, WorkflowState},
    step::{Step, StepDefaults, StepKind},
    trigger::{compile_patterns, BranchPattern, TriggerEvent, TriggerMatcher},
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// A loaded, validated workflow
#[derive(Debug, Clone)]
pub struct Workflow {
    pub name: String,
    pub triggers: TriggerMatcher,
    pub gate: Option<Gate>,
    /// Workflow-level environment templates
    pub env: Vec<(String, String)>,
    pub steps: Vec<Step>,
    pub matrix: MatrixExpander,
    pub coverage: Option<CoveragePlan>,
    pub fail_fast: bool,
    pub max_parallel: Option<usize>,
    defaults: StepDefaults,
}

fn patterns(list: &[String]) -> Result<Vec<BranchPattern>, ConfigError> {
    compile_patterns(list).map_err(|source| ConfigError::Pattern {
        pattern: list.join(", "),
        source,
    })
}

/// Render the coverage flag name of a configuration
fn flag_name(plan: &CoveragePlan, configuration: &RunConfiguration, context: &RunContext) -> String {
    match &plan.flag_name {
        Some(template) => context.render(template),
        None => configuration.name.clone(),
    }
}

/// Every flagged configuration must upload under its own flag name
fn check_flag_names(
    plan: &CoveragePlan,
    matrix: &MatrixExpander,
    env: &[(String, String)],
) -> Result<(), ConfigError> {
    let event = TriggerEvent::push("");
    let mut seen: HashMap<String, String> = HashMap::new();
    for configuration in matrix.expand().iter().filter(|c| plan.is_flagged(c)) {
        let context = RunContext::new(&event, configuration, env, &HashMap::new());
        let flag = flag_name(plan, configuration, &context);
        if let Some(other) = seen.insert(flag.clone(), configuration.name.clone()) {
            return Err(ConfigError::Coverage(format!(
                "flag name '{}' is shared by '{}' and '{}'; include every matrix axis in coverage.flag_name",
                flag, other, configuration.name
            )));
        }
    }
    Ok(())
}

impl Workflow {
    /// Create a workflow from configuration
    pub fn from_config(config: &WorkflowConfig) -> Result<Self, ConfigError> {
        let defaults = StepDefaults {
            timeout_secs: config
                .defaults
                .timeout_secs
                .unwrap_or(StepDefaults::default().timeout_secs),
            working_directory: config.defaults.working_directory.clone(),
        };

        let triggers = TriggerMatcher::new(
            config.triggers.push.as_ref().map(|f| patterns(&f.branches)).transpose()?,
            config
                .triggers
                .pull_request
                .as_ref()
                .map(|f| patterns(&f.branches))
                .transpose()?,
        );

        let gate = config
            .gate
            .as_ref()
            .map(|g| patterns(&g.full_branches).map(Gate::new))
            .transpose()?;

        let spec = MatrixSpec::from_mapping(&config.strategy.matrix)?;
        let axes: Vec<String> = spec.axes.iter().map(|a| a.name.clone()).collect();

        let steps = config
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| Step::from_config(s, i, &defaults, &axes))
            .collect::<Result<Vec<_>, _>>()?;

        let coverage = match &config.coverage {
            Some(c) => {
                let axis = spec.axis(&c.axis).ok_or_else(|| {
                    ConfigError::Coverage(format!("axis '{}' is not part of the matrix", c.axis))
                })?;
                let using = config.coverage_values(c)?;
                if using.is_empty() {
                    return Err(ConfigError::Coverage(format!(
                        "no coverage values listed for axis '{}'",
                        axis.name
                    )));
                }
                Some(CoveragePlan {
                    axis: c.axis.clone(),
                    using,
                    flag_name: c.flag_name.clone(),
                    parallel: c.parallel,
                    upload: c.upload.clone(),
                    finish: c.finish.clone(),
                    token_env: c.token_env.clone(),
                })
            }
            None => None,
        };

        if config.strategy.max_parallel == Some(0) {
            return Err(ConfigError::Invalid("strategy.max_parallel must be at least 1".into()));
        }

        let env = env_pairs(&config.env, "workflow")?;
        let matrix = MatrixExpander::new(spec, config.name.clone(), config.strategy.name.clone());
        if let Some(plan) = &coverage {
            check_flag_names(plan, &matrix, &env)?;
        }

        Ok(Workflow {
            name: config.name.clone(),
            triggers,
            gate,
            env,
            steps,
            matrix,
            coverage,
            fail_fast: config.strategy.fail_fast,
            max_parallel: config.strategy.max_parallel,
            defaults,
        })
    }

    /// Whether the event starts this workflow
    pub fn should_run(&self, event: &TriggerEvent) -> bool {
        self.triggers.matches(event)
    }

    /// Plan the workflow against the current process environment
    pub fn plan(&self, event: &TriggerEvent) -> WorkflowPlan {
        let process_env: HashMap<String, String> = std::env::vars().collect();
        self.plan_with_env(event, &process_env)
    }

    /// Expand the matrix and lay out each configuration's steps
    pub fn plan_with_env(
        &self,
        event: &TriggerEvent,
        process_env: &HashMap<String, String>,
    ) -> WorkflowPlan {
        let variant = self.gate.as_ref().map(|g| g.select(event.branch()));
        let token_env = self
            .coverage
            .as_ref()
            .map_or_else(default_token_env, |c| c.token_env.clone());
        let token = process_env.get(&token_env).map(|t| (token_env, t.clone()));

        let runs = self
            .matrix
            .expand()
            .into_iter()
            .map(|configuration| {
                let mut context = RunContext::new(event, &configuration, &self.env, process_env);
                // Visible as env.* in every configuration, so mask it everywhere
                if let Some((_, value)) = &token {
                    context.add_secret(value.clone());
                }
                let mut steps: Vec<PlannedStep> = self
                    .steps
                    .iter()
                    .map(|s| PlannedStep::new(s.clone()))
                    .collect();

                let coverage_flag = match &self.coverage {
                    Some(plan) if plan.is_flagged(&configuration) => {
                        let flag = flag_name(plan, &configuration, &context);
                        if let Some((key, value)) = &token {
                            context.env.insert(key.clone(), value.clone());
                        }
                        steps.push(PlannedStep::new(Step::coverage_upload(plan, &flag, &self.defaults)));
                        Some(flag)
                    }
                    _ => None,
                };

                Run {
                    configuration,
                    context,
                    steps,
                    coverage_flag,
                    status: ExecutionStatus::Pending,
                    started_at: None,
                    completed_at: None,
                }
            })
            .collect();

        let finalize = self.coverage.as_ref().and_then(|plan| {
            let command = plan.finish.as_ref().filter(|_| plan.parallel)?;
            let mut context = RunContext::default();
            if let Some((key, value)) = &token {
                context.env.insert(key.clone(), value.clone());
                context.add_secret(value.clone());
            }
            Some(FinalizeTask {
                step: Step::coverage_finish(command, &self.defaults),
                context,
            })
        });

        WorkflowPlan {
            name: self.name.clone(),
            event: event.clone(),
            triggered: self.should_run(event),
            variant,
            runs,
            coverage: self.coverage.clone(),
            coverage_report: None,
            finalize,
            fail_fast: self.fail_fast,
            max_parallel: self.max_parallel,
            state: WorkflowState::new(),
        }
    }
}

/// A step together with its runtime state
#[derive(Debug, Clone)]
pub struct PlannedStep {
    pub step: Step,
    pub state: StepState,
}

impl PlannedStep {
    pub fn new(step: Step) -> Self {
        Self {
            step,
            state: StepState::Pending,
        }
    }
}

/// The coverage finish command and the environment it runs with
#[derive(Debug, Clone)]
pub struct FinalizeTask {
    pub step: Step,
    pub context: RunContext,
}

/// One matrix configuration and its ordered steps
#[derive(Debug, Clone)]
pub struct Run {
    pub configuration: RunConfiguration,
    pub context: RunContext,
    pub steps: Vec<PlannedStep>,
    /// Coverage flag name when this configuration uploads coverage
    pub coverage_flag: Option<String>,
    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn index(&self) -> usize {
        self.configuration.index
    }

    pub fn name(&self) -> &str {
        &self.configuration.name
    }

    pub fn step(&self, id: &str) -> Option<&PlannedStep> {
        self.steps.iter().find(|s| s.step.id == id || s.step.name == id)
    }

    pub fn is_flagged(&self) -> bool {
        self.coverage_flag.is_some()
    }

    pub fn start(&mut self) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn finish(&mut self, failed: bool) {
        self.status = if failed {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Completed
        };
        self.completed_at = Some(Utc::now());
    }

    /// Mark a configuration that never started
    pub fn cancel(&mut self, reason: &str) {
        self.status = ExecutionStatus::Cancelled;
        for planned in &mut self.steps {
            planned.state = StepState::Skipped {
                reason: reason.to_string(),
            };
        }
    }

    /// Names of steps that executed, in order
    pub fn executed_steps(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| matches!(s.state, StepState::Completed { .. } | StepState::Failed { .. }))
            .map(|s| s.step.name.as_str())
            .collect()
    }

    /// The coverage outcome implied by the upload step's final state
    pub fn coverage_outcome(&self) -> Option<CoverageOutcome> {
        self.coverage_flag.as_ref()?;
        let upload = self
            .steps
            .iter()
            .find(|s| s.step.kind == StepKind::CoverageUpload)?;
        Some(match &upload.state {
            StepState::Completed { .. } => CoverageOutcome::Uploaded,
            StepState::Failed { error, .. } => CoverageOutcome::Failed { error: error.clone() },
            StepState::Skipped { reason } => CoverageOutcome::Skipped { reason: reason.clone() },
            StepState::Pending | StepState::Running { .. } => CoverageOutcome::Skipped {
                reason: "upload did not run".to_string(),
            },
        })
    }
}

/// A workflow bound to one event: the unit the engine executes
#[derive(Debug, Clone)]
pub struct WorkflowPlan {
    pub name: String,
    pub event: TriggerEvent,
    /// Whether the trigger matched the event
    pub triggered: bool,
    /// Gate selection; `None` when the workflow has no gate
    pub variant: Option<GateVariant>,
    pub runs: Vec<Run>,
    pub coverage: Option<CoveragePlan>,
    pub coverage_report: Option<CoverageReport>,
    pub finalize: Option<FinalizeTask>,
    pub fail_fast: bool,
    pub max_parallel: Option<usize>,
    pub state: WorkflowState,
}

impl WorkflowPlan {
    pub fn run(&self, index: usize) -> Option<&Run> {
        self.runs.iter().find(|r| r.index() == index)
    }

    pub fn run_by_name(&self, name: &str) -> Option<&Run> {
        self.runs.iter().find(|r| r.name() == name)
    }

    /// Keep only the configurations matching every `axis=value` pair
    pub fn select_runs(&mut self, partial: &[(String, String)]) {
        let keep: Vec<usize> = MatrixExpander::select(
            &self.runs.iter().map(|r| r.configuration.clone()).collect::<Vec<_>>(),
            partial,
        )
        .iter()
        .map(|c| c.index)
        .collect();
        self.runs.retain(|r| keep.contains(&r.index()));
    }

    pub fn flagged_runs(&self) -> Vec<usize> {
        self.runs
            .iter()
            .filter(|r| r.is_flagged())
            .map(Run::index)
            .collect()
    }

    /// Counts of (completed, failed, cancelled) configurations
    pub fn count_runs(&self) -> (usize, usize, usize) {
        let count = |status: ExecutionStatus| self.runs.iter().filter(|r| r.status == status).count();
        (
            count(ExecutionStatus::Completed),
            count(ExecutionStatus::Failed),
            count(ExecutionStatus::Cancelled),
        )
    }

    pub fn has_failed(&self) -> bool {
        self.runs.iter().any(|r| r.status == ExecutionStatus::Failed)
            || self.coverage_report.as_ref().is_some_and(|r| r.is_failed())
    }
}
