//! CLI command definitions

use crate::core::trigger::TriggerEvent;
use crate::execution::SchedulingStrategy;
use clap::Args;

/// Event kinds accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum EventArg {
    Push,
    PullRequest,
}

/// Build the trigger event from `--event` and `--branch`
pub fn trigger_event(event: EventArg, branch: &str) -> TriggerEvent {
    match event {
        EventArg::Push => TriggerEvent::push(branch),
        EventArg::PullRequest => TriggerEvent::pull_request(branch),
    }
}

/// Run a workflow
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to workflow YAML file
    #[arg(short, long)]
    pub file: String,

    /// Event that triggers the run
    #[arg(long, value_enum, default_value_t = EventArg::Push)]
    pub event: EventArg,

    /// Pushed branch, or pull request target branch
    #[arg(short, long, default_value = "master")]
    pub branch: String,

    /// Scheduling strategy for matrix configurations
    #[arg(long, value_enum, default_value_t = SchedulingStrategyArg::Sequential)]
    pub strategy: SchedulingStrategyArg,

    /// Only run configurations matching axis=value (repeatable)
    #[arg(long, value_parser = parse_key_value)]
    pub only: Vec<(String, String)>,

    /// Run commands through `bash -e -o pipefail` instead of `sh`
    #[arg(long)]
    pub bash: bool,

    /// Don't save execution to history
    #[arg(long)]
    pub no_history: bool,

    /// Print the plan without executing anything
    #[arg(long)]
    pub dry_run: bool,
}

impl RunCommand {
    pub fn trigger_event(&self) -> TriggerEvent {
        trigger_event(self.event, &self.branch)
    }
}

/// Validate a workflow file
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to workflow YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show what an event would run
#[derive(Debug, Args, Clone)]
pub struct PlanCommand {
    /// Path to workflow YAML file
    #[arg(short, long)]
    pub file: String,

    #[arg(long, value_enum, default_value_t = EventArg::Push)]
    pub event: EventArg,

    #[arg(short, long, default_value = "master")]
    pub branch: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

impl PlanCommand {
    pub fn trigger_event(&self) -> TriggerEvent {
        trigger_event(self.event, &self.branch)
    }
}

/// List workflows with recorded executions
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Show execution counts
    #[arg(long)]
    pub with_counts: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show execution history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Workflow name to filter by
    #[arg(short, long)]
    pub workflow: Option<String>,

    /// Number of recent executions to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show per-configuration outcomes
    #[arg(long)]
    pub detailed: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a specific execution ID
    #[arg(long)]
    pub execution_id: Option<String>,
}

/// Scheduling strategy argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SchedulingStrategyArg {
    Sequential,
    Parallel,
    #[clap(name = "parallel-limited")]
    ParallelLimited,
}

impl From<SchedulingStrategyArg> for SchedulingStrategy {
    fn from(arg: SchedulingStrategyArg) -> Self {
        match arg {
            SchedulingStrategyArg::Sequential => SchedulingStrategy::Sequential,
            SchedulingStrategyArg::Parallel => SchedulingStrategy::Parallel,
            SchedulingStrategyArg::ParallelLimited => SchedulingStrategy::LimitedParallel(4),
        }
    }
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
