//! CLI output formatting

use crate::{
    core::{
        coverage::{CoverageOutcome, CoverageReport, FlagOutcome, Finalization},
        ExecutionStatus, StepDecision, StepState, WorkflowPlan,
    },
    execution::ExecutionEvent,
    persistence::ExecutionSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");

/// Create a progress bar over matrix configurations
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let bar_style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    progress.set_style(bar_style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// A horizontal rule spanning the terminal width
pub fn separator() -> String {
    let width = term_size::dimensions_stdout().map(|(w, _)| w).unwrap_or(80);
    "─".repeat(width)
}

/// Format a step state for display
pub fn format_step_state(state: &StepState) -> String {
    match state {
        StepState::Pending => style("PENDING").dim().to_string(),
        StepState::Running { .. } => style("RUNNING").yellow().to_string(),
        StepState::Completed { .. } => style("COMPLETED").green().to_string(),
        StepState::Failed { exit_code: Some(code), .. } => {
            style(format!("FAILED ({})", code)).red().to_string()
        }
        StepState::Failed { .. } => style("FAILED").red().to_string(),
        StepState::Skipped { .. } => style("SKIPPED").dim().to_string(),
    }
}

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Completed => style("COMPLETED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
        ExecutionStatus::Cancelled => style("CANCELLED").yellow().to_string(),
        ExecutionStatus::Skipped => style("SKIPPED").dim().to_string(),
    }
}

fn short_id(id: &uuid::Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

/// Format execution summary for display
pub fn format_execution_summary(summary: &ExecutionSummary) -> String {
    let status_icon = match summary.status {
        ExecutionStatus::Completed => CHECK,
        ExecutionStatus::Failed => CROSS,
        ExecutionStatus::Running => SPINNER,
        ExecutionStatus::Skipped => SKIP,
        _ => INFO,
    };

    format!(
        "{} {} - {} - {} - {} ({}/{} passed) - {}",
        status_icon,
        style(short_id(&summary.execution_id)).dim(),
        style(&summary.workflow_name).bold(),
        style(&summary.event).cyan(),
        format_status(summary.status),
        summary.completed_runs,
        summary.total_runs,
        style(format!("{:.0}%", summary.progress * 100.0)).cyan()
    )
}

/// Format the coverage report for display
pub fn format_coverage_report(report: &CoverageReport) -> String {
    let mut lines = vec![format!(
        "{} Coverage: {}/{} flagged configurations uploaded",
        INFO,
        report.uploaded(),
        report.flagged
    )];

    for FlagOutcome { flag_name: flag, outcome } in report.outcomes.values() {
        let line = match outcome {
            CoverageOutcome::Uploaded => format!("  {} {}", CHECK, style(flag).green()),
            CoverageOutcome::Failed { error } => {
                format!("  {} {}: {}", CROSS, style(flag).red(), style(error).dim())
            }
            CoverageOutcome::Skipped { reason } => {
                format!("  {} {}: {}", SKIP, style(flag).dim(), style(reason).dim())
            }
        };
        lines.push(line);
    }

    let finalization = match &report.finalization {
        Finalization::NotRequired => None,
        Finalization::Waiting | Finalization::InProgress => {
            Some(format!("  {} parallel build not finalized", WARN))
        }
        Finalization::Skipped => Some(format!("  {} nothing uploaded, finalization skipped", WARN)),
        Finalization::Finalized => Some(format!("  {} parallel build finalized", CHECK)),
        Finalization::Failed(e) => Some(format!("  {} finalization failed: {}", CROSS, e)),
    };
    lines.extend(finalization);

    lines.join("\n")
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::WorkflowStarted {
            execution_id,
            workflow_name,
            event,
            total_runs,
        } => format!(
            "{} Starting workflow {} for {} ({} configurations, {})",
            ROCKET,
            style(workflow_name).bold(),
            style(event).cyan(),
            total_runs,
            style(short_id(execution_id)).dim()
        ),
        ExecutionEvent::WorkflowSkipped { reason, .. } => {
            format!("{} Workflow not triggered: {}", SKIP, style(reason).dim())
        }
        ExecutionEvent::RunStarted { run_name, .. } => {
            format!("{} {}", SPINNER, style(run_name).bold())
        }
        ExecutionEvent::StepStarted { run_name, step_name } => {
            format!("  {} {} {}", SPINNER, style(run_name).dim(), style(step_name).cyan())
        }
        ExecutionEvent::StepOutput {
            run_name,
            step_name,
            output,
        } => format!(
            "  {} Output from {} / {}:\n{}",
            INFO,
            style(run_name).dim(),
            style(step_name).dim(),
            format_output(output, 40)
        ),
        ExecutionEvent::StepCompleted { run_name, step_name } => {
            format!("  {} {} {}", CHECK, style(run_name).dim(), style(step_name).green())
        }
        ExecutionEvent::StepFailed {
            run_name,
            step_name,
            error,
        } => format!(
            "  {} {} {}: {}",
            CROSS,
            style(run_name).dim(),
            style(step_name).red(),
            style(error).dim()
        ),
        ExecutionEvent::StepSkipped {
            run_name,
            step_name,
            reason,
        } => format!(
            "  {} {} {} ({})",
            SKIP,
            style(run_name).dim(),
            style(step_name).dim(),
            reason
        ),
        ExecutionEvent::RunCompleted { run_name, status, .. } => {
            format!("{} {} {}", INFO, style(run_name).bold(), format_status(*status))
        }
        ExecutionEvent::CoverageReported {
            run_name,
            flag_name,
            outcome,
        } => {
            let outcome = match outcome {
                CoverageOutcome::Uploaded => style("uploaded").green().to_string(),
                CoverageOutcome::Failed { error } => style(format!("failed: {}", error)).red().to_string(),
                CoverageOutcome::Skipped { reason } => style(format!("skipped: {}", reason)).dim().to_string(),
            };
            format!(
                "  {} coverage {} from {}: {}",
                INFO,
                style(flag_name).cyan(),
                style(run_name).dim(),
                outcome
            )
        }
        ExecutionEvent::CoverageFinalized { finalization } => match finalization {
            Finalization::Finalized => format!("{} Coverage parallel build finalized", CHECK),
            Finalization::Failed(e) => format!("{} Coverage finalization failed: {}", CROSS, e),
            other => format!("{} Coverage finalization: {:?}", WARN, other),
        },
        ExecutionEvent::WorkflowCompleted { execution_id, status } => {
            let status_str = match status {
                ExecutionStatus::Completed => format!("{} completed", style("successfully").green()),
                ExecutionStatus::Failed => style("failed").red().to_string(),
                ExecutionStatus::Skipped => style("skipped").dim().to_string(),
                _ => format!("{:?}", status),
            };
            format!(
                "{} Workflow ({}) {}",
                INFO,
                style(short_id(execution_id)).dim(),
                status_str
            )
        }
    }
}

/// Format step output with truncation
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
    } else {
        let truncated = lines[..max_lines].join("\n");
        format!(
            "{}\n{}... ({} more lines)",
            truncated,
            style("[truncated]").dim(),
            lines.len() - max_lines
        )
    }
}

/// Serializable view of a plan for `plan --json` and `run --dry-run`
#[derive(Debug, Serialize)]
pub struct PlanView {
    pub workflow: String,
    pub event: String,
    pub triggered: bool,
    pub variant: Option<String>,
    pub runs: Vec<RunView>,
}

#[derive(Debug, Serialize)]
pub struct RunView {
    pub index: usize,
    pub name: String,
    pub matrix: Vec<(String, String)>,
    pub coverage_flag: Option<String>,
    pub steps: Vec<StepView>,
}

#[derive(Debug, Serialize)]
pub struct StepView {
    pub name: String,
    pub command: String,
    /// `None` when the step would run on the success path
    pub skipped: Option<String>,
}

impl PlanView {
    /// Step decisions assume every earlier step succeeds
    pub fn new(plan: &WorkflowPlan) -> Self {
        let runs = plan
            .runs
            .iter()
            .map(|run| RunView {
                index: run.index(),
                name: run.name().to_string(),
                matrix: run.configuration.values.clone(),
                coverage_flag: run.coverage_flag.clone(),
                steps: run
                    .steps
                    .iter()
                    .map(|planned| StepView {
                        name: planned.step.name.clone(),
                        command: run.context.mask(&planned.step.render_command(&run.context)),
                        skipped: match planned.step.decide(&run.context, plan.variant, false) {
                            StepDecision::Run => None,
                            StepDecision::Skip(reason) => Some(reason),
                        },
                    })
                    .collect(),
            })
            .collect();

        Self {
            workflow: plan.name.clone(),
            event: plan.event.to_string(),
            triggered: plan.triggered,
            variant: plan.variant.map(|v| v.to_string()),
            runs,
        }
    }
}

/// Human-readable rendering of a plan
pub fn format_plan(view: &PlanView) -> String {
    let mut out = Vec::new();
    let trigger = if view.triggered {
        style("triggered").green().to_string()
    } else {
        style("not triggered").yellow().to_string()
    };
    out.push(format!(
        "{} {} for {}: {}",
        INFO,
        style(&view.workflow).bold(),
        style(&view.event).cyan(),
        trigger
    ));
    if let Some(variant) = &view.variant {
        out.push(format!("  gate: {} test", style(variant).bold()));
    }

    for run in &view.runs {
        out.push(separator());
        let flag = match &run.coverage_flag {
            Some(flag) => format!(" [coverage: {}]", style(flag).cyan()),
            None => String::new(),
        };
        out.push(format!("{} {}{}", style(run.index + 1).dim(), style(&run.name).bold(), flag));
        for step in &run.steps {
            match &step.skipped {
                None => out.push(format!("  {} {}: {}", CHECK, step.name, style(&step.command).dim())),
                Some(reason) => out.push(format!("  {} {} ({})", SKIP, style(&step.name).dim(), reason)),
            }
        }
    }

    out.join("\n")
}
