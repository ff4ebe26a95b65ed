use anyhow::{Context, Result};
use matrixci::cli::commands::{HistoryCommand, ListCommand, PlanCommand, RunCommand, ValidateCommand};
use matrixci::cli::output::*;
use matrixci::cli::{Cli, Command};
use matrixci::core::config::WorkflowConfig;
use matrixci::core::ExecutionStatus;
use matrixci::execution::{ExecutionEngine, ExecutionEvent, SchedulingStrategy, ShellRunner};
use matrixci::persistence::{create_summary, ExecutionSummary, InMemoryPersistence, PersistenceBackend};
use tracing::{error, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG overrides --verbose
    let log_level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set logging subscriber")?;

    let ok = match &cli.command {
        Command::Run(cmd) => run_workflow(cmd, cli.stream).await?,
        Command::Validate(cmd) => validate_workflow(cmd)?,
        Command::Plan(cmd) => plan_workflow(cmd)?,
        Command::List(cmd) => list_workflows(cmd).await?,
        Command::History(cmd) => show_history(cmd).await?,
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

/// Open the execution history store
async fn open_store() -> Result<Box<dyn PersistenceBackend>> {
    #[cfg(feature = "sqlite")]
    {
        let store = matrixci::persistence::SqliteExecutionStore::with_default_path()
            .await
            .context("Failed to open execution history")?;
        Ok(Box::new(store))
    }

    #[cfg(not(feature = "sqlite"))]
    {
        Ok(Box::new(InMemoryPersistence::new()))
    }
}

fn load_workflow(file: &str) -> Result<WorkflowConfig> {
    WorkflowConfig::from_file(file).with_context(|| format!("Failed to load workflow {}", file))
}

async fn run_workflow(cmd: &RunCommand, stream: bool) -> Result<bool> {
    let config = load_workflow(&cmd.file)?;
    println!("{} Loaded workflow: {}", INFO, style(&config.name).bold());
    for warning in config.lint() {
        println!("{} {}", WARN, style(warning).yellow());
    }

    let workflow = config.to_workflow()?;
    let event = cmd.trigger_event();
    let mut plan = workflow.plan(&event);

    if !cmd.only.is_empty() {
        plan.select_runs(&cmd.only);
        println!(
            "{} Running {} of {} configurations",
            INFO,
            style(plan.runs.len()).cyan(),
            workflow.matrix.expand().len()
        );
        if plan.runs.is_empty() {
            println!("{} No configuration matches the --only filter", WARN);
            return Ok(false);
        }
    }

    if cmd.dry_run {
        println!("{}", format_plan(&PlanView::new(&plan)));
        return Ok(true);
    }

    let store: Box<dyn PersistenceBackend> = if cmd.no_history {
        Box::new(InMemoryPersistence::new())
    } else {
        open_store().await?
    };

    let runner = if cmd.bash { ShellRunner::bash() } else { ShellRunner::default() };
    let strategy: SchedulingStrategy = cmd.strategy.into();
    let engine = ExecutionEngine::new(runner, strategy);

    let progress = create_progress_bar(plan.runs.len());
    let bar = progress.clone();
    engine.add_event_handler(move |event| {
        match &event {
            ExecutionEvent::StepOutput { .. } if !stream => return,
            ExecutionEvent::RunCompleted { .. } => bar.inc(1),
            _ => {}
        }
        bar.println(format_execution_event(&event));
    });

    let result = engine.execute(&mut plan).await;
    progress.finish_and_clear();

    let status = match result {
        Ok(status) => status,
        Err(e) => {
            error!("{}", e);
            println!("\n{} {} {}: {}", CROSS, style(&plan.name).bold(), style("aborted").red(), e);
            return Ok(false);
        }
    };

    if let Some(report) = &plan.coverage_report {
        println!("\n{}", format_coverage_report(report));
    }

    let summary = create_summary(&plan);
    store.save_execution(&summary).await?;
    if !cmd.no_history {
        println!(
            "\n{} Execution saved to history (ID: {})",
            INFO,
            style(&summary.execution_id.to_string()[..8]).dim()
        );
    }

    match status {
        ExecutionStatus::Completed => {
            println!(
                "\n{} {} completed {}",
                CHECK,
                style(&plan.name).bold(),
                style("successfully").green()
            );
            Ok(true)
        }
        ExecutionStatus::Skipped => {
            println!("\n{} {} was not triggered by {}", SKIP, style(&plan.name).bold(), event);
            Ok(true)
        }
        _ => {
            println!(
                "\n{} {} {} ({} of {} configurations failed)",
                CROSS,
                style(&plan.name).bold(),
                style("failed").red(),
                plan.state.failed_runs,
                plan.state.total_runs
            );
            Ok(false)
        }
    }
}

fn validate_workflow(cmd: &ValidateCommand) -> Result<bool> {
    println!("{} Validating workflow...", INFO);

    match WorkflowConfig::from_file(&cmd.file) {
        Ok(config) => {
            let workflow = config.to_workflow()?;
            println!("{} Workflow configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Configurations: {}", style(workflow.matrix.expand().len()).cyan());
            println!("  Steps: {}", style(config.steps.len()).cyan());
            if let Some(coverage) = &workflow.coverage {
                println!(
                    "  Coverage: {} in [{}]{}",
                    style(&coverage.axis).cyan(),
                    coverage.using.join(", "),
                    if coverage.parallel { " (parallel)" } else { "" }
                );
            }
            for warning in config.lint() {
                println!("{} {}", WARN, style(warning).yellow());
            }

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(true)
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(e).red());
            Ok(false)
        }
    }
}

fn plan_workflow(cmd: &PlanCommand) -> Result<bool> {
    let workflow = load_workflow(&cmd.file)?.to_workflow()?;
    let plan = workflow.plan(&cmd.trigger_event());
    let view = PlanView::new(&plan);

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        println!("{}", format_plan(&view));
    }
    Ok(true)
}

async fn list_workflows(cmd: &ListCommand) -> Result<bool> {
    let store = open_store().await?;
    let workflows = store.list_workflows().await?;

    if cmd.json {
        let mut json_data = Vec::new();
        for name in &workflows {
            let executions = store.list_executions(name).await?;
            json_data.push(serde_json::json!({
                "name": name,
                "execution_count": executions.len(),
            }));
        }
        let data = serde_json::json!({ "workflows": json_data });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(true);
    }

    if workflows.is_empty() {
        println!("{} No workflows found in history", INFO);
        return Ok(true);
    }

    println!("{} Workflows in history:", INFO);
    for name in &workflows {
        if cmd.with_counts {
            let executions = store.list_executions(name).await?;
            let completed = executions.iter().filter(|e| e.status == ExecutionStatus::Completed).count();
            let failed = executions.iter().filter(|e| e.status == ExecutionStatus::Failed).count();
            println!(
                "  {} ({} executions: {} succeeded, {} failed)",
                style(name).bold(),
                style(executions.len()).cyan(),
                style(completed).green(),
                style(failed).red()
            );
        } else {
            println!("  {}", style(name).bold());
        }
    }

    Ok(true)
}

async fn show_history(cmd: &HistoryCommand) -> Result<bool> {
    let store = open_store().await?;

    if let Some(exec_id_str) = &cmd.execution_id {
        let exec_id = uuid::Uuid::parse_str(exec_id_str).context("Invalid execution ID format")?;
        match store.load_execution(exec_id).await? {
            Some(summary) => print_execution_details(&summary, cmd.detailed),
            None => println!("{} Execution not found", WARN),
        }
        return Ok(true);
    }

    let mut executions = match &cmd.workflow {
        Some(name) => store.list_executions(name).await?,
        None => {
            let mut all = Vec::new();
            for name in store.list_workflows().await? {
                all.extend(store.list_executions(&name).await?);
            }
            all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            all
        }
    };
    executions.truncate(cmd.limit);

    if cmd.json {
        let data = serde_json::json!({ "executions": executions });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(true);
    }

    if executions.is_empty() {
        println!("{} No executions found", INFO);
        return Ok(true);
    }

    println!("{} Execution history (showing latest {}):", INFO, executions.len());
    for summary in &executions {
        println!("  {}", format_execution_summary(summary));
        if cmd.detailed {
            for run in &summary.runs {
                println!("      {} {}", format_status(run.status), run.name);
            }
        }
    }

    Ok(true)
}

fn print_execution_details(summary: &ExecutionSummary, detailed: bool) {
    println!("{} Execution Details", INFO);
    println!("  ID: {}", style(summary.execution_id).cyan());
    println!("  Workflow: {}", style(&summary.workflow_name).bold());
    println!("  Event: {}", style(&summary.event).cyan());
    println!("  Status: {}", format_status(summary.status));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(completed) = summary.completed_at {
        println!("  Completed: {}", style(completed.to_rfc3339()).dim());
        if let Ok(duration) = completed.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!(
        "  Configurations: {} passed, {} failed, {} cancelled of {}",
        style(summary.completed_runs).green(),
        style(summary.failed_runs).red(),
        style(summary.cancelled_runs).yellow(),
        summary.total_runs
    );

    if detailed {
        for run in &summary.runs {
            println!("    {} {}", format_status(run.status), run.name);
        }
    }
}

fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
