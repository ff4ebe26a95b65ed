//! Step domain model

use crate::core::config::{env_pairs, ConfigError, StepConfig};
use crate::core::context::RunContext;
use crate::core::coverage::CoveragePlan;
use crate::core::expr::Guard;
use crate::core::gate::GateVariant;
use serde::{Deserialize, Serialize};

/// What a step is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepKind {
    /// A user-declared shell command
    Command,
    /// Coverage upload appended to flagged configurations
    CoverageUpload,
    /// Parallel coverage finalization, run once per workflow
    CoverageFinish,
}

/// A single step of a configuration
#[derive(Debug, Clone)]
pub struct Step {
    /// Unique step identifier
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Command template
    pub run: String,

    /// Optional guard expression
    pub guard: Option<Guard>,

    /// Gate group; `None` runs regardless of the gate
    pub variant: Option<GateVariant>,

    /// Environment overlay templates
    pub env: Vec<(String, String)>,

    pub working_directory: Option<String>,

    /// Timeout in seconds
    pub timeout_secs: u64,

    pub kind: StepKind,
}

/// Whether a step runs, and why not
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepDecision {
    Run,
    Skip(String),
}

#[derive(Debug, Clone)]
pub struct StepDefaults {
    pub timeout_secs: u64,
    pub working_directory: Option<String>,
}

impl Default for StepDefaults {
    fn default() -> Self {
        Self {
            timeout_secs: 3600, // 1 hour
            working_directory: None,
        }
    }
}

fn slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}

impl Step {
    /// Create a step from a step config; guards may reference `axes`
    pub fn from_config(
        config: &StepConfig,
        index: usize,
        defaults: &StepDefaults,
        axes: &[String],
    ) -> Result<Self, ConfigError> {
        let guard = config
            .condition
            .as_deref()
            .map(|expr| {
                Guard::parse(expr, axes).map_err(|source| ConfigError::Guard {
                    step: config.name.clone(),
                    expression: expr.to_string(),
                    source,
                })
            })
            .transpose()?;

        let id = config
            .id
            .clone()
            .unwrap_or_else(|| format!("{}-{}", index + 1, slug(&config.name)));

        Ok(Step {
            id,
            name: config.name.clone(),
            run: config.run.clone(),
            guard,
            variant: config.variant,
            env: env_pairs(&config.env, &config.name)?,
            working_directory: config
                .working_directory
                .clone()
                .or_else(|| defaults.working_directory.clone()),
            timeout_secs: config.timeout_secs.unwrap_or(defaults.timeout_secs),
            kind: StepKind::Command,
        })
    }

    /// The coverage upload appended to a flagged configuration
    pub fn coverage_upload(plan: &CoveragePlan, flag_name: &str, defaults: &StepDefaults) -> Self {
        let mut env = vec![("COVERALLS_FLAG_NAME".to_string(), flag_name.to_string())];
        if plan.parallel {
            env.push(("COVERALLS_PARALLEL".to_string(), "true".to_string()));
        }

        Step {
            id: "coverage-upload".to_string(),
            name: "Upload coverage".to_string(),
            run: plan.upload.clone(),
            guard: None,
            variant: None,
            env,
            working_directory: defaults.working_directory.clone(),
            timeout_secs: defaults.timeout_secs,
            kind: StepKind::CoverageUpload,
        }
    }

    /// The one-off command finalizing a parallel coverage build
    pub fn coverage_finish(command: &str, defaults: &StepDefaults) -> Self {
        Step {
            id: "coverage-finish".to_string(),
            name: "Finalize coverage".to_string(),
            run: command.to_string(),
            guard: None,
            variant: None,
            env: vec![("COVERALLS_PARALLEL_FINISHED".to_string(), "true".to_string())],
            working_directory: defaults.working_directory.clone(),
            timeout_secs: defaults.timeout_secs,
            kind: StepKind::CoverageFinish,
        }
    }

    /// Decide whether this step runs given the selected gate variant and
    /// whether an earlier step of the configuration failed
    pub fn decide(
        &self,
        context: &RunContext,
        selected: Option<GateVariant>,
        job_failed: bool,
    ) -> StepDecision {
        if let Some(variant) = self.variant {
            match selected {
                Some(s) if s == variant => {}
                Some(s) => return StepDecision::Skip(format!("gate selected {} tests", s)),
                None => return StepDecision::Skip("no gate configured".to_string()),
            }
        }

        match &self.guard {
            Some(guard) => {
                if guard.allows(&context.scope(job_failed)) {
                    StepDecision::Run
                } else if job_failed && !guard.is_status_aware() {
                    StepDecision::Skip("an earlier step failed".to_string())
                } else {
                    StepDecision::Skip(format!("condition `{}` is false", guard.source()))
                }
            }
            None if job_failed => StepDecision::Skip("an earlier step failed".to_string()),
            None => StepDecision::Run,
        }
    }

    /// Render the command with the context's variables
    pub fn render_command(&self, context: &RunContext) -> String {
        context.render(&self.run)
    }
}
