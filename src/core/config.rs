//! Workflow configuration from YAML

use crate::core::coverage::CoveragePlan;
use crate::core::expr::ExprError;
use crate::core::gate::GateVariant;
use crate::core::matrix::MatrixSpec;
use crate::core::workflow::Workflow;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use thiserror::Error;

/// Errors raised while loading or validating a workflow
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read workflow file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid workflow YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid matrix: {0}")]
    Matrix(String),

    #[error("invalid branch pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("step '{step}' has an invalid condition `{expression}`: {source}")]
    Guard {
        step: String,
        expression: String,
        #[source]
        source: ExprError,
    },

    #[error("invalid coverage section: {0}")]
    Coverage(String),

    #[error("{0}")]
    Invalid(String),
}

/// Top-level workflow configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Workflow name
    pub name: String,

    /// Events that start the workflow
    #[serde(rename = "on", default)]
    pub triggers: TriggersConfig,

    /// Environment shared by every configuration
    #[serde(default)]
    pub env: BTreeMap<String, Value>,

    /// Step defaults
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Matrix and scheduling
    #[serde(default)]
    pub strategy: StrategyConfig,

    /// Full/light test gate
    #[serde(default)]
    pub gate: Option<GateConfig>,

    /// Ordered steps run for every configuration
    pub steps: Vec<StepConfig>,

    /// Coverage upload and parallel finalization
    #[serde(default)]
    pub coverage: Option<CoverageConfig>,
}

/// `on:` section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggersConfig {
    #[serde(default)]
    pub push: Option<BranchFilter>,

    #[serde(default)]
    pub pull_request: Option<BranchFilter>,
}

/// Branch globs; an empty list matches every branch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BranchFilter {
    /// A single glob (`branches: '*'`) or a list of them
    #[serde(default, deserialize_with = "one_or_many")]
    pub branches: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(branch) => vec![branch],
        OneOrMany::Many(branches) => branches,
    })
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Timeout applied to steps without their own (seconds)
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Working directory for step commands
    #[serde(default)]
    pub working_directory: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Axes plus optional `include` / `exclude`
    #[serde(default)]
    pub matrix: Mapping,

    /// Run name template, e.g. `"Python {{ matrix.python-version }}"`
    #[serde(default)]
    pub name: Option<String>,

    /// Cancel configurations that have not started once one fails
    #[serde(default)]
    pub fail_fast: bool,

    /// Upper bound on concurrently running configurations
    #[serde(default)]
    pub max_parallel: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Branches that get the full test group
    pub full_branches: Vec<String>,
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Optional unique identifier
    #[serde(default)]
    pub id: Option<String>,

    /// Human-readable step name
    pub name: String,

    /// Shell command (templated)
    pub run: String,

    /// Guard expression
    #[serde(rename = "if", default)]
    pub condition: Option<String>,

    /// Gate group this step belongs to
    #[serde(default)]
    pub variant: Option<GateVariant>,

    /// Environment overlay (templated)
    #[serde(default)]
    pub env: BTreeMap<String, Value>,

    #[serde(default)]
    pub working_directory: Option<String>,

    /// Timeout for this step (overrides defaults)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageConfig {
    /// Matrix axis compared against `using`
    pub axis: String,

    /// Values to upload coverage for; falls back to `env.USING_COVERAGE`
    #[serde(default)]
    pub using: Option<Value>,

    /// Flag name template; defaults to the run name
    #[serde(default)]
    pub flag_name: Option<String>,

    #[serde(default)]
    pub parallel: bool,

    /// Upload command
    pub upload: String,

    /// Finalize command for parallel builds
    #[serde(default)]
    pub finish: Option<String>,

    #[serde(default = "default_token_env")]
    pub token_env: String,
}

pub(crate) fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

/// Environment variable consulted when `coverage.using` is absent
pub const USING_COVERAGE_ENV: &str = "USING_COVERAGE";

/// Render a YAML scalar the way a shell would see it
pub(crate) fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

/// Convert an env mapping into ordered key/value pairs
pub(crate) fn env_pairs(
    env: &BTreeMap<String, Value>,
    owner: &str,
) -> Result<Vec<(String, String)>, ConfigError> {
    env.iter()
        .map(|(k, v)| {
            scalar_string(v)
                .map(|s| (k.clone(), s))
                .ok_or_else(|| {
                    ConfigError::Invalid(format!("{}: env '{}' must be a scalar", owner, k))
                })
        })
        .collect()
}

impl WorkflowConfig {
    /// Load workflow configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate workflow configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: WorkflowConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the workflow configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("workflow name must not be empty".into()));
        }

        if self.triggers.push.is_none() && self.triggers.pull_request.is_none() {
            return Err(ConfigError::Invalid(
                "workflow has no triggers; add 'on.push' or 'on.pull_request'".into(),
            ));
        }

        if self.steps.is_empty() {
            return Err(ConfigError::Invalid("workflow has no steps".into()));
        }

        // Check that all step IDs are unique
        let mut seen_ids = HashSet::new();
        for step in &self.steps {
            if let Some(id) = &step.id {
                if !seen_ids.insert(id) {
                    return Err(ConfigError::Invalid(format!("Duplicate step ID: {}", id)));
                }
            }
        }

        if self.gate.is_none() {
            if let Some(step) = self.steps.iter().find(|s| s.variant.is_some()) {
                return Err(ConfigError::Invalid(format!(
                    "step '{}' declares a variant but the workflow has no 'gate' section",
                    step.name
                )));
            }
        }

        if let Some(coverage) = &self.coverage {
            if coverage.upload.trim().is_empty() {
                return Err(ConfigError::Coverage("'upload' must not be empty".into()));
            }
        }

        // Guards, patterns, matrix and coverage axis are checked while building
        Workflow::from_config(self).map(|_| ())
    }

    /// Non-fatal findings worth reporting
    pub fn lint(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        let has_full = self.steps.iter().any(|s| s.variant == Some(GateVariant::Full));
        let has_light = self.steps.iter().any(|s| s.variant == Some(GateVariant::Light));
        if self.gate.is_some() {
            match (has_full, has_light) {
                (false, false) => warnings.push("gate is defined but no step declares a variant".into()),
                (true, false) => warnings.push("only 'full' steps are defined; light branches run no gated step".into()),
                (false, true) => warnings.push("only 'light' steps are defined; full branches run no gated step".into()),
                (true, true) => {}
            }
        }

        for step in &self.steps {
            if step.run.trim().is_empty() {
                warnings.push(format!("step '{}' has an empty command", step.name));
            }
        }

        if let Some(coverage) = &self.coverage {
            if let Ok(spec) = MatrixSpec::from_mapping(&self.strategy.matrix) {
                if let (Some(axis), Ok(using)) = (spec.axis(&coverage.axis), self.coverage_values(coverage)) {
                    for value in using.iter().filter(|v| !axis.values.contains(v)) {
                        warnings.push(format!(
                            "coverage value '{}' is not a value of axis '{}'",
                            value, coverage.axis
                        ));
                    }
                }
            }
            if coverage.parallel && coverage.finish.is_none() {
                warnings.push("parallel coverage without a 'finish' command is never finalized".into());
            }
            if !coverage.parallel && coverage.finish.is_some() {
                warnings.push("'finish' is ignored unless coverage is parallel".into());
            }
        }

        warnings
    }

    /// Values listed for coverage, from `coverage.using` or `env.USING_COVERAGE`
    pub fn coverage_values(&self, coverage: &CoverageConfig) -> Result<Vec<String>, ConfigError> {
        let raw = match &coverage.using {
            Some(Value::Sequence(items)) => {
                return items
                    .iter()
                    .map(|v| {
                        scalar_string(v).ok_or_else(|| {
                            ConfigError::Coverage("'using' entries must be scalars".into())
                        })
                    })
                    .collect();
            }
            Some(other) => scalar_string(other)
                .ok_or_else(|| ConfigError::Coverage("'using' must be a string or a list".into()))?,
            None => self
                .env
                .get(USING_COVERAGE_ENV)
                .and_then(scalar_string)
                .ok_or_else(|| {
                    ConfigError::Coverage(format!(
                        "no 'using' list and no '{}' in env",
                        USING_COVERAGE_ENV
                    ))
                })?,
        };
        Ok(CoveragePlan::parse_using(&raw))
    }

    /// Convert config to a Workflow domain model
    pub fn to_workflow(&self) -> Result<Workflow, ConfigError> {
        Workflow::from_config(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::trigger::TriggerEvent;

    const WORKFLOW: &str = r#"
name: "Test"
on:
  push:
    branches: ["*"]
  pull_request:
    branches: [master, development]
env:
  USING_COVERAGE: "3.7,3.9"
strategy:
  matrix:
    python-version: ["3.7", "3.8", "3.9"]
    pytorch-version: ["1.9.0", "1.9.1"]
gate:
  full_branches: [master, development]
steps:
  - name: Install
    run: pip install torch=={{ matrix.pytorch-version }}
  - name: Run test
    variant: full
    run: make test
  - name: Run light test
    variant: light
    run: make test-light
coverage:
  axis: python-version
  parallel: true
  upload: coveralls --service=github
  finish: coveralls --finish
"#;

    #[test]
    fn test_parse_workflow() {
        let config = WorkflowConfig::from_yaml(WORKFLOW).unwrap();
        assert_eq!(config.name, "Test");
        assert_eq!(config.steps.len(), 3);
        assert_eq!(config.steps[1].variant, Some(GateVariant::Full));
        assert_eq!(
            config.triggers.pull_request.as_ref().unwrap().branches,
            vec!["master", "development"]
        );
        assert!(config.lint().is_empty(), "{:?}", config.lint());
    }

    #[test]
    fn test_coverage_values_fall_back_to_env() {
        let config = WorkflowConfig::from_yaml(WORKFLOW).unwrap();
        let coverage = config.coverage.as_ref().unwrap();
        assert_eq!(config.coverage_values(coverage).unwrap(), vec!["3.7", "3.9"]);
    }

    #[test]
    fn test_coverage_values_from_list() {
        let yaml = WORKFLOW.replace("  parallel: true", "  using: [3.7, \"3.8\"]\n  parallel: true");
        let config = WorkflowConfig::from_yaml(&yaml).unwrap();
        let coverage = config.coverage.as_ref().unwrap();
        assert_eq!(config.coverage_values(coverage).unwrap(), vec!["3.7", "3.8"]);
    }

    #[test]
    fn test_inverted_gate_condition_is_rejected() {
        let yaml = r#"
name: "Inverted"
on:
  push: {}
steps:
  - name: Run light test
    if: "contains('refs/heads/master refs/heads/development', ref) != 1"
    run: make test-light
"#;
        let err = WorkflowConfig::from_yaml(yaml).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Run light test"), "{}", message);
        assert!(matches!(err, ConfigError::Guard { .. }));
    }

    #[test]
    fn test_misspelled_identifier_is_rejected() {
        let yaml = r#"
name: "Typo"
on:
  push: {}
steps:
  - name: Deploy
    if: brnach == 'master'
    run: make deploy
"#;
        match WorkflowConfig::from_yaml(yaml).unwrap_err() {
            ConfigError::Guard { step, source, .. } => {
                assert_eq!(step, "Deploy");
                assert_eq!(source, ExprError::UnknownIdentifier("brnach".into()));
            }
            other => panic!("expected guard error, got {:?}", other),
        }
    }

    #[test]
    fn test_scalar_branch_filter() {
        let yaml = r#"
name: "Scalar"
on:
  push:
    branches: '*'
  pull_request:
    branches: master
steps:
  - name: Test
    run: make test
"#;
        let config = WorkflowConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.triggers.push.as_ref().unwrap().branches, vec!["*"]);
        assert_eq!(config.triggers.pull_request.as_ref().unwrap().branches, vec!["master"]);

        let workflow = config.to_workflow().unwrap();
        assert!(workflow.should_run(&TriggerEvent::push("feature")));
        assert!(!workflow.should_run(&TriggerEvent::pull_request("release")));
    }

    #[test]
    fn test_variant_without_gate_fails() {
        let yaml = r#"
name: "No gate"
on:
  push: {}
steps:
  - name: Run test
    variant: full
    run: make test
"#;
        assert!(WorkflowConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_missing_triggers_fails() {
        let yaml = r#"
name: "Nothing"
steps:
  - name: a
    run: "true"
"#;
        assert!(WorkflowConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_duplicate_step_id_fails() {
        let yaml = r#"
name: "Dup"
on:
  push: {}
steps:
  - id: build
    name: First
    run: make
  - id: build
    name: Second
    run: make
"#;
        assert!(WorkflowConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_unknown_coverage_axis_fails() {
        let yaml = WORKFLOW.replace("axis: python-version", "axis: numpy-version");
        assert!(matches!(
            WorkflowConfig::from_yaml(&yaml),
            Err(ConfigError::Coverage(_))
        ));
    }

    #[test]
    fn test_lints() {
        let yaml = WORKFLOW
            .replace("  finish: coveralls --finish\n", "")
            .replace("\"3.7,3.9\"", "\"3.6,3.9\"");
        let config = WorkflowConfig::from_yaml(&yaml).unwrap();
        let lints = config.lint();
        assert!(lints.iter().any(|l| l.contains("'3.6'")));
        assert!(lints.iter().any(|l| l.contains("never finalized")));
    }

    #[test]
    fn test_numeric_env_values() {
        let yaml = r#"
name: "Env"
on:
  push: {}
env:
  RETRIES: 3
steps:
  - name: a
    run: echo $RETRIES
"#;
        let config = WorkflowConfig::from_yaml(yaml).unwrap();
        let pairs = env_pairs(&config.env, "workflow").unwrap();
        assert_eq!(pairs, vec![("RETRIES".to_string(), "3".to_string())]);
    }
}
