//! Run context - variables, environment and secrets of one configuration

use crate::core::expr::EvalScope;
use crate::core::matrix::RunConfiguration;
use crate::core::trigger::TriggerEvent;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

fn template_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$?\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("template pattern is valid")
    })
}

/// Replace `{{ key }}` (or `${{ key }}`) placeholders; unknown keys render empty
pub fn render_template(template: &str, variables: &HashMap<String, String>) -> String {
    template_pattern()
        .replace_all(template, |caps: &regex::Captures| {
            variables.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}

/// `python-version` -> `MATRIX_PYTHON_VERSION`
pub fn matrix_env_name(axis: &str) -> String {
    let upper: String = axis
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("MATRIX_{}", upper)
}

/// Execution context for one configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunContext {
    /// Template and guard variables (`branch`, `matrix.x`, `env.X`, ...)
    pub variables: HashMap<String, String>,

    /// Environment overlay handed to every step command
    pub env: HashMap<String, String>,

    /// Values masked in captured output
    #[serde(skip)]
    secrets: Vec<String>,
}

impl RunContext {
    /// Build the context for a configuration.
    ///
    /// `workflow_env` values may reference `{{ matrix.* }}`; `process_env`
    /// is the environment the runner was started with.
    pub fn new(
        event: &TriggerEvent,
        configuration: &RunConfiguration,
        workflow_env: &[(String, String)],
        process_env: &HashMap<String, String>,
    ) -> Self {
        let mut variables = HashMap::new();
        variables.insert("branch".to_string(), event.branch().to_string());
        variables.insert("event".to_string(), event.kind().as_str().to_string());
        variables.insert("ref".to_string(), event.git_ref());
        variables.insert("run".to_string(), configuration.name.clone());
        variables.extend(configuration.variables());

        for (key, value) in process_env {
            variables.insert(format!("env.{}", key), value.clone());
        }

        let mut env = HashMap::new();
        for (axis, value) in &configuration.values {
            env.insert(matrix_env_name(axis), value.clone());
        }

        for (key, template) in workflow_env {
            let value = render_template(template, &variables);
            variables.insert(format!("env.{}", key), value.clone());
            env.insert(key.clone(), value);
        }

        Self {
            variables,
            env,
            secrets: Vec::new(),
        }
    }

    /// Render a template against this context
    pub fn render(&self, template: &str) -> String {
        render_template(template, &self.variables)
    }

    /// Environment for a step: run overlay plus the step's own entries
    pub fn step_env(&self, step_env: &[(String, String)]) -> HashMap<String, String> {
        let mut env = self.env.clone();
        for (key, template) in step_env {
            env.insert(key.clone(), self.render(template));
        }
        env
    }

    /// Register a secret so it never shows up in logged output
    pub fn add_secret(&mut self, value: String) {
        if !value.is_empty() && !self.secrets.contains(&value) {
            self.secrets.push(value);
        }
    }

    /// Mask registered secrets
    pub fn mask(&self, text: &str) -> String {
        let mut masked = text.to_string();
        for secret in &self.secrets {
            masked = masked.replace(secret.as_str(), "***");
        }
        masked
    }

    pub fn get_variable(&self, key: &str) -> Option<&String> {
        self.variables.get(key)
    }

    pub fn scope(&self, job_failed: bool) -> EvalScope<'_> {
        EvalScope {
            variables: &self.variables,
            job_failed,
        }
    }
}
