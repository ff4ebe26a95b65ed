//! Build matrix expansion

use crate::core::config::ConfigError;
use crate::core::context::render_template;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::HashMap;

/// One matrix dimension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Axis {
    pub name: String,
    pub values: Vec<String>,
}

/// Parsed matrix declaration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatrixSpec {
    /// Axes in declaration order
    pub axes: Vec<Axis>,

    /// Extra combinations appended after the product
    pub include: Vec<Vec<(String, String)>>,

    /// Partial combinations removed from the product
    pub exclude: Vec<Vec<(String, String)>>,
}

/// A single expanded configuration; identity is its `values` tuple
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfiguration {
    pub index: usize,
    pub values: Vec<(String, String)>,
    pub name: String,
}

impl RunConfiguration {
    /// Value of an axis in this configuration
    pub fn get(&self, axis: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| k == axis)
            .map(|(_, v)| v.as_str())
    }

    /// `axis=value` pairs joined for display
    pub fn label(&self) -> String {
        self.values
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Variables exposed to templates and guards as `matrix.<axis>`
    pub fn variables(&self) -> HashMap<String, String> {
        self.values
            .iter()
            .map(|(k, v)| (format!("matrix.{}", k), v.clone()))
            .collect()
    }

    fn matches_partial(&self, partial: &[(String, String)]) -> bool {
        partial
            .iter()
            .all(|(k, v)| self.get(k) == Some(v.as_str()))
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_combination(
    value: &Value,
    section: &str,
) -> Result<Vec<(String, String)>, ConfigError> {
    let map = value.as_mapping().ok_or_else(|| {
        ConfigError::Matrix(format!("'{}' entries must be mappings", section))
    })?;

    map.iter()
        .map(|(k, v)| {
            let key = k.as_str().ok_or_else(|| {
                ConfigError::Matrix(format!("'{}' keys must be strings", section))
            })?;
            let val = scalar_to_string(v).ok_or_else(|| {
                ConfigError::Matrix(format!(
                    "'{}' value for '{}' must be a scalar",
                    section, key
                ))
            })?;
            Ok((key.to_string(), val))
        })
        .collect()
}

impl MatrixSpec {
    /// Parse a `strategy.matrix` mapping, keeping axis order
    pub fn from_mapping(map: &Mapping) -> Result<Self, ConfigError> {
        let mut spec = MatrixSpec::default();

        for (key, value) in map {
            let name = key
                .as_str()
                .ok_or_else(|| ConfigError::Matrix("axis names must be strings".into()))?;

            match name {
                "include" | "exclude" => {
                    let entries = value.as_sequence().ok_or_else(|| {
                        ConfigError::Matrix(format!("'{}' must be a list", name))
                    })?;
                    let parsed = entries
                        .iter()
                        .map(|e| parse_combination(e, name))
                        .collect::<Result<Vec<_>, _>>()?;
                    if name == "include" {
                        spec.include = parsed;
                    } else {
                        spec.exclude = parsed;
                    }
                }
                _ => {
                    let items = value.as_sequence().ok_or_else(|| {
                        ConfigError::Matrix(format!("axis '{}' must be a list of values", name))
                    })?;
                    if items.is_empty() {
                        return Err(ConfigError::Matrix(format!("axis '{}' has no values", name)));
                    }

                    // Set semantics within an axis: first occurrence wins
                    let mut values: Vec<String> = Vec::with_capacity(items.len());
                    for item in items {
                        let v = scalar_to_string(item).ok_or_else(|| {
                            ConfigError::Matrix(format!(
                                "axis '{}' contains a non-scalar value",
                                name
                            ))
                        })?;
                        if !values.contains(&v) {
                            values.push(v);
                        }
                    }
                    spec.axes.push(Axis {
                        name: name.to_string(),
                        values,
                    });
                }
            }
        }

        spec.check_references()?;
        Ok(spec)
    }

    fn check_references(&self) -> Result<(), ConfigError> {
        for (section, entries) in [("include", &self.include), ("exclude", &self.exclude)] {
            for entry in entries {
                for (key, _) in entry {
                    if !self.axes.iter().any(|a| &a.name == key) {
                        return Err(ConfigError::Matrix(format!(
                            "'{}' references unknown axis '{}'",
                            section, key
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn axis(&self, name: &str) -> Option<&Axis> {
        self.axes.iter().find(|a| a.name == name)
    }

    /// Number of configurations before include/exclude
    pub fn product_len(&self) -> usize {
        self.axes.iter().map(|a| a.values.len()).product()
    }

    /// Cartesian product; the first axis varies slowest
    fn combinations(&self) -> Vec<Vec<(String, String)>> {
        let mut result: Vec<Vec<(String, String)>> = vec![Vec::new()];

        for axis in &self.axes {
            let mut next = Vec::with_capacity(result.len() * axis.values.len());
            for combo in &result {
                for value in &axis.values {
                    let mut extended = combo.clone();
                    extended.push((axis.name.clone(), value.clone()));
                    next.push(extended);
                }
            }
            result = next;
        }

        result
    }

    fn normalize(&self, entry: &[(String, String)]) -> Vec<(String, String)> {
        self.axes
            .iter()
            .filter_map(|axis| {
                entry
                    .iter()
                    .find(|(k, _)| *k == axis.name)
                    .map(|(k, v)| (k.clone(), v.clone()))
            })
            .collect()
    }
}

/// Expands a matrix into named run configurations
#[derive(Debug, Clone)]
pub struct MatrixExpander {
    spec: MatrixSpec,
    workflow_name: String,
    name_template: Option<String>,
}

impl MatrixExpander {
    pub fn new(spec: MatrixSpec, workflow_name: impl Into<String>, name_template: Option<String>) -> Self {
        Self {
            spec,
            workflow_name: workflow_name.into(),
            name_template,
        }
    }

    pub fn spec(&self) -> &MatrixSpec {
        &self.spec
    }

    /// Produce every configuration, indexed in expansion order
    pub fn expand(&self) -> Vec<RunConfiguration> {
        let mut combos = self.spec.combinations();

        combos.retain(|combo| {
            !self.spec.exclude.iter().any(|ex| {
                ex.iter()
                    .all(|(k, v)| combo.iter().any(|(ck, cv)| ck == k && cv == v))
            })
        });

        for include in &self.spec.include {
            let normalized = self.spec.normalize(include);
            if !combos.contains(&normalized) {
                combos.push(normalized);
            }
        }

        combos
            .into_iter()
            .enumerate()
            .map(|(index, values)| {
                let mut config = RunConfiguration {
                    index,
                    values,
                    name: String::new(),
                };
                config.name = self.display_name(&config);
                config
            })
            .collect()
    }

    fn display_name(&self, config: &RunConfiguration) -> String {
        match &self.name_template {
            Some(template) => {
                let mut vars = config.variables();
                vars.insert("workflow".to_string(), self.workflow_name.clone());
                render_template(template, &vars)
            }
            None if config.values.is_empty() => self.workflow_name.clone(),
            None => format!("{} ({})", self.workflow_name, config.label()),
        }
    }

    /// Configurations matching a partial `axis=value` selection
    pub fn select<'a>(
        configs: &'a [RunConfiguration],
        partial: &[(String, String)],
    ) -> Vec<&'a RunConfiguration> {
        configs.iter().filter(|c| c.matches_partial(partial)).collect()
    }
}
