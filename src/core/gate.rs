//! Full/light test gate

use crate::core::trigger::BranchPattern;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which mutually exclusive step group runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateVariant {
    Full,
    Light,
}

impl fmt::Display for GateVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateVariant::Full => f.write_str("full"),
            GateVariant::Light => f.write_str("light"),
        }
    }
}

/// Selects the full test group on allow-listed branches, light otherwise.
///
/// `Light` is the negation of the allow-list predicate, so exactly one
/// group is selected for any branch.
#[derive(Debug, Clone)]
pub struct Gate {
    full_branches: Vec<BranchPattern>,
}

impl Gate {
    pub fn new(full_branches: Vec<BranchPattern>) -> Self {
        Self { full_branches }
    }

    pub fn is_full_branch(&self, branch: &str) -> bool {
        self.full_branches.iter().any(|p| p.matches(branch))
    }

    pub fn select(&self, branch: &str) -> GateVariant {
        if self.is_full_branch(branch) {
            GateVariant::Full
        } else {
            GateVariant::Light
        }
    }

    pub fn full_branches(&self) -> Vec<&str> {
        self.full_branches.iter().map(|p| p.as_str()).collect()
    }
}
