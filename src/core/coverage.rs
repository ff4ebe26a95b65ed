//! Coverage flagging and parallel-join aggregation

use crate::core::matrix::RunConfiguration;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Resolved coverage settings for a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoveragePlan {
    /// Matrix axis compared against `using`
    pub axis: String,

    /// Axis values whose configurations upload coverage
    pub using: Vec<String>,

    /// Flag name template; defaults to the run name
    pub flag_name: Option<String>,

    /// Merge uploads and finalize once every flagged run has reported
    pub parallel: bool,

    /// Upload command run at the end of each flagged configuration
    pub upload: String,

    /// Command that tells the coverage service to finalize a parallel build
    pub finish: Option<String>,

    /// Environment variable holding the service token
    pub token_env: String,
}

impl CoveragePlan {
    /// Split a `USING_COVERAGE`-style list (`"3.7,3.9"` or `"3.7 3.9"`)
    pub fn parse_using(raw: &str) -> Vec<String> {
        raw.split(|c: char| c == ',' || c.is_whitespace())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn is_flagged(&self, configuration: &RunConfiguration) -> bool {
        configuration
            .get(&self.axis)
            .is_some_and(|v| self.using.iter().any(|u| u == v))
    }
}

/// How a flagged configuration's upload ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoverageOutcome {
    Uploaded,
    Failed { error: String },
    Skipped { reason: String },
}

/// State of the parallel finalization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Finalization {
    /// Not a parallel build, or nothing was flagged
    NotRequired,
    /// Still waiting on flagged runs
    Waiting,
    /// All runs reported; the finish command is running
    InProgress,
    /// All runs reported but none uploaded anything
    Skipped,
    Finalized,
    Failed(String),
}

/// One flagged configuration's upload result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagOutcome {
    pub flag_name: String,
    pub outcome: CoverageOutcome,
}

/// Merged coverage result of a workflow execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub parallel: bool,
    pub flagged: usize,
    /// run index -> outcome, in matrix order
    pub outcomes: BTreeMap<usize, FlagOutcome>,
    pub finalization: Finalization,
}

impl CoverageReport {
    pub fn uploaded(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| matches!(o.outcome, CoverageOutcome::Uploaded))
            .count()
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.finalization, Finalization::Failed(_))
            || self
                .outcomes
                .values()
                .any(|o| matches!(o.outcome, CoverageOutcome::Failed { .. }))
    }

    /// Outcome reported under a flag name
    pub fn outcome(&self, flag_name: &str) -> Option<&CoverageOutcome> {
        self.outcomes
            .values()
            .find(|o| o.flag_name == flag_name)
            .map(|o| &o.outcome)
    }
}

/// Collects per-run uploads and decides when the parallel build may finalize
#[derive(Debug, Clone)]
pub struct CoverageAggregator {
    parallel: bool,
    expected: HashSet<usize>,
    reported: HashSet<usize>,
    outcomes: BTreeMap<usize, FlagOutcome>,
    finalization: Finalization,
}

impl CoverageAggregator {
    pub fn new(parallel: bool, flagged_runs: impl IntoIterator<Item = usize>) -> Self {
        let expected: HashSet<usize> = flagged_runs.into_iter().collect();
        let finalization = if parallel && !expected.is_empty() {
            Finalization::Waiting
        } else {
            Finalization::NotRequired
        };

        Self {
            parallel,
            expected,
            reported: HashSet::new(),
            outcomes: BTreeMap::new(),
            finalization,
        }
    }

    /// Record a run's outcome.
    ///
    /// Returns `true` exactly once: when the last flagged run of a
    /// parallel build reports and at least one upload succeeded. The
    /// caller must then run the finish command and call [`Self::finish`].
    pub fn record(&mut self, run_index: usize, flag_name: &str, outcome: CoverageOutcome) -> bool {
        if !self.expected.contains(&run_index) || !self.reported.insert(run_index) {
            return false;
        }
        self.outcomes.insert(
            run_index,
            FlagOutcome {
                flag_name: flag_name.to_string(),
                outcome,
            },
        );

        if self.finalization != Finalization::Waiting || !self.all_reported() {
            return false;
        }

        let any_uploaded = self
            .outcomes
            .values()
            .any(|o| matches!(o.outcome, CoverageOutcome::Uploaded));
        if any_uploaded {
            self.finalization = Finalization::InProgress;
            true
        } else {
            self.finalization = Finalization::Skipped;
            false
        }
    }

    pub fn all_reported(&self) -> bool {
        self.reported.len() == self.expected.len()
    }

    pub fn pending(&self) -> usize {
        self.expected.len() - self.reported.len()
    }

    /// Record the result of the finish command
    pub fn finish(&mut self, result: Result<(), String>) {
        self.finalization = match result {
            Ok(()) => Finalization::Finalized,
            Err(e) => Finalization::Failed(e),
        };
    }

    pub fn report(&self) -> CoverageReport {
        CoverageReport {
            parallel: self.parallel,
            flagged: self.expected.len(),
            outcomes: self.outcomes.clone(),
            finalization: self.finalization.clone(),
        }
    }
}
