//! Scenario-based tests for matrixci

mod helpers;

mod coverage_join;
mod failure_isolation;
mod gate_selection;
mod matrix_expansion;
mod triggers;
