//! Core domain models for workflows
//!
//! This module defines the workflow descriptor, its matrix, triggers,
//! gate, guards, coverage plan and the execution state of each run.

pub mod config;
pub mod context;
pub mod coverage;
pub mod expr;
pub mod gate;
pub mod matrix;
pub mod state;
pub mod step;
pub mod trigger;
pub mod workflow;

pub use context::*;
pub use state::*;
pub use step::*;
pub use workflow::*;
