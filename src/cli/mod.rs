//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{HistoryCommand, ListCommand, PlanCommand, RunCommand, ValidateCommand};
use std::ffi::OsString;

/// Matrix CI workflow runner
#[derive(Debug, Parser, Clone)]
#[command(name = "matrixci")]
#[command(author = "matrixci contributors")]
#[command(version = "0.1.0")]
#[command(about = "Run CI workflows: triggers, build matrices, gated steps and coverage", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print step output as each step finishes
    #[arg(short, long, global = true)]
    pub stream: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a workflow for an event
    Run(RunCommand),

    /// Validate a workflow file
    Validate(ValidateCommand),

    /// Show the configurations and steps an event would run
    Plan(PlanCommand),

    /// List workflows with recorded executions
    List(ListCommand),

    /// Show execution history
    History(HistoryCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
