//! CLI type definitions
//!
//! Clap structures for the `paraflow` command tree. Each subcommand's
//! arguments live next to its implementation in [`super::commands`].

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use super::commands::analyze::AnalyzeArgs;
use super::commands::init::InitArgs;
use super::commands::run::RunArgs;
use super::commands::validate::ValidateArgs;

#[derive(Parser, Debug)]
#[command(name = "paraflow")]
#[command(about = "Paraflow - parallel execution of self-contained implementation tasks", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to .paraflow/config.yaml)
    #[arg(short, long, global = true, env = "PARAFLOW_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute every task of a plan in dependency layers
    Run(RunArgs),

    /// Show layers, critical path and file conflicts without running anything
    Analyze(AnalyzeArgs),

    /// Check each task of a plan is ready for stateless execution
    Validate(ValidateArgs),

    /// Create the .paraflow directory with a default configuration
    Init(InitArgs),
}
