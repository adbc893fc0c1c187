//! CLI commands and argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Test-management migration CLI
#[derive(Parser, Debug)]
#[command(name = "testshift")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Migration definition file (YAML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format for reports
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Pull source entities into the staging store
    Extract,

    /// Map staged entities to destination payloads (single pass)
    Transform,

    /// Create transformed entities in the destination
    Load,

    /// Run all phases, resuming from the last checkpoint
    Migrate,

    /// Check configuration, API connectivity and store consistency
    Validate,

    /// Print entity counts, failures and run history
    Report,
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output
    Text,
    /// Pretty-printed JSON
    Json,
}
