//! CLI module
//!
//! Command-line interface for running migrations.
//!
//! # Commands
//!
//! - `extract` - Pull source entities into the staging store
//! - `transform` - Map staged entities to destination payloads
//! - `load` - Create transformed entities in the destination
//! - `migrate` - Run all phases with checkpointed resume
//! - `validate` - Check configuration, connectivity and store consistency
//! - `report` - Print entity counts, failures and run history

mod commands;
mod runner;

pub use commands::{Cli, Commands, OutputFormat};
pub use runner::Runner;
