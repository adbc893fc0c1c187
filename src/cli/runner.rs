//! CLI runner - executes commands

use crate::cli::commands::{Cli, Commands, OutputFormat};
use crate::config::MigrationConfig;
use crate::error::{Error, Result};
use crate::pipeline::{MigrationReport, Orchestrator};
use crate::store::StagingStore;
use crate::types::CancelToken;
use std::sync::Arc;

/// CLI runner
pub struct Runner {
    cli: Cli,
}

impl Runner {
    /// Create a new runner
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Run the CLI command
    ///
    /// Returns an error (and a non-zero exit) when any entity or entity
    /// type ends failed, so schedulers can tell a partial run apart from
    /// a complete one.
    pub async fn run(&self) -> Result<()> {
        let orchestrator = self.orchestrator()?;
        match &self.cli.command {
            Commands::Extract => self.finish(orchestrator.extract().await?),
            Commands::Transform => self.finish(orchestrator.transform()?),
            Commands::Load => self.finish(orchestrator.load().await?),
            Commands::Migrate => self.finish(orchestrator.migrate().await?),
            Commands::Validate => {
                let report = orchestrator.validate().await?;
                match self.cli.format {
                    OutputFormat::Text => print!("{}", report.render_text()),
                    OutputFormat::Json => println!("{}", report.to_json()?),
                }
                if report.passed() {
                    Ok(())
                } else {
                    Err(Error::Other("validation failed".to_string()))
                }
            }
            Commands::Report => {
                let report = orchestrator.report()?;
                self.print_report(&report)
            }
        }
    }

    /// Load the configuration and wire up the pipeline
    fn orchestrator(&self) -> Result<Orchestrator> {
        let path = self
            .cli
            .config
            .as_ref()
            .ok_or_else(|| Error::config("Config file not specified (use -c flag)"))?;
        let config = MigrationConfig::load_file(path)?;
        let store = Arc::new(StagingStore::open(config.migration.staging_db_path())?);
        let cancel = CancelToken::new();
        spawn_interrupt_listener(cancel.clone());
        Ok(Orchestrator::new(config, store, cancel))
    }

    fn print_report(&self, report: &MigrationReport) -> Result<()> {
        match self.cli.format {
            OutputFormat::Text => print!("{}", report.render_text()),
            OutputFormat::Json => println!("{}", report.to_json()?),
        }
        Ok(())
    }

    fn finish(&self, report: MigrationReport) -> Result<()> {
        self.print_report(&report)?;
        if report.clean() {
            return Ok(());
        }
        Err(Error::Other(format!(
            "finished with {} failed entities and {} failed entity types",
            report.total_failed(),
            report.type_failures.len()
        )))
    }
}

/// Turn the first Ctrl-C into a cancellation request
///
/// The pipeline stops at the next page or batch boundary, leaving the
/// staging store consistent for a later resume.
fn spawn_interrupt_listener(cancel: CancelToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping at the next safe point");
            cancel.cancel();
        }
    });
}
