//! Migration orchestration
//!
//! The orchestrator drives the three phases over the selected entity
//! types. Extraction runs first for every type in dependency order.
//! Transform and load then alternate per type until the type settles:
//! each load creates parents whose correlations let the next transform
//! pass resolve children that were deferred, so the loop runs until
//! nothing is left or a pass stops making progress.
//!
//! Every phase records its position in the staging store, so a rerun
//! of `migrate` resumes where the previous run stopped: extraction
//! continues from the saved cursor, failed entities are rescheduled,
//! and already-correlated entities are skipped by the loader.

mod report;

pub use report::{MigrationReport, TypeFailure, ValidationCheck, ValidationReport};

use crate::api::{DestinationApi, SourceApi};
use crate::config::MigrationConfig;
use crate::error::{Error, Result};
use crate::extract::Extractor;
use crate::http::HttpClient;
use crate::load::Loader;
use crate::platforms;
use crate::store::StagingStore;
use crate::transform::Transformer;
use crate::types::{CancelToken, EntityRef, EntityType, Phase, RunOutcome};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Drives extraction, transformation and loading over one staging store
pub struct Orchestrator {
    config: MigrationConfig,
    store: Arc<StagingStore>,
    source: Arc<SourceApi>,
    dest: Arc<DestinationApi>,
    cancel: CancelToken,
}

impl Orchestrator {
    /// Build API clients from the configuration and wire them to the store
    pub fn new(config: MigrationConfig, store: Arc<StagingStore>, cancel: CancelToken) -> Self {
        let source_client =
            HttpClient::with_auth(config.source.client_config(), config.source.auth.clone());
        let dest_client = HttpClient::with_auth(
            config.destination.client_config(),
            config.destination.auth.clone(),
        );
        let source = Arc::new(SourceApi::new(source_client, config.source.project.clone()));
        let dest = Arc::new(DestinationApi::new(
            dest_client,
            config.destination.project.clone(),
        ));
        Self {
            config,
            store,
            source,
            dest,
            cancel,
        }
    }

    // ===== Full migration =====

    /// Run all phases, recording the run in the store's history
    pub async fn migrate(&self) -> Result<MigrationReport> {
        let run_id = self.store.begin_run()?;
        let started = Instant::now();
        info!(run_id, "migration run started");

        let result = self.run_phases().await;
        self.conclude(run_id, started, result)
    }

    async fn run_phases(&self) -> Result<()> {
        self.prepare_resume()?;
        self.extract_phase().await?;
        self.settle_phase().await
    }

    /// Close the run record and decide the outcome
    fn conclude(
        &self,
        run_id: i64,
        started: Instant,
        result: Result<()>,
    ) -> Result<MigrationReport> {
        match result {
            Ok(()) => {
                let report = MigrationReport::collect(&self.store)?;
                let outcome = if self.cancel.is_cancelled() {
                    RunOutcome::Aborted
                } else if report.clean() {
                    RunOutcome::Completed
                } else {
                    RunOutcome::PartiallyCompleted
                };
                self.store.finish_run(run_id, outcome, None)?;
                info!(
                    run_id,
                    outcome = %outcome,
                    loaded = report.total_loaded(),
                    failed = report.total_failed(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "migration run finished"
                );
                Ok(report)
            }
            Err(e) => {
                self.store
                    .finish_run(run_id, RunOutcome::Aborted, Some(&e.to_string()))?;
                error!(run_id, error = %e, "migration run aborted");
                Err(e)
            }
        }
    }

    /// Reschedule failed work from previous runs
    fn prepare_resume(&self) -> Result<()> {
        for entity_type in self.config.selected_types() {
            let reset = self.store.reset_failed(entity_type)?;
            if reset > 0 {
                info!(entity_type = %entity_type, reset, "re-staged failed entities for retry");
            }
            self.store.clear_type_failure(entity_type)?;
        }
        Ok(())
    }

    // ===== Standalone phases =====

    /// Run extraction only, leaving transform and load untouched
    pub async fn extract(&self) -> Result<MigrationReport> {
        self.extract_phase().await?;
        self.report()
    }

    /// Run one transform pass per selected type
    ///
    /// Without interleaved loads no new correlations appear, so repeated
    /// passes cannot resolve more than the first; deferred entities stay
    /// `staged` rather than being failed.
    pub fn transform(&self) -> Result<MigrationReport> {
        for entity_type in self.config.selected_types() {
            if self.cancel.is_cancelled() {
                break;
            }
            let rules = self.config.mapping_rules(entity_type)?;
            let transformer = Transformer::new(&self.store, entity_type, rules);
            let stats = transformer.run_pass()?;
            info!(
                entity_type = %entity_type,
                transformed = stats.transformed,
                deferred = stats.deferred,
                failed = stats.failed,
                "transform pass finished"
            );
        }
        self.report()
    }

    /// Load everything currently `transformed`
    pub async fn load(&self) -> Result<MigrationReport> {
        let loader = self.loader();
        for entity_type in self.config.selected_types() {
            if self.cancel.is_cancelled() {
                break;
            }
            let endpoints = self.config.dest_endpoints(entity_type)?;
            match loader.load_type(entity_type, &endpoints).await {
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!(entity_type = %entity_type, error = %e, "load failed for entity type");
                    self.store.mark_type_failed(entity_type, &e.to_string())?;
                }
            }
        }
        self.report()
    }

    /// Snapshot the store into a report
    pub fn report(&self) -> Result<MigrationReport> {
        MigrationReport::collect(&self.store)
    }

    // ===== Extraction phase =====

    async fn extract_phase(&self) -> Result<()> {
        let extractor = Extractor::new(
            Arc::clone(&self.source),
            Arc::clone(&self.store),
            self.config.migration.attachments_dir(),
            self.cancel.clone(),
        );
        for entity_type in self.config.selected_types() {
            if self.cancel.is_cancelled() {
                info!("cancellation requested, stopping extraction");
                break;
            }
            if let Some(dep) = self.failed_dependency(entity_type)? {
                let reason = format!("dependency '{dep}' failed");
                warn!(entity_type = %entity_type, dependency = %dep, "skipping extraction");
                self.store.mark_type_failed(entity_type, &reason)?;
                continue;
            }
            let endpoints = self.config.source_endpoints(entity_type)?;
            match extractor.extract_type(entity_type, &endpoints).await {
                Ok(stats) => {
                    if stats.download_failures > 0 {
                        warn!(
                            entity_type = %entity_type,
                            failures = stats.download_failures,
                            "attachment downloads failed"
                        );
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!(entity_type = %entity_type, error = %e, "extraction failed for entity type");
                    self.store.mark_type_failed(entity_type, &e.to_string())?;
                }
            }
        }
        Ok(())
    }

    /// First dependency of `entity_type` that has failed as a whole
    fn failed_dependency(&self, entity_type: EntityType) -> Result<Option<EntityType>> {
        for &dep in entity_type.dependencies() {
            if self.store.type_failed(dep)? {
                return Ok(Some(dep));
            }
        }
        Ok(None)
    }

    // ===== Transform/load settlement =====

    async fn settle_phase(&self) -> Result<()> {
        let loader = self.loader();
        for entity_type in self.config.selected_types() {
            if self.cancel.is_cancelled() {
                info!("cancellation requested, stopping settlement");
                break;
            }
            if self.store.type_failed(entity_type)? {
                debug!(entity_type = %entity_type, "skipping settlement, entity type failed");
                continue;
            }
            match self.settle_type(&loader, entity_type).await {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!(entity_type = %entity_type, error = %e, "settlement failed for entity type");
                    self.store.mark_type_failed(entity_type, &e.to_string())?;
                }
            }
        }
        Ok(())
    }

    /// Alternate transform and load for one type until it settles
    async fn settle_type(&self, loader: &Loader, entity_type: EntityType) -> Result<()> {
        let rules = self.config.mapping_rules(entity_type)?;
        let endpoints = self.config.dest_endpoints(entity_type)?;
        let transformer = Transformer::new(&self.store, entity_type, rules);
        let started = Instant::now();

        let mut rounds = 0u32;
        while rounds < self.config.migration.max_transform_passes {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            rounds += 1;
            self.store.set_phase(entity_type, Phase::Transform)?;
            let pass = transformer.run_pass()?;
            self.store.set_phase(entity_type, Phase::Load)?;
            let load = loader.load_type(entity_type, &endpoints).await?;
            debug!(
                entity_type = %entity_type,
                round = rounds,
                transformed = pass.transformed,
                deferred = pass.deferred,
                loaded = load.loaded,
                skipped = load.skipped,
                "settlement round finished"
            );
            if !self.unfinished(entity_type)? {
                break;
            }
            if !pass.made_progress() && !load.made_progress() {
                break;
            }
        }
        if self.cancel.is_cancelled() {
            return Ok(());
        }

        let unresolved = transformer.fail_unresolved()?;
        if unresolved > 0 {
            warn!(
                entity_type = %entity_type,
                unresolved,
                "entities failed with unresolvable dependencies"
            );
        }
        self.store.set_phase(entity_type, Phase::Done)?;
        info!(
            entity_type = %entity_type,
            rounds,
            duration_ms = started.elapsed().as_millis() as u64,
            "entity type settled"
        );
        Ok(())
    }

    fn loader(&self) -> Loader {
        Loader::new(
            Arc::clone(&self.dest),
            Arc::clone(&self.store),
            self.config.migration.batch_size,
            self.config.migration.max_rollback_retries,
            self.cancel.clone(),
        )
    }

    /// Whether any entity of this type is still short of `loaded`/`failed`
    fn unfinished(&self, entity_type: EntityType) -> Result<bool> {
        let counts = self.store.counts()?;
        Ok(counts
            .get(&entity_type)
            .is_some_and(|c| c.has_unfinished()))
    }

    // ===== Validation =====

    /// Check configuration, connectivity and store consistency
    pub async fn validate(&self) -> Result<ValidationReport> {
        let mut report = ValidationReport::default();
        report.record("mapping rules resolve", self.check_mappings());
        report.record("endpoints resolve", self.check_endpoints());
        report.record("source API reachable", self.check_api(true).await);
        report.record("destination API reachable", self.check_api(false).await);
        report.record(
            "no loaded entity lacks a correlation",
            describe_refs(self.store.loaded_without_correlation()?),
        );
        report.record(
            "no correlation lacks a loaded entity",
            describe_refs(self.store.orphaned_correlations()?),
        );
        Ok(report)
    }

    fn check_mappings(&self) -> Result<()> {
        for entity_type in self.config.selected_types() {
            self.config.mapping_rules(entity_type)?;
        }
        Ok(())
    }

    fn check_endpoints(&self) -> Result<()> {
        for entity_type in self.config.selected_types() {
            self.config.source_endpoints(entity_type)?;
            self.config.dest_endpoints(entity_type)?;
        }
        Ok(())
    }

    async fn check_api(&self, source: bool) -> Result<()> {
        let platform = if source {
            &self.config.source.platform
        } else {
            &self.config.destination.platform
        };
        let Some(check) = platforms::profile(platform).and_then(|p| p.check.as_ref()) else {
            return Ok(());
        };
        if source {
            self.source.check(check).await
        } else {
            self.dest.check(check).await
        }
    }
}

/// Turn a list of inconsistent entities into a check failure
fn describe_refs(refs: Vec<EntityRef>) -> Result<()> {
    if refs.is_empty() {
        return Ok(());
    }
    let shown = refs
        .iter()
        .take(5)
        .map(EntityRef::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    let detail = if refs.len() > 5 {
        format!("{shown}, and {} more", refs.len() - 5)
    } else {
        shown
    };
    Err(Error::validation(format!(
        "{} inconsistent: {detail}",
        refs.len()
    )))
}
