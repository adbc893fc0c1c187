//! Loading service
//!
//! Submits transformed entities to the destination in batches. Every
//! successful create records a correlation and marks the entity `loaded`;
//! an entity that already has a correlation is skipped, which is what makes
//! re-running a load idempotent. Entity-level rejections mark just that
//! entity `failed`. An integrity violation rolls the whole batch back:
//! compensating deletes against the destination, correlations removed, the
//! batch reverted to `transformed` for retry, bounded by the configured
//! rollback-retry budget.
//!
//! Attachments submit as binary uploads: the transformed payload names the
//! parent (`parent_type`, `parent_id`), the staged blob (`file_path`) and
//! the upload metadata (`name`, `content_type`).

use crate::api::DestinationApi;
use crate::error::{Error, Result};
use crate::json;
use crate::platforms::EntityEndpoints;
use crate::store::{SourceEntity, StagingStore};
use crate::types::{CancelToken, EntityStatus, EntityType};
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Counters for one entity type's load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Entities created on the destination
    pub loaded: u64,
    /// Entities skipped because a correlation already existed
    pub skipped: u64,
    /// Entities marked failed
    pub failed: u64,
    /// Batch rollbacks performed
    pub rollbacks: u64,
}

impl LoadStats {
    /// Whether the load moved any entity forward
    pub fn made_progress(&self) -> bool {
        self.loaded > 0 || self.skipped > 0
    }

    fn merge_persistent(&mut self, other: LoadStats) {
        // A rolled-back batch keeps its skips and entity-level failures;
        // only the creates were undone
        self.skipped += other.skipped;
        self.failed += other.failed;
    }

    fn merge(&mut self, other: LoadStats) {
        self.loaded += other.loaded;
        self.merge_persistent(other);
    }
}

enum BatchOutcome {
    Completed,
    RolledBack,
}

/// Loads transformed entities into the destination
pub struct Loader {
    api: Arc<DestinationApi>,
    store: Arc<StagingStore>,
    batch_size: usize,
    max_rollback_retries: u32,
    cancel: CancelToken,
}

impl Loader {
    /// Create a loader
    pub fn new(
        api: Arc<DestinationApi>,
        store: Arc<StagingStore>,
        batch_size: usize,
        max_rollback_retries: u32,
        cancel: CancelToken,
    ) -> Self {
        Self {
            api,
            store,
            batch_size,
            max_rollback_retries,
            cancel,
        }
    }

    /// Load every transformed entity of one type, batch by batch
    ///
    /// Cancellation is observed between batches. Fatal errors propagate;
    /// everything else is settled entity by entity.
    pub async fn load_type(
        &self,
        entity_type: EntityType,
        endpoints: &EntityEndpoints,
    ) -> Result<LoadStats> {
        let mut stats = LoadStats::default();
        let mut rollback_attempts: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let batch = self.store.transformed_batch(entity_type, self.batch_size)?;
            if batch.is_empty() {
                break;
            }

            let (batch_stats, outcome) =
                self.load_batch(entity_type, endpoints, &batch).await?;
            match outcome {
                BatchOutcome::Completed => {
                    stats.merge(batch_stats);
                    rollback_attempts = 0;
                }
                BatchOutcome::RolledBack => {
                    stats.merge_persistent(batch_stats);
                    stats.rollbacks += 1;
                    rollback_attempts += 1;
                    if rollback_attempts >= self.max_rollback_retries {
                        stats.failed += self.fail_batch(entity_type, &batch)?;
                        rollback_attempts = 0;
                    }
                }
            }
        }

        if stats.loaded > 0 || stats.failed > 0 || stats.rollbacks > 0 {
            info!(
                entity_type = %entity_type,
                loaded = stats.loaded,
                skipped = stats.skipped,
                failed = stats.failed,
                rollbacks = stats.rollbacks,
                "load finished"
            );
        }
        Ok(stats)
    }

    /// Submit one batch
    ///
    /// Runs to the end of the batch unless an integrity violation or a fatal
    /// error interrupts it; integrity triggers the compensating rollback.
    async fn load_batch(
        &self,
        entity_type: EntityType,
        endpoints: &EntityEndpoints,
        batch: &[SourceEntity],
    ) -> Result<(LoadStats, BatchOutcome)> {
        let mut stats = LoadStats::default();
        let mut created: Vec<(String, String)> = Vec::new();

        for entity in batch {
            if let Some(dest_id) = self.store.correlation(entity_type, &entity.source_id)? {
                debug!(
                    entity_type = %entity_type,
                    source_id = %entity.source_id,
                    dest_id = %dest_id,
                    "already loaded, skipping"
                );
                self.store.mark_loaded(entity_type, &entity.source_id)?;
                stats.skipped += 1;
                continue;
            }

            let Some(payload) = entity.transformed_payload.as_ref() else {
                self.store.mark_failed(
                    entity_type,
                    &entity.source_id,
                    "transformed payload missing from staging store",
                )?;
                stats.failed += 1;
                continue;
            };

            match self.submit(entity_type, endpoints, payload).await {
                Ok(dest_id) => {
                    self.store
                        .insert_correlation(entity_type, &entity.source_id, &dest_id)?;
                    self.store.mark_loaded(entity_type, &entity.source_id)?;
                    created.push((entity.source_id.clone(), dest_id));
                    stats.loaded += 1;
                }
                Err(e) if e.is_integrity() => {
                    warn!(
                        entity_type = %entity_type,
                        source_id = %entity.source_id,
                        error = %e,
                        created = created.len(),
                        "integrity violation, rolling back batch"
                    );
                    self.rollback(entity_type, endpoints, &created).await?;
                    return Ok((stats, BatchOutcome::RolledBack));
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(
                        entity_type = %entity_type,
                        source_id = %entity.source_id,
                        error = %e,
                        "load failed"
                    );
                    self.store
                        .mark_failed(entity_type, &entity.source_id, &e.to_string())?;
                    stats.failed += 1;
                }
            }
        }

        Ok((stats, BatchOutcome::Completed))
    }

    /// Submit one payload: binary upload for attachment-style types,
    /// JSON create for everything else
    async fn submit(
        &self,
        entity_type: EntityType,
        endpoints: &EntityEndpoints,
        payload: &Value,
    ) -> Result<String> {
        if !endpoints.upload.is_empty() {
            return self.submit_upload(endpoints, payload).await;
        }
        let create = endpoints.create.as_ref().ok_or_else(|| {
            Error::config(format!("no create endpoint for entity type '{entity_type}'"))
        })?;
        self.api.create(create, payload).await
    }

    async fn submit_upload(&self, endpoints: &EntityEndpoints, payload: &Value) -> Result<String> {
        let parent_type: EntityType = json::extract_string(payload, "$.parent_type")
            .ok_or_else(|| Error::validation("mapped payload has no parent_type"))?
            .parse()?;
        let parent_id = json::extract_string(payload, "$.parent_id")
            .ok_or_else(|| Error::validation("mapped payload has no parent_id"))?;
        let endpoint = endpoints
            .upload
            .iter()
            .find(|u| u.parent == parent_type)
            .ok_or_else(|| {
                Error::config(format!("no upload endpoint for parent type '{parent_type}'"))
            })?;

        let file_path = json::extract_string(payload, "$.file_path")
            .ok_or_else(|| Error::validation("mapped payload has no file_path"))?;
        let name = json::extract_string(payload, "$.name")
            .ok_or_else(|| Error::validation("mapped payload has no name"))?;
        let content_type = json::extract_string(payload, "$.content_type")
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let data = tokio::fs::read(&file_path).await.map_err(|e| {
            Error::validation(format!("attachment blob '{file_path}' unreadable: {e}"))
        })?;

        self.api
            .upload(endpoint, &parent_id, &name, &content_type, Bytes::from(data))
            .await
    }

    /// Compensating deletes for everything created in this batch, newest
    /// first; each undone entity loses its correlation and reverts
    async fn rollback(
        &self,
        entity_type: EntityType,
        endpoints: &EntityEndpoints,
        created: &[(String, String)],
    ) -> Result<()> {
        if created.is_empty() {
            return Ok(());
        }
        let delete = endpoints.delete.as_ref().ok_or_else(|| {
            Error::config(format!(
                "no delete endpoint to roll back entity type '{entity_type}'"
            ))
        })?;

        for (source_id, dest_id) in created.iter().rev() {
            self.api.delete(delete, dest_id).await?;
            self.store.remove_correlation(entity_type, source_id)?;
            self.store.revert_to_transformed(entity_type, source_id)?;
        }
        info!(
            entity_type = %entity_type,
            reverted = created.len(),
            "batch rolled back"
        );
        Ok(())
    }

    /// Permanently fail what is left of a batch after rollback retries ran out
    fn fail_batch(&self, entity_type: EntityType, batch: &[SourceEntity]) -> Result<u64> {
        let mut failed = 0;
        for entity in batch {
            if self.store.entity_status(entity_type, &entity.source_id)?
                == Some(EntityStatus::Transformed)
            {
                self.store.mark_failed(
                    entity_type,
                    &entity.source_id,
                    "integrity violation persisted through rollback retries",
                )?;
                failed += 1;
            }
        }
        warn!(
            entity_type = %entity_type,
            count = failed,
            "batch failed permanently after rollback retries"
        );
        Ok(failed)
    }
}

#[cfg(test)]
mod tests;
