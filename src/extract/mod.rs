//! Extraction service
//!
//! Pulls entities out of the source API and stages them durably. Regular
//! types go through a paginated listing; each page and its checkpoint commit
//! in one transaction, so a crash between pages resumes at the exact page
//! the checkpoint recorded. The fetch task and the store writer run as a
//! producer/consumer pair over a bounded channel: fetching the next page
//! overlaps committing the previous one, and the channel keeps the fetcher
//! from outrunning durable commits.
//!
//! Attachments have no project-wide listing. They are discovered per parent
//! entity, their binaries streamed to the work directory, and the checkpoint
//! cursor counts parents processed instead of pages.

use crate::api::SourceApi;
use crate::error::{Error, Result};
use crate::pagination::PageCursor;
use crate::platforms::EntityEndpoints;
use crate::store::{NewEntity, StagingStore};
use crate::types::{CancelToken, EntityRef, EntityType, Phase};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Pages buffered between the fetch task and the store writer
const PAGE_CHANNEL_CAPACITY: usize = 4;

/// Payload key carrying the local path of a downloaded binary
pub const LOCAL_PATH_FIELD: &str = "local_path";

/// Counters for one entity type's extraction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractStats {
    /// Pages (or parent listings) committed
    pub pages: u64,
    /// Entities newly staged
    pub staged: u64,
    /// Attachment downloads that failed entity-level
    pub download_failures: u64,
}

/// Stages source entities one type at a time
pub struct Extractor {
    api: Arc<SourceApi>,
    store: Arc<StagingStore>,
    attachments_dir: PathBuf,
    cancel: CancelToken,
}

impl Extractor {
    /// Create an extractor
    pub fn new(
        api: Arc<SourceApi>,
        store: Arc<StagingStore>,
        attachments_dir: PathBuf,
        cancel: CancelToken,
    ) -> Self {
        Self {
            api,
            store,
            attachments_dir,
            cancel,
        }
    }

    /// Extract one entity type, resuming from its checkpoint
    ///
    /// Returns without work when the type is already past extraction. On
    /// clean completion the type's phase advances to `transform`; on
    /// cancellation the checkpoint stays mid-extraction for the next run.
    pub async fn extract_type(
        &self,
        entity_type: EntityType,
        endpoints: &EntityEndpoints,
    ) -> Result<ExtractStats> {
        let cursor = match self.store.checkpoint(entity_type)? {
            Some(cp) if cp.phase != Phase::Extract => {
                debug!(entity_type = %entity_type, phase = %cp.phase, "extraction already complete");
                return Ok(ExtractStats::default());
            }
            Some(cp) if cp.cursor.done => {
                // Crashed between the final page commit and the phase change
                self.store.set_phase(entity_type, Phase::Transform)?;
                return Ok(ExtractStats::default());
            }
            Some(cp) => cp.cursor,
            None => PageCursor::new(),
        };

        let stats = if endpoints.list.is_some() {
            self.extract_paged(entity_type, endpoints, cursor).await?
        } else if !endpoints.list_per_parent.is_empty() {
            self.extract_per_parent(entity_type, endpoints, cursor)
                .await?
        } else {
            return Err(Error::config(format!(
                "no listing endpoints for entity type '{entity_type}'"
            )));
        };

        let finished = self
            .store
            .checkpoint(entity_type)?
            .is_some_and(|cp| cp.cursor.done);
        if finished {
            self.store.set_phase(entity_type, Phase::Transform)?;
            info!(
                entity_type = %entity_type,
                pages = stats.pages,
                staged = stats.staged,
                "extraction complete"
            );
        } else {
            info!(entity_type = %entity_type, pages = stats.pages, "extraction interrupted");
        }
        Ok(stats)
    }

    /// Paginated listing: fetch task produces pages, this task commits them
    async fn extract_paged(
        &self,
        entity_type: EntityType,
        endpoints: &EntityEndpoints,
        mut cursor: PageCursor,
    ) -> Result<ExtractStats> {
        let (tx, mut rx) = mpsc::channel::<(Vec<NewEntity>, PageCursor)>(PAGE_CHANNEL_CAPACITY);

        let api = Arc::clone(&self.api);
        let fetch_endpoints = endpoints.clone();
        let cancel = self.cancel.clone();
        let fetcher = tokio::spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    return Ok::<(), Error>(());
                }
                let (entities, next) = api
                    .fetch_page(entity_type, &fetch_endpoints, &mut cursor)
                    .await?;
                let done = next.is_done();
                if tx.send((entities, cursor.clone())).await.is_err() {
                    // Store writer went away; its error surfaces there
                    return Ok(());
                }
                if done {
                    return Ok(());
                }
            }
        });

        let mut stats = ExtractStats::default();
        while let Some((entities, page_cursor)) = rx.recv().await {
            let staged = self.store.commit_page(entity_type, &entities, &page_cursor)?;
            stats.pages += 1;
            stats.staged += staged as u64;
        }

        match fetcher.await {
            Ok(Ok(())) => Ok(stats),
            Ok(Err(e)) => Err(e),
            Err(e) => Err(Error::Other(format!("extraction fetch task failed: {e}"))),
        }
    }

    /// Per-parent discovery for attachments
    ///
    /// The cursor's offset counts parents already processed, in the stable
    /// order given by the profile's parent listings and each parent type's
    /// extraction order. One parent's listing, downloads and checkpoint
    /// commit as a unit.
    async fn extract_per_parent(
        &self,
        entity_type: EntityType,
        endpoints: &EntityEndpoints,
        mut cursor: PageCursor,
    ) -> Result<ExtractStats> {
        let mut parents: Vec<(usize, EntityRef)> = Vec::new();
        for (endpoint_idx, listing) in endpoints.list_per_parent.iter().enumerate() {
            for source_id in self.store.source_ids(listing.parent)? {
                parents.push((endpoint_idx, EntityRef::new(listing.parent, source_id)));
            }
        }

        let mut stats = ExtractStats::default();
        let total = parents.len() as u64;
        for (idx, (endpoint_idx, parent)) in parents.into_iter().enumerate() {
            if (idx as u64) < cursor.offset {
                continue;
            }
            if self.cancel.is_cancelled() {
                return Ok(stats);
            }

            let listing = &endpoints.list_per_parent[endpoint_idx];
            let mut entities = self
                .api
                .list_children(entity_type, endpoints, listing, &parent)
                .await?;

            let mut failures: Vec<(String, String)> = Vec::new();
            if let Some(download) = &endpoints.download {
                for entity in &mut entities {
                    let target = self.attachments_dir.join(&entity.source_id);
                    match self.api.download(download, &entity.source_id, &target).await {
                        Ok(bytes) => {
                            if let Value::Object(payload) = &mut entity.payload {
                                payload.insert(
                                    LOCAL_PATH_FIELD.to_string(),
                                    Value::String(target.display().to_string()),
                                );
                                payload.insert("size_bytes".to_string(), Value::from(bytes));
                            }
                        }
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => {
                            warn!(
                                entity_type = %entity_type,
                                source_id = %entity.source_id,
                                error = %e,
                                "binary download failed"
                            );
                            failures.push((
                                entity.source_id.clone(),
                                format!("binary download failed: {e}"),
                            ));
                        }
                    }
                }
            }

            cursor.offset = idx as u64 + 1;
            cursor.done = cursor.offset >= total;
            let staged = self.store.commit_page(entity_type, &entities, &cursor)?;
            for (source_id, reason) in &failures {
                self.store.mark_failed(entity_type, source_id, reason)?;
            }
            stats.pages += 1;
            stats.staged += staged as u64;
            stats.download_failures += failures.len() as u64;
        }

        // No parents at all still finishes the type
        if total == 0 {
            cursor.done = true;
            self.store.commit_page(entity_type, &[], &cursor)?;
        }
        Ok(stats)
    }
}
