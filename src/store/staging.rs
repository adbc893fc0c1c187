//! SQLite-backed staging store
//!
//! All pipeline state lives here: raw extracted entities, the correlation
//! map, per-type checkpoints and run history. Writes go through a single
//! connection behind a mutex; page writes and checkpoint advancement share
//! one transaction so a crash can never record one without the other.

use super::types::{
    Checkpoint, CorrelationEntry, FailureRecord, MigrationRun, NewEntity, SourceEntity, TypeCounts,
};
use crate::error::{Error, Result};
use crate::pagination::PageCursor;
use crate::types::{EntityRef, EntityStatus, EntityType, Phase, RunOutcome};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Schema, applied idempotently on open
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS source_entities (
    entity_type         TEXT NOT NULL,
    source_id           TEXT NOT NULL,
    payload             TEXT NOT NULL,
    parent_refs         TEXT NOT NULL DEFAULT '[]',
    status              TEXT NOT NULL DEFAULT 'staged',
    failure_reason      TEXT,
    transformed_payload TEXT,
    extracted_at        TEXT NOT NULL,
    updated_at          TEXT NOT NULL,
    PRIMARY KEY (entity_type, source_id)
);

CREATE INDEX IF NOT EXISTS idx_source_entities_status
    ON source_entities (entity_type, status);

CREATE TABLE IF NOT EXISTS correlations (
    entity_type TEXT NOT NULL,
    source_id   TEXT NOT NULL,
    dest_id     TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    PRIMARY KEY (entity_type, source_id)
);

CREATE TABLE IF NOT EXISTS checkpoints (
    entity_type    TEXT PRIMARY KEY,
    phase          TEXT NOT NULL DEFAULT 'extract',
    cursor         TEXT NOT NULL DEFAULT '{}',
    pages_done     INTEGER NOT NULL DEFAULT 0,
    type_failed    INTEGER NOT NULL DEFAULT 0,
    failure_reason TEXT,
    updated_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS migration_runs (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    status      TEXT NOT NULL,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    error       TEXT
);
";

const ENTITY_COLUMNS: &str = "entity_type, source_id, payload, parent_refs, status, \
     failure_reason, transformed_payload, extracted_at, updated_at";

/// Durable staging store for one migration working directory
pub struct StagingStore {
    conn: Mutex<Connection>,
}

impl StagingStore {
    /// Open (or create) the store at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::config(format!("Cannot create workdir {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open an in-memory store (tests)
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        // WAL keeps readers unblocked during page commits; a no-op in memory
        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================================================
    // Entities
    // ========================================================================

    /// Stage one page of extracted entities and advance the extraction
    /// checkpoint in the same transaction
    ///
    /// Re-fetched entities (after a resume) are ignored, not overwritten, so
    /// re-committing a page is idempotent. Returns the number of newly
    /// staged entities.
    pub fn commit_page(
        &self,
        entity_type: EntityType,
        entities: &[NewEntity],
        cursor: &PageCursor,
    ) -> Result<usize> {
        let now = Utc::now().to_rfc3339();
        let cursor_json = serde_json::to_string(cursor)?;

        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let mut inserted = 0;
        for entity in entities {
            let payload = serde_json::to_string(&entity.payload)?;
            let refs = serde_json::to_string(&entity.parent_refs)?;
            inserted += tx.execute(
                "INSERT OR IGNORE INTO source_entities \
                 (entity_type, source_id, payload, parent_refs, status, extracted_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, 'staged', ?5, ?5)",
                params![entity_type.as_str(), entity.source_id, payload, refs, now],
            )?;
        }

        tx.execute(
            "INSERT INTO checkpoints (entity_type, phase, cursor, pages_done, updated_at) \
             VALUES (?1, 'extract', ?2, 1, ?3) \
             ON CONFLICT(entity_type) DO UPDATE SET \
                 cursor = excluded.cursor, \
                 pages_done = checkpoints.pages_done + 1, \
                 updated_at = excluded.updated_at",
            params![entity_type.as_str(), cursor_json, now],
        )?;

        tx.commit()?;
        tracing::debug!(
            entity_type = %entity_type,
            staged = inserted,
            offset = cursor.offset,
            page = cursor.page,
            "page committed"
        );
        Ok(inserted)
    }

    /// Fetch one entity
    pub fn entity(
        &self,
        entity_type: EntityType,
        source_id: &str,
    ) -> Result<Option<SourceEntity>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {ENTITY_COLUMNS} FROM source_entities \
             WHERE entity_type = ?1 AND source_id = ?2"
        );
        let raw = conn
            .query_row(&sql, params![entity_type.as_str(), source_id], row_to_raw)
            .optional()?;
        raw.map(finish_entity).transpose()
    }

    /// Status of one entity, if it exists
    pub fn entity_status(
        &self,
        entity_type: EntityType,
        source_id: &str,
    ) -> Result<Option<EntityStatus>> {
        let conn = self.conn();
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM source_entities WHERE entity_type = ?1 AND source_id = ?2",
                params![entity_type.as_str(), source_id],
                |row| row.get(0),
            )
            .optional()?;
        status.map(|s| s.parse()).transpose()
    }

    /// All entities of one type with the given status, in extraction order
    pub fn entities_with_status(
        &self,
        entity_type: EntityType,
        status: EntityStatus,
    ) -> Result<Vec<SourceEntity>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {ENTITY_COLUMNS} FROM source_entities \
             WHERE entity_type = ?1 AND status = ?2 ORDER BY rowid"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![entity_type.as_str(), status.as_str()], row_to_raw)?;
        rows.map(|raw| finish_entity(raw?)).collect()
    }

    /// Up to `limit` transformed entities of one type, in extraction order
    pub fn transformed_batch(
        &self,
        entity_type: EntityType,
        limit: usize,
    ) -> Result<Vec<SourceEntity>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {ENTITY_COLUMNS} FROM source_entities \
             WHERE entity_type = ?1 AND status = 'transformed' ORDER BY rowid LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![entity_type.as_str(), limit as i64], row_to_raw)?;
        rows.map(|raw| finish_entity(raw?)).collect()
    }

    /// All source IDs of one type regardless of status, in extraction order
    pub fn source_ids(&self, entity_type: EntityType) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT source_id FROM source_entities WHERE entity_type = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![entity_type.as_str()], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
    }

    /// Source IDs of one type with the given status, in extraction order
    pub fn source_ids_with_status(
        &self,
        entity_type: EntityType,
        status: EntityStatus,
    ) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT source_id FROM source_entities \
             WHERE entity_type = ?1 AND status = ?2 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![entity_type.as_str(), status.as_str()], |row| {
            row.get(0)
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
    }

    /// Record a successful transformation
    pub fn mark_transformed(
        &self,
        entity_type: EntityType,
        source_id: &str,
        payload: &Value,
    ) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE source_entities SET status = 'transformed', \
             transformed_payload = ?3, failure_reason = NULL, updated_at = ?4 \
             WHERE entity_type = ?1 AND source_id = ?2",
            params![
                entity_type.as_str(),
                source_id,
                serde_json::to_string(payload)?,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Record a successful load; the transformed payload is no longer needed
    pub fn mark_loaded(&self, entity_type: EntityType, source_id: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE source_entities SET status = 'loaded', \
             transformed_payload = NULL, failure_reason = NULL, updated_at = ?3 \
             WHERE entity_type = ?1 AND source_id = ?2",
            params![entity_type.as_str(), source_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Record an entity-level failure with its reason
    pub fn mark_failed(
        &self,
        entity_type: EntityType,
        source_id: &str,
        reason: &str,
    ) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE source_entities SET status = 'failed', failure_reason = ?3, updated_at = ?4 \
             WHERE entity_type = ?1 AND source_id = ?2",
            params![
                entity_type.as_str(),
                source_id,
                reason,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Put a loaded-then-rolled-back entity back into the load queue
    pub fn revert_to_transformed(&self, entity_type: EntityType, source_id: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE source_entities SET status = 'transformed', updated_at = ?3 \
             WHERE entity_type = ?1 AND source_id = ?2",
            params![entity_type.as_str(), source_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Re-stage failed entities of one type for a retry run
    ///
    /// The raw payload is kept; the transformed payload and the failure
    /// reason are cleared so the entities go through transform again.
    pub fn reset_failed(&self, entity_type: EntityType) -> Result<u64> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE source_entities SET status = 'staged', failure_reason = NULL, \
             transformed_payload = NULL, updated_at = ?2 \
             WHERE entity_type = ?1 AND status = 'failed'",
            params![entity_type.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(changed as u64)
    }

    // ========================================================================
    // Correlations
    // ========================================================================

    /// Insert a correlation if none exists; returns whether it was inserted
    ///
    /// Correlations are immutable: a second insert for the same (type,
    /// source ID) is ignored, never an overwrite.
    pub fn insert_correlation(
        &self,
        entity_type: EntityType,
        source_id: &str,
        dest_id: &str,
    ) -> Result<bool> {
        let conn = self.conn();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO correlations (entity_type, source_id, dest_id, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                entity_type.as_str(),
                source_id,
                dest_id,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Destination ID for a source entity, if already loaded
    pub fn correlation(&self, entity_type: EntityType, source_id: &str) -> Result<Option<String>> {
        let conn = self.conn();
        Ok(conn
            .query_row(
                "SELECT dest_id FROM correlations WHERE entity_type = ?1 AND source_id = ?2",
                params![entity_type.as_str(), source_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Remove a correlation after a compensating delete
    pub fn remove_correlation(&self, entity_type: EntityType, source_id: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "DELETE FROM correlations WHERE entity_type = ?1 AND source_id = ?2",
            params![entity_type.as_str(), source_id],
        )?;
        Ok(())
    }

    /// All correlations for one entity type
    pub fn correlations(&self, entity_type: EntityType) -> Result<Vec<CorrelationEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT entity_type, source_id, dest_id, created_at FROM correlations \
             WHERE entity_type = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![entity_type.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        rows.map(|raw| {
            let (entity_type, source_id, dest_id, created_at) = raw?;
            Ok(CorrelationEntry {
                entity_type: entity_type.parse()?,
                source_id,
                dest_id,
                created_at: parse_ts(&created_at)?,
            })
        })
        .collect()
    }

    /// Loaded entities missing a correlation (consistency check)
    pub fn loaded_without_correlation(&self) -> Result<Vec<EntityRef>> {
        self.ref_query(
            "SELECT e.entity_type, e.source_id FROM source_entities e \
             LEFT JOIN correlations c \
               ON c.entity_type = e.entity_type AND c.source_id = e.source_id \
             WHERE e.status = 'loaded' AND c.dest_id IS NULL",
        )
    }

    /// Correlations whose source entity is gone (consistency check)
    pub fn orphaned_correlations(&self) -> Result<Vec<EntityRef>> {
        self.ref_query(
            "SELECT c.entity_type, c.source_id FROM correlations c \
             LEFT JOIN source_entities e \
               ON e.entity_type = c.entity_type AND e.source_id = c.source_id \
             WHERE e.source_id IS NULL",
        )
    }

    fn ref_query(&self, sql: &str) -> Result<Vec<EntityRef>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        rows.map(|raw| {
            let (entity_type, source_id) = raw?;
            Ok(EntityRef::new(entity_type.parse::<EntityType>()?, source_id))
        })
        .collect()
    }

    // ========================================================================
    // Checkpoints
    // ========================================================================

    /// Current checkpoint for one entity type
    pub fn checkpoint(&self, entity_type: EntityType) -> Result<Option<Checkpoint>> {
        let conn = self.conn();
        let raw = conn
            .query_row(
                "SELECT phase, cursor, pages_done, type_failed, failure_reason, updated_at \
                 FROM checkpoints WHERE entity_type = ?1",
                params![entity_type.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, bool>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;

        raw.map(|(phase, cursor, pages_done, failed, failure_reason, updated_at)| {
            Ok(Checkpoint {
                entity_type,
                phase: phase.parse()?,
                cursor: serde_json::from_str(&cursor)?,
                pages_done: pages_done as u64,
                failed,
                failure_reason,
                updated_at: parse_ts(&updated_at)?,
            })
        })
        .transpose()
    }

    /// Advance the phase for one entity type
    pub fn set_phase(&self, entity_type: EntityType, phase: Phase) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO checkpoints (entity_type, phase, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(entity_type) DO UPDATE SET \
                 phase = excluded.phase, updated_at = excluded.updated_at",
            params![entity_type.as_str(), phase.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Record a type-level failure (whole-type extraction gave up)
    pub fn mark_type_failed(&self, entity_type: EntityType, reason: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO checkpoints (entity_type, type_failed, failure_reason, updated_at) \
             VALUES (?1, 1, ?2, ?3) \
             ON CONFLICT(entity_type) DO UPDATE SET \
                 type_failed = 1, failure_reason = excluded.failure_reason, \
                 updated_at = excluded.updated_at",
            params![entity_type.as_str(), reason, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Whether the type hit a type-level failure
    pub fn type_failed(&self, entity_type: EntityType) -> Result<bool> {
        let conn = self.conn();
        let failed: Option<bool> = conn
            .query_row(
                "SELECT type_failed FROM checkpoints WHERE entity_type = ?1",
                params![entity_type.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(failed.unwrap_or(false))
    }

    /// Clear a type-level failure before a retry run
    pub fn clear_type_failure(&self, entity_type: EntityType) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE checkpoints SET type_failed = 0, failure_reason = NULL, updated_at = ?2 \
             WHERE entity_type = ?1",
            params![entity_type.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    // ========================================================================
    // Runs
    // ========================================================================

    /// Record the start of a pipeline invocation
    pub fn begin_run(&self) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO migration_runs (status, started_at) VALUES ('running', ?1)",
            params![Utc::now().to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Record the outcome of a pipeline invocation
    pub fn finish_run(&self, run_id: i64, outcome: RunOutcome, error: Option<&str>) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE migration_runs SET status = ?2, finished_at = ?3, error = ?4 WHERE id = ?1",
            params![run_id, outcome.as_str(), Utc::now().to_rfc3339(), error],
        )?;
        Ok(())
    }

    /// Run history, oldest first
    pub fn runs(&self) -> Result<Vec<MigrationRun>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, status, started_at, finished_at, error FROM migration_runs ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;
        rows.map(|raw| {
            let (id, status, started_at, finished_at, error) = raw?;
            Ok(MigrationRun {
                id,
                status: status.parse()?,
                started_at: parse_ts(&started_at)?,
                finished_at: finished_at.as_deref().map(parse_ts).transpose()?,
                error,
            })
        })
        .collect()
    }

    // ========================================================================
    // Reporting
    // ========================================================================

    /// Per-status entity counts for every entity type present in the store
    pub fn counts(&self) -> Result<BTreeMap<EntityType, TypeCounts>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT entity_type, status, COUNT(*) FROM source_entities \
             GROUP BY entity_type, status",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut counts: BTreeMap<EntityType, TypeCounts> = BTreeMap::new();
        for raw in rows {
            let (entity_type, status, count) = raw?;
            let entity_type: EntityType = entity_type.parse()?;
            let status: EntityStatus = status.parse()?;
            let entry = counts.entry(entity_type).or_default();
            let count = count as u64;
            match status {
                EntityStatus::Pending => entry.pending += count,
                EntityStatus::Staged => entry.staged += count,
                EntityStatus::Transformed => entry.transformed += count,
                EntityStatus::Loaded => entry.loaded += count,
                EntityStatus::Failed => entry.failed += count,
            }
        }
        Ok(counts)
    }

    /// Every failed entity with its recorded reason, in extraction order
    pub fn failures(&self) -> Result<Vec<FailureRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT entity_type, source_id, failure_reason FROM source_entities \
             WHERE status = 'failed' ORDER BY rowid",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;
        rows.map(|raw| {
            let (entity_type, source_id, reason) = raw?;
            Ok(FailureRecord {
                entity_type: entity_type.parse()?,
                source_id,
                reason: reason.unwrap_or_else(|| "unknown".to_string()),
            })
        })
        .collect()
    }
}

impl std::fmt::Debug for StagingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingStore").finish()
    }
}

type RawEntity = (
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    String,
);

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEntity> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn finish_entity(raw: RawEntity) -> Result<SourceEntity> {
    let (
        entity_type,
        source_id,
        payload,
        parent_refs,
        status,
        failure_reason,
        transformed_payload,
        extracted_at,
        updated_at,
    ) = raw;
    Ok(SourceEntity {
        entity_type: entity_type.parse()?,
        source_id,
        payload: serde_json::from_str(&payload)?,
        parent_refs: serde_json::from_str(&parent_refs)?,
        status: status.parse()?,
        failure_reason,
        transformed_payload: transformed_payload
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
        extracted_at: parse_ts(&extracted_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Other(format!("Invalid timestamp in store: {e}")))
}
