//! Staging store row types

use crate::pagination::PageCursor;
use crate::types::{EntityRef, EntityStatus, EntityType, Phase, RunOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One extracted entity as staged in the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEntity {
    /// Entity type tag
    pub entity_type: EntityType,
    /// Source-system identifier, unique per entity type
    pub source_id: String,
    /// Raw payload as returned by the source API
    pub payload: Value,
    /// Parent references by source ID
    pub parent_refs: Vec<EntityRef>,
    /// Staging status
    pub status: EntityStatus,
    /// Failure reason, set when status is `failed`
    pub failure_reason: Option<String>,
    /// Destination-shaped payload, present between transform and load
    pub transformed_payload: Option<Value>,
    /// When extraction staged this entity
    pub extracted_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

/// A freshly extracted entity, before it has a store row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEntity {
    /// Source-system identifier
    pub source_id: String,
    /// Raw payload
    pub payload: Value,
    /// Parent references by source ID
    pub parent_refs: Vec<EntityRef>,
}

impl NewEntity {
    pub fn new(source_id: impl Into<String>, payload: Value) -> Self {
        Self {
            source_id: source_id.into(),
            payload,
            parent_refs: Vec::new(),
        }
    }

    pub fn with_refs(mut self, refs: Vec<EntityRef>) -> Self {
        self.parent_refs = refs;
        self
    }
}

/// One source-ID to destination-ID mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationEntry {
    pub entity_type: EntityType,
    pub source_id: String,
    pub dest_id: String,
    pub created_at: DateTime<Utc>,
}

/// Per-entity-type progress marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Entity type this checkpoint tracks
    pub entity_type: EntityType,
    /// Phase the type has reached
    pub phase: Phase,
    /// Extraction cursor, valid while phase is `extract`
    pub cursor: PageCursor,
    /// Pages committed so far
    pub pages_done: u64,
    /// Whether the whole type failed (extraction exhausted retries)
    pub failed: bool,
    /// Reason for a type-level failure
    pub failure_reason: Option<String>,
    /// Last checkpoint write
    pub updated_at: DateTime<Utc>,
}

/// One recorded pipeline invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRun {
    pub id: i64,
    pub status: RunOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Per-status entity counts for one entity type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeCounts {
    pub pending: u64,
    pub staged: u64,
    pub transformed: u64,
    pub loaded: u64,
    pub failed: u64,
}

impl TypeCounts {
    /// Total entities of this type in the store
    pub fn total(&self) -> u64 {
        self.pending + self.staged + self.transformed + self.loaded + self.failed
    }

    /// Whether anything of this type still needs work
    pub fn has_unfinished(&self) -> bool {
        self.pending + self.staged + self.transformed > 0
    }
}

/// One failed entity with its recorded reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub entity_type: EntityType,
    pub source_id: String,
    pub reason: String,
}
