//! Durable staging store
//!
//! # Overview
//!
//! Everything the pipeline needs to survive a restart lives in one SQLite
//! database inside the working directory: extracted entities with their
//! status flags, the source-to-destination correlation map, per-type
//! checkpoints and the run history. Extraction commits each page and its
//! checkpoint in a single transaction, which is what makes resume safe: a
//! crash can lose an uncommitted page but never record a page twice or
//! leave a staged page outside the checkpoint.

mod staging;
mod types;

pub use staging::StagingStore;
pub use types::{
    Checkpoint, CorrelationEntry, FailureRecord, MigrationRun, NewEntity, SourceEntity, TypeCounts,
};
