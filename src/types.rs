//! Common types used throughout the migration engine
//!
//! This module contains shared type definitions, type aliases,
//! and utility types used across multiple modules.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ============================================================================
// Type Aliases
// ============================================================================

/// JSON value type (re-exported from serde_json)
pub type JsonValue = serde_json::Value;

/// JSON object type
pub type JsonObject = serde_json::Map<String, JsonValue>;

/// Generic key-value map with string keys and values
pub type StringMap = HashMap<String, String>;

// ============================================================================
// Entity Type
// ============================================================================

/// A category of migrated test-management asset.
///
/// Types form a dependency DAG: a type is only processed once every type it
/// depends on has been processed. [`EntityType::FIXED_ORDER`] is a
/// topological order of that DAG and is the processing order everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Project-level custom field definitions
    CustomField,
    /// Folder / module hierarchy nodes
    Folder,
    /// Test case definitions
    TestCase,
    /// Test cycles (execution containers)
    Cycle,
    /// Individual test executions / runs
    Execution,
    /// Binary attachments on test cases and executions
    Attachment,
}

impl EntityType {
    /// All entity types in dependency order (parents before children)
    pub const FIXED_ORDER: [EntityType; 6] = [
        EntityType::CustomField,
        EntityType::Folder,
        EntityType::TestCase,
        EntityType::Cycle,
        EntityType::Execution,
        EntityType::Attachment,
    ];

    /// The entity types this type's records may reference as parents
    pub fn dependencies(&self) -> &'static [EntityType] {
        match self {
            EntityType::CustomField | EntityType::Folder => &[],
            EntityType::TestCase | EntityType::Cycle => &[EntityType::Folder],
            EntityType::Execution => &[EntityType::TestCase, EntityType::Cycle],
            EntityType::Attachment => &[EntityType::TestCase, EntityType::Execution],
        }
    }

    /// Stable string tag (matches serde representation and store rows)
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::CustomField => "custom_field",
            EntityType::Folder => "folder",
            EntityType::TestCase => "test_case",
            EntityType::Cycle => "cycle",
            EntityType::Execution => "execution",
            EntityType::Attachment => "attachment",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "custom_field" => Ok(EntityType::CustomField),
            "folder" => Ok(EntityType::Folder),
            "test_case" => Ok(EntityType::TestCase),
            "cycle" => Ok(EntityType::Cycle),
            "execution" => Ok(EntityType::Execution),
            "attachment" => Ok(EntityType::Attachment),
            other => Err(Error::config(format!("unknown entity type '{other}'"))),
        }
    }
}

// ============================================================================
// Entity Status
// ============================================================================

/// Staging status of a migrated entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    /// Known to exist but not yet written to the staging store
    #[default]
    Pending,
    /// Raw payload durably staged, awaiting transformation
    Staged,
    /// Destination-shaped payload ready for loading
    Transformed,
    /// Created in the destination; correlation recorded
    Loaded,
    /// Dropped from the run; failure reason recorded
    Failed,
}

impl EntityStatus {
    /// Stable string tag (matches serde representation and store rows)
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityStatus::Pending => "pending",
            EntityStatus::Staged => "staged",
            EntityStatus::Transformed => "transformed",
            EntityStatus::Loaded => "loaded",
            EntityStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EntityStatus::Pending),
            "staged" => Ok(EntityStatus::Staged),
            "transformed" => Ok(EntityStatus::Transformed),
            "loaded" => Ok(EntityStatus::Loaded),
            "failed" => Ok(EntityStatus::Failed),
            other => Err(Error::Other(format!("unknown entity status '{other}'"))),
        }
    }
}

// ============================================================================
// Pipeline Phase
// ============================================================================

/// Pipeline phase recorded in checkpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Pulling pages from the source API into the staging store
    #[default]
    Extract,
    /// Mapping staged payloads to the destination shape
    Transform,
    /// Creating entities in the destination API
    Load,
    /// All phases finished for this entity type
    Done,
}

impl Phase {
    /// Stable string tag (matches serde representation and store rows)
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Extract => "extract",
            Phase::Transform => "transform",
            Phase::Load => "load",
            Phase::Done => "done",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "extract" => Ok(Phase::Extract),
            "transform" => Ok(Phase::Transform),
            "load" => Ok(Phase::Load),
            "done" => Ok(Phase::Done),
            other => Err(Error::Other(format!("unknown phase '{other}'"))),
        }
    }
}

// ============================================================================
// Run Outcome
// ============================================================================

/// Terminal (or in-flight) state of a migration run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunOutcome {
    /// Run is in progress (or was interrupted by a crash)
    Running,
    /// Every entity ended `loaded`
    Completed,
    /// Some entities ended `failed`; the rest loaded
    PartiallyCompleted,
    /// Cancelled or hit a fatal error; checkpoints remain consistent
    Aborted,
}

impl RunOutcome {
    /// Stable string tag (matches serde representation and store rows)
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Running => "running",
            RunOutcome::Completed => "completed",
            RunOutcome::PartiallyCompleted => "partially-completed",
            RunOutcome::Aborted => "aborted",
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunOutcome {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunOutcome::Running),
            "completed" => Ok(RunOutcome::Completed),
            "partially-completed" => Ok(RunOutcome::PartiallyCompleted),
            "aborted" => Ok(RunOutcome::Aborted),
            other => Err(Error::Other(format!("unknown run outcome '{other}'"))),
        }
    }
}

// ============================================================================
// Entity Reference
// ============================================================================

/// A parent/relationship reference by source-system ID
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    /// Type of the referenced entity
    pub entity_type: EntityType,
    /// Source-system ID of the referenced entity
    pub source_id: String,
}

impl EntityRef {
    /// Create a new reference
    pub fn new(entity_type: EntityType, source_id: impl Into<String>) -> Self {
        Self {
            entity_type,
            source_id: source_id.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.entity_type, self.source_id)
    }
}

// ============================================================================
// HTTP Method
// ============================================================================

/// HTTP method for endpoint profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    GET,
    POST,
    PUT,
    PATCH,
    DELETE,
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::GET => reqwest::Method::GET,
            Method::POST => reqwest::Method::POST,
            Method::PUT => reqwest::Method::PUT,
            Method::PATCH => reqwest::Method::PATCH,
            Method::DELETE => reqwest::Method::DELETE,
        }
    }
}

// ============================================================================
// Backoff Type
// ============================================================================

/// Type of backoff for retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffType {
    /// Constant delay between retries
    Constant,
    /// Linear increase in delay
    Linear,
    /// Exponential increase in delay
    #[default]
    Exponential,
}

// ============================================================================
// JWT Algorithm
// ============================================================================

/// JWT signing algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JwtAlgorithm {
    /// HMAC using SHA-256
    #[default]
    HS256,
    /// HMAC using SHA-384
    HS384,
    /// HMAC using SHA-512
    HS512,
    /// RSA using SHA-256
    RS256,
    /// RSA using SHA-384
    RS384,
    /// RSA using SHA-512
    RS512,
}

impl From<JwtAlgorithm> for jsonwebtoken::Algorithm {
    fn from(alg: JwtAlgorithm) -> Self {
        match alg {
            JwtAlgorithm::HS256 => jsonwebtoken::Algorithm::HS256,
            JwtAlgorithm::HS384 => jsonwebtoken::Algorithm::HS384,
            JwtAlgorithm::HS512 => jsonwebtoken::Algorithm::HS512,
            JwtAlgorithm::RS256 => jsonwebtoken::Algorithm::RS256,
            JwtAlgorithm::RS384 => jsonwebtoken::Algorithm::RS384,
            JwtAlgorithm::RS512 => jsonwebtoken::Algorithm::RS512,
        }
    }
}

// ============================================================================
// Cancellation
// ============================================================================

/// Cooperative cancellation flag
///
/// Observed between pages and batches only; the work unit in flight always
/// finishes so checkpoints stay consistent for resume.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create an uncancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Utilities
// ============================================================================

/// Extension trait for Option<String> to handle empty strings
pub trait OptionStringExt {
    /// Returns None if the string is empty
    fn none_if_empty(self) -> Option<String>;
}

impl OptionStringExt for Option<String> {
    fn none_if_empty(self) -> Option<String> {
        self.filter(|s| !s.is_empty())
    }
}

impl OptionStringExt for String {
    fn none_if_empty(self) -> Option<String> {
        if self.is_empty() {
            None
        } else {
            Some(self)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_order_is_topological() {
        for (i, ty) in EntityType::FIXED_ORDER.iter().enumerate() {
            for dep in ty.dependencies() {
                let dep_pos = EntityType::FIXED_ORDER
                    .iter()
                    .position(|t| t == dep)
                    .unwrap();
                assert!(
                    dep_pos < i,
                    "{dep} must come before {ty} in the fixed order"
                );
            }
        }
    }

    #[test]
    fn test_entity_type_round_trip() {
        for ty in EntityType::FIXED_ORDER {
            assert_eq!(ty.as_str().parse::<EntityType>().unwrap(), ty);
        }
        assert!("widget".parse::<EntityType>().is_err());
    }

    #[test]
    fn test_entity_type_serde() {
        let ty: EntityType = serde_json::from_str("\"test_case\"").unwrap();
        assert_eq!(ty, EntityType::TestCase);
        assert_eq!(
            serde_json::to_string(&EntityType::CustomField).unwrap(),
            "\"custom_field\""
        );
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            EntityStatus::Pending,
            EntityStatus::Staged,
            EntityStatus::Transformed,
            EntityStatus::Loaded,
            EntityStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<EntityStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_run_outcome_strings() {
        assert_eq!(
            RunOutcome::PartiallyCompleted.as_str(),
            "partially-completed"
        );
        assert_eq!(
            "partially-completed".parse::<RunOutcome>().unwrap(),
            RunOutcome::PartiallyCompleted
        );
        let json = serde_json::to_string(&RunOutcome::PartiallyCompleted).unwrap();
        assert_eq!(json, "\"partially-completed\"");
    }

    #[test]
    fn test_entity_ref_display() {
        let r = EntityRef::new(EntityType::TestCase, "TC-100");
        assert_eq!(r.to_string(), "test_case TC-100");
    }

    #[test]
    fn test_method_conversion() {
        let post: reqwest::Method = Method::POST.into();
        assert_eq!(reqwest::Method::POST, post);
    }

    #[test]
    fn test_option_string_none_if_empty() {
        assert_eq!(
            Some("test".to_string()).none_if_empty(),
            Some("test".to_string())
        );
        assert_eq!(Some(String::new()).none_if_empty(), None);
        assert_eq!(None::<String>.none_if_empty(), None);
    }
}
