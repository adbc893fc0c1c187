//! Migration configuration
//!
//! One YAML document describes a migration: the source API, the destination
//! API, pipeline settings and optional mapping-rule overrides. Secrets are
//! referenced as `{{ env.VAR }}` templates and resolved from the process
//! environment at load time.

use crate::auth::AuthConfig;
use crate::error::{Error, Result};
use crate::http::{HttpClientConfig, RateLimiterConfig};
use crate::platforms::{self, EntityEndpoints};
use crate::template::{self, TemplateContext};
use crate::transform::MappingRuleSet;
use crate::types::{BackoffType, EntityType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Top-Level Migration Config
// ============================================================================

/// Complete migration configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Source API (extraction side)
    pub source: ApiConfig,

    /// Destination API (loading side)
    pub destination: ApiConfig,

    /// Pipeline settings
    #[serde(default)]
    pub migration: MigrationSettings,

    /// Mapping-rule overrides per entity type; built-in platform defaults
    /// apply where absent
    #[serde(default)]
    pub mappings: HashMap<EntityType, MappingRuleSet>,
}

impl MigrationConfig {
    /// Load and validate a configuration file
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Cannot read config file {}: {e}", path.display())))?;
        Self::from_yaml(&raw)
    }

    /// Parse a configuration document, resolving `{{ env.* }}` secrets
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::from_yaml_with_env(yaml, None)
    }

    /// Parse with explicit environment values instead of the process env
    pub fn from_yaml_with_env(yaml: &str, env: Option<serde_json::Value>) -> Result<Self> {
        let raw: serde_json::Value =
            serde_yaml::from_str(yaml).map_err(|e| Error::config(format!("Invalid YAML: {e}")))?;

        let mut ctx = TemplateContext::new();
        if let Some(env) = env {
            ctx.set_env_overrides(env);
        }
        let rendered = template::render_value_env(&raw, &ctx)
            .map_err(|e| Error::config(format!("Cannot resolve secrets: {e}")))?;

        let config: MigrationConfig = serde_json::from_value(rendered)
            .map_err(|e| Error::config(format!("Invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<()> {
        self.source.validate("source")?;
        self.destination.validate("destination")?;
        self.migration.validate()?;
        Ok(())
    }

    /// Entity types selected for this run, in dependency order
    ///
    /// The configured selection is normalized to the fixed processing
    /// order, so parents always run before the types that reference them.
    pub fn selected_types(&self) -> Vec<EntityType> {
        EntityType::FIXED_ORDER
            .into_iter()
            .filter(|t| self.migration.entity_types.contains(t))
            .collect()
    }

    /// Endpoint definition for one entity type on the source side
    pub fn source_endpoints(&self, entity_type: EntityType) -> Result<EntityEndpoints> {
        self.source.endpoints_for(entity_type)
    }

    /// Endpoint definition for one entity type on the destination side
    pub fn dest_endpoints(&self, entity_type: EntityType) -> Result<EntityEndpoints> {
        self.destination.endpoints_for(entity_type)
    }

    /// Mapping rules for one entity type: config override first, then the
    /// destination platform's built-in defaults
    pub fn mapping_rules(&self, entity_type: EntityType) -> Result<MappingRuleSet> {
        if let Some(rules) = self.mappings.get(&entity_type) {
            return Ok(rules.clone());
        }
        platforms::profile(&self.destination.platform)
            .and_then(|p| p.mappings.get(&entity_type).cloned())
            .ok_or_else(|| {
                Error::mapping(entity_type.as_str(), "no mapping rules defined")
            })
    }
}

// ============================================================================
// API Config
// ============================================================================

/// One side of the migration: an HTTP API plus its credentials and limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Built-in endpoint profile to use ("zephyr" or "qtest")
    pub platform: String,

    /// Base URL for API requests
    pub base_url: String,

    /// Project identifier (key on the source, numeric ID on the destination)
    pub project: String,

    /// Authentication configuration
    #[serde(default)]
    pub auth: AuthConfig,

    /// Rate limit budget for this instance
    #[serde(default)]
    pub rate_limit: RateLimiterConfig,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpSettings,

    /// Extra headers sent on every request
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Per-entity-type endpoint overrides, replacing the profile's entry
    #[serde(default)]
    pub endpoints: HashMap<EntityType, EntityEndpoints>,
}

impl ApiConfig {
    fn validate(&self, side: &str) -> Result<()> {
        if platforms::profile(&self.platform).is_none() {
            return Err(Error::invalid_value(
                format!("{side}.platform"),
                format!("unknown platform '{}'", self.platform),
            ));
        }
        if self.base_url.is_empty() {
            return Err(Error::missing_field(format!("{side}.base_url")));
        }
        if self.project.is_empty() {
            return Err(Error::missing_field(format!("{side}.project")));
        }
        Ok(())
    }

    /// Endpoint definitions for one entity type, with config overrides applied
    pub fn endpoints_for(&self, entity_type: EntityType) -> Result<EntityEndpoints> {
        if let Some(endpoints) = self.endpoints.get(&entity_type) {
            return Ok(endpoints.clone());
        }
        platforms::profile(&self.platform)
            .and_then(|p| p.entities.get(&entity_type).cloned())
            .ok_or_else(|| {
                Error::config(format!(
                    "platform '{}' has no endpoints for entity type '{entity_type}'",
                    self.platform
                ))
            })
    }

    /// Build the HTTP client configuration for this API instance
    pub fn client_config(&self) -> HttpClientConfig {
        let mut builder = HttpClientConfig::builder()
            .base_url(&self.base_url)
            .timeout(Duration::from_secs(self.http.timeout_seconds))
            .max_retries(self.http.max_retries)
            .backoff(
                self.http.backoff.backoff_type,
                Duration::from_millis(self.http.backoff.initial_ms),
                Duration::from_millis(self.http.backoff.max_ms),
            )
            .rate_limit(self.rate_limit.clone());

        for (key, value) in &self.headers {
            builder = builder.header(key, value);
        }

        builder.build()
    }
}

// ============================================================================
// HTTP Settings
// ============================================================================

/// HTTP client settings for one API instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSettings {
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Maximum number of retries for retryable failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Retry backoff configuration
    #[serde(default)]
    pub backoff: BackoffSettings,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
            max_retries: default_max_retries(),
            backoff: BackoffSettings::default(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    4
}

/// Backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffSettings {
    /// Type of backoff
    #[serde(rename = "type", default)]
    pub backoff_type: BackoffType,

    /// Initial delay in milliseconds
    #[serde(default = "default_initial_ms")]
    pub initial_ms: u64,

    /// Maximum delay in milliseconds
    #[serde(default = "default_max_ms")]
    pub max_ms: u64,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            backoff_type: BackoffType::Exponential,
            initial_ms: default_initial_ms(),
            max_ms: default_max_ms(),
        }
    }
}

fn default_initial_ms() -> u64 {
    500
}

fn default_max_ms() -> u64 {
    30_000
}

// ============================================================================
// Migration Settings
// ============================================================================

/// Pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationSettings {
    /// Working directory for the staging database and attachment blobs
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,

    /// Number of entities submitted per load batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Upper bound on transform/load rounds per entity type
    #[serde(default = "default_max_transform_passes")]
    pub max_transform_passes: u32,

    /// Upper bound on rollback attempts per batch
    #[serde(default = "default_max_rollback_retries")]
    pub max_rollback_retries: u32,

    /// Entity types to migrate; defaults to all
    #[serde(default = "default_entity_types")]
    pub entity_types: Vec<EntityType>,
}

impl MigrationSettings {
    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::invalid_value("migration.batch_size", "must be at least 1"));
        }
        if self.max_transform_passes == 0 {
            return Err(Error::invalid_value(
                "migration.max_transform_passes",
                "must be at least 1",
            ));
        }
        if self.entity_types.is_empty() {
            return Err(Error::invalid_value(
                "migration.entity_types",
                "must select at least one entity type",
            ));
        }

        // The selection must be dependency-closed: every parent type a
        // selected type references has to be migrated too, or its
        // correlations can never exist.
        for entity_type in &self.entity_types {
            for dep in entity_type.dependencies() {
                if !self.entity_types.contains(dep) {
                    return Err(Error::invalid_value(
                        "migration.entity_types",
                        format!("'{entity_type}' requires '{dep}' to be selected as well"),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Path of the staging database inside the working directory
    pub fn staging_db_path(&self) -> PathBuf {
        self.workdir.join("staging.db")
    }

    /// Directory holding downloaded attachment blobs
    pub fn attachments_dir(&self) -> PathBuf {
        self.workdir.join("attachments")
    }
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            workdir: default_workdir(),
            batch_size: default_batch_size(),
            max_transform_passes: default_max_transform_passes(),
            max_rollback_retries: default_max_rollback_retries(),
            entity_types: default_entity_types(),
        }
    }
}

fn default_workdir() -> PathBuf {
    PathBuf::from("./testshift-work")
}

fn default_batch_size() -> usize {
    50
}

fn default_max_transform_passes() -> u32 {
    10
}

fn default_max_rollback_retries() -> u32 {
    3
}

fn default_entity_types() -> Vec<EntityType> {
    EntityType::FIXED_ORDER.to_vec()
}
