//! Transformation engine
//!
//! Turns staged source payloads into destination payloads by applying the
//! entity type's mapping rule set and resolving parent references against
//! the correlation map. An entity whose parent is extracted but not yet
//! loaded is deferred (it stays `staged` and is retried on the next pass,
//! after more parents have been loaded); an entity whose parent failed or
//! was never extracted is failed outright. The orchestrator alternates
//! transform passes with load batches until a pass makes no progress.

mod rules;

pub use rules::{set_path, FieldRule, MappingRuleSet, RelationshipRule};

use crate::error::Result;
use crate::store::{SourceEntity, StagingStore};
use crate::types::{EntityRef, EntityStatus, EntityType};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, warn};

/// What happened to one entity during a transform pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformOutcome {
    /// Mapping and resolution succeeded; carries the destination payload
    Transformed(Value),
    /// A parent reference exists but is not correlated yet; retry later
    Deferred { waiting_on: EntityRef },
    /// Mapping, validation or resolution failed permanently
    Failed { reason: String },
}

/// Counters for one transform pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    /// Entities that became `transformed`
    pub transformed: u64,
    /// Entities left `staged` awaiting a parent correlation
    pub deferred: u64,
    /// Entities marked `failed`
    pub failed: u64,
}

impl PassStats {
    /// Whether the pass moved any entity forward
    pub fn made_progress(&self) -> bool {
        self.transformed > 0
    }
}

/// Transforms staged entities of one type
pub struct Transformer<'a> {
    store: &'a StagingStore,
    entity_type: EntityType,
    rules: MappingRuleSet,
}

impl<'a> Transformer<'a> {
    /// Create a transformer for one entity type
    pub fn new(store: &'a StagingStore, entity_type: EntityType, rules: MappingRuleSet) -> Self {
        Self {
            store,
            entity_type,
            rules,
        }
    }

    /// Run one pass over every staged entity of this type
    ///
    /// Deferred entities stay `staged`; they are picked up again by the next
    /// pass once more parents have been loaded.
    pub fn run_pass(&self) -> Result<PassStats> {
        let staged = self
            .store
            .entities_with_status(self.entity_type, EntityStatus::Staged)?;
        let failed_parent_types = self.failed_parent_types()?;

        let mut stats = PassStats::default();
        for entity in &staged {
            match self.transform_entity(entity, &failed_parent_types)? {
                TransformOutcome::Transformed(mapped) => {
                    self.store
                        .mark_transformed(self.entity_type, &entity.source_id, &mapped)?;
                    stats.transformed += 1;
                }
                TransformOutcome::Deferred { waiting_on } => {
                    debug!(
                        entity_type = %self.entity_type,
                        source_id = %entity.source_id,
                        waiting_on = %waiting_on,
                        "deferred"
                    );
                    stats.deferred += 1;
                }
                TransformOutcome::Failed { reason } => {
                    warn!(
                        entity_type = %self.entity_type,
                        source_id = %entity.source_id,
                        reason = %reason,
                        "transform failed"
                    );
                    self.store
                        .mark_failed(self.entity_type, &entity.source_id, &reason)?;
                    stats.failed += 1;
                }
            }
        }

        debug!(
            entity_type = %self.entity_type,
            transformed = stats.transformed,
            deferred = stats.deferred,
            failed = stats.failed,
            "transform pass done"
        );
        Ok(stats)
    }

    /// Transform one entity without touching the store
    ///
    /// `failed_parent_types` holds parent types whose extraction failed; any
    /// reference into them can never resolve.
    pub fn transform_entity(
        &self,
        entity: &SourceEntity,
        failed_parent_types: &HashSet<EntityType>,
    ) -> Result<TransformOutcome> {
        let mut mapped = match self.rules.apply_fields(&entity.payload) {
            Ok(mapped) => mapped,
            Err(e) if e.is_entity_level() => {
                return Ok(TransformOutcome::Failed {
                    reason: e.to_string(),
                })
            }
            Err(e) => return Err(e),
        };

        for rule in &self.rules.relationships {
            let parent = entity
                .parent_refs
                .iter()
                .find(|r| r.entity_type == rule.ref_type);
            let Some(parent) = parent else {
                if rule.required {
                    return Ok(TransformOutcome::Failed {
                        reason: format!("no {} reference on entity", rule.ref_type),
                    });
                }
                continue;
            };

            match self.store.correlation(parent.entity_type, &parent.source_id)? {
                Some(dest_id) => {
                    set_path(&mut mapped, &rule.dest, rules::id_value(&dest_id));
                    if let Some(type_field) = &rule.dest_type_field {
                        set_path(
                            &mut mapped,
                            type_field,
                            Value::String(parent.entity_type.as_str().to_string()),
                        );
                    }
                }
                None => {
                    if failed_parent_types.contains(&parent.entity_type) {
                        return Ok(TransformOutcome::Failed {
                            reason: format!("parent {parent} belongs to a failed entity type"),
                        });
                    }
                    return match self.store.entity_status(parent.entity_type, &parent.source_id)? {
                        None => Ok(TransformOutcome::Failed {
                            reason: format!("parent {parent} was never extracted"),
                        }),
                        Some(EntityStatus::Failed) => Ok(TransformOutcome::Failed {
                            reason: format!("parent {parent} failed"),
                        }),
                        Some(_) => Ok(TransformOutcome::Deferred {
                            waiting_on: parent.clone(),
                        }),
                    };
                }
            }
        }

        if let Err(e) = self.rules.check_required(&mapped) {
            return Ok(TransformOutcome::Failed {
                reason: e.to_string(),
            });
        }
        Ok(TransformOutcome::Transformed(mapped))
    }

    /// Fail every entity still staged after the pass loop settled
    ///
    /// Called once no pass makes progress any more; whatever is left is
    /// blocked on a dependency that will not materialize in this run.
    pub fn fail_unresolved(&self) -> Result<u64> {
        let staged = self
            .store
            .entities_with_status(self.entity_type, EntityStatus::Staged)?;

        let mut failed = 0;
        for entity in &staged {
            let reason = match self.blocking_ref(entity)? {
                Some(parent) => format!("unresolved dependency: {parent} was never loaded"),
                None => "unresolved dependency".to_string(),
            };
            self.store
                .mark_failed(self.entity_type, &entity.source_id, &reason)?;
            failed += 1;
        }
        if failed > 0 {
            warn!(
                entity_type = %self.entity_type,
                count = failed,
                "staged entities failed with unresolved dependencies"
            );
        }
        Ok(failed)
    }

    /// First parent reference without a correlation, for failure reasons
    fn blocking_ref(&self, entity: &SourceEntity) -> Result<Option<EntityRef>> {
        for parent in &entity.parent_refs {
            if self
                .store
                .correlation(parent.entity_type, &parent.source_id)?
                .is_none()
            {
                return Ok(Some(parent.clone()));
            }
        }
        Ok(None)
    }

    /// Parent types whose extraction failed at the type level
    fn failed_parent_types(&self) -> Result<HashSet<EntityType>> {
        let mut failed = HashSet::new();
        for rule in &self.rules.relationships {
            if self.store.type_failed(rule.ref_type)? {
                failed.insert(rule.ref_type);
            }
        }
        Ok(failed)
    }
}

#[cfg(test)]
mod tests;
