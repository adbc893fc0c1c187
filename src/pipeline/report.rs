//! Migration and validation reports

use crate::error::Result;
use crate::store::{FailureRecord, MigrationRun, StagingStore, TypeCounts};
use crate::types::EntityType;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// An entity type that failed as a whole, with the recorded reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeFailure {
    pub entity_type: EntityType,
    pub reason: String,
}

/// Snapshot of the staging store: per-type counts, failures and run history
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub generated_at: DateTime<Utc>,
    pub counts: BTreeMap<EntityType, TypeCounts>,
    pub type_failures: Vec<TypeFailure>,
    pub failures: Vec<FailureRecord>,
    pub runs: Vec<MigrationRun>,
}

impl MigrationReport {
    /// Assemble a report from the staging store
    pub fn collect(store: &StagingStore) -> Result<Self> {
        let mut type_failures = Vec::new();
        for entity_type in EntityType::FIXED_ORDER {
            if let Some(cp) = store.checkpoint(entity_type)? {
                if cp.failed {
                    type_failures.push(TypeFailure {
                        entity_type,
                        reason: cp
                            .failure_reason
                            .unwrap_or_else(|| "no reason recorded".to_string()),
                    });
                }
            }
        }

        Ok(Self {
            generated_at: Utc::now(),
            counts: store.counts()?,
            type_failures,
            failures: store.failures()?,
            runs: store.runs()?,
        })
    }

    /// Entities created in the destination, across all types
    pub fn total_loaded(&self) -> u64 {
        self.counts.values().map(|c| c.loaded).sum()
    }

    /// Entities that ended `failed`, across all types
    pub fn total_failed(&self) -> u64 {
        self.counts.values().map(|c| c.failed).sum()
    }

    /// Whether nothing failed, at either entity or type level
    pub fn clean(&self) -> bool {
        self.total_failed() == 0 && self.type_failures.is_empty()
    }

    /// Pretty JSON rendering
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Human-readable rendering
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Migration report ({})", self.generated_at.to_rfc3339());
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "  {:<13} {:>8} {:>12} {:>8} {:>8} {:>8}",
            "entity type", "staged", "transformed", "loaded", "failed", "total"
        );
        for (entity_type, counts) in &self.counts {
            let _ = writeln!(
                out,
                "  {:<13} {:>8} {:>12} {:>8} {:>8} {:>8}",
                entity_type.as_str(),
                counts.staged,
                counts.transformed,
                counts.loaded,
                counts.failed,
                counts.total()
            );
        }

        if !self.type_failures.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Failed entity types:");
            for failure in &self.type_failures {
                let _ = writeln!(out, "  {}: {}", failure.entity_type, failure.reason);
            }
        }

        if !self.failures.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Failed entities ({}):", self.failures.len());
            for failure in &self.failures {
                let _ = writeln!(
                    out,
                    "  {} {}: {}",
                    failure.entity_type, failure.source_id, failure.reason
                );
            }
        }

        if !self.runs.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Runs:");
            for run in &self.runs {
                let finished = run
                    .finished_at
                    .map_or_else(|| "-".to_string(), |t| t.to_rfc3339());
                let _ = write!(
                    out,
                    "  #{} {} started {} finished {}",
                    run.id,
                    run.status,
                    run.started_at.to_rfc3339(),
                    finished
                );
                if let Some(error) = &run.error {
                    let _ = write!(out, " ({error})");
                }
                let _ = writeln!(out);
            }
        }

        out
    }
}

// ===== Validation =====

/// One named validation check and its outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationCheck {
    pub name: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Results of the `validate` command
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub checks: Vec<ValidationCheck>,
}

impl ValidationReport {
    /// Record a check outcome
    pub fn add(&mut self, name: impl Into<String>, passed: bool, detail: Option<String>) {
        self.checks.push(ValidationCheck {
            name: name.into(),
            passed,
            detail,
        });
    }

    /// Record a check from a `Result`, keeping the error text as detail
    pub fn record(&mut self, name: impl Into<String>, result: Result<()>) {
        match result {
            Ok(()) => self.add(name, true, None),
            Err(e) => self.add(name, false, Some(e.to_string())),
        }
    }

    /// Whether every check passed
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    /// Pretty JSON rendering
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Human-readable rendering
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for check in &self.checks {
            let status = if check.passed { "ok  " } else { "FAIL" };
            let _ = write!(out, "{status} {}", check.name);
            if let Some(detail) = &check.detail {
                let _ = write!(out, ": {detail}");
            }
            let _ = writeln!(out);
        }
        let failed = self.checks.iter().filter(|c| !c.passed).count();
        let _ = writeln!(
            out,
            "{} checks, {} failed",
            self.checks.len(),
            failed
        );
        out
    }
}
