//! Comparison orchestration over an external diff primitive.
//!
//! The orchestrator fetches population or version snapshots of a record
//! through the [`RecordSource`] collaborator, serializes them to a
//! canonical form, drives the external [`DiffEngine`] over every pair,
//! and aggregates statistics. Results are cached read-through; see
//! [`cache`] for the eviction discipline. The orchestrator does not
//! implement the diff algorithm itself and never retries a failed
//! fetch.

pub mod cache;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::compare::cache::{CacheKey, ComparisonCache};
use crate::error::{CompareError, RetrievalError};
use crate::ingredient::{IngredientId, IngredientRecord};
use crate::population::Population;

/// Kind of change a diff entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Present on the right only.
    Addition,
    /// Present on the left only.
    Deletion,
    /// Present on both sides with different content.
    Modification,
    /// Identical on both sides.
    Unchanged,
}

/// One line/field-level difference reported by the diff primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffEntry {
    /// What kind of change this is.
    pub kind: ChangeKind,

    /// Field the change belongs to, when the primitive can attribute it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    /// Left-side content, where applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left: Option<String>,

    /// Right-side content, where applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right: Option<String>,
}

/// Aggregate counts over one diff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStatistics {
    /// Number of additions.
    pub additions: usize,
    /// Number of deletions.
    pub deletions: usize,
    /// Number of modifications.
    pub modifications: usize,
}

impl DiffStatistics {
    /// Total changed entries.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.additions + self.deletions + self.modifications
    }
}

/// Pass-through options for the diff primitive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffOptions {
    /// Ignore whitespace-only differences.
    pub ignore_whitespace: bool,
    /// Context lines to include around changes.
    pub context_lines: usize,
}

/// Record-store collaborator: fetches population/version views.
///
/// Implementations own timeout, retry, and backpressure policy; the
/// orchestrator treats any failure as final.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetches one population's view of a record.
    async fn fetch_by_population(
        &self,
        record: &IngredientRecord,
        population: Population,
    ) -> Result<IngredientRecord, RetrievalError>;

    /// Fetches a specific version snapshot of a record within one
    /// population.
    async fn fetch_by_version(
        &self,
        record: &IngredientRecord,
        population: Population,
        version: &str,
    ) -> Result<IngredientRecord, RetrievalError>;
}

/// Diff-primitive collaborator.
pub trait DiffEngine: Send + Sync {
    /// Computes line/field-level differences between two serialized
    /// snapshots.
    fn compare(&self, left: &str, right: &str, options: &DiffOptions) -> Vec<DiffEntry>;

    /// Aggregates counts over a diff.
    fn calculate_statistics(&self, entries: &[DiffEntry]) -> DiffStatistics;
}

/// Unique identifier for a comparison result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComparisonId(Uuid);

impl ComparisonId {
    /// Creates a new random comparison ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ComparisonId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ComparisonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a comparison compared across.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonMode {
    /// Population views of one record.
    Populations,
    /// Two version snapshots within one population.
    Versions,
}

impl fmt::Display for ComparisonMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Populations => write!(f, "populations"),
            Self::Versions => write!(f, "versions"),
        }
    }
}

/// One side of a comparison pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Human-readable label ("child", "adult v3", ...).
    pub label: String,

    /// The population the snapshot belongs to.
    pub population: Population,

    /// Version label, for version-mode comparisons.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Canonical serialized content.
    pub content: String,
}

/// One left/right comparison within a result. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonPair {
    /// Left side.
    pub left: Snapshot,
    /// Right side.
    pub right: Snapshot,
    /// Differences reported by the diff primitive.
    pub diff: Vec<DiffEntry>,
    /// Aggregate counts for this pair.
    pub statistics: DiffStatistics,
}

/// Result-wide aggregation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparisonSummary {
    /// Number of pairs compared.
    pub total_comparisons: usize,
    /// Additions + deletions + modifications summed across pairs.
    pub total_changes: usize,
    /// Field names with at least one change, where attributed.
    pub changed_fields: BTreeSet<String>,
    /// Pairs whose serialized content was byte-identical.
    pub identical_pairs: usize,
}

/// Output of comparing a record across populations or versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    /// Unique identifier.
    pub id: ComparisonId,
    /// The compared ingredient.
    pub ingredient_id: IngredientId,
    /// Comparison mode.
    pub mode: ComparisonMode,
    /// When the comparison ran.
    pub timestamp: DateTime<Utc>,
    /// All compared pairs.
    pub comparisons: Vec<ComparisonPair>,
    /// Result-wide aggregation.
    pub summary: ComparisonSummary,
}

fn canonical_json(record: &IngredientRecord) -> Result<String, CompareError> {
    serde_json::to_string_pretty(record).map_err(|e| CompareError::Serialization {
        message: e.to_string(),
    })
}

/// Drives pairwise comparisons through the diff primitive, with a
/// read-through result cache.
pub struct ComparisonOrchestrator {
    source: Arc<dyn RecordSource>,
    diff: Arc<dyn DiffEngine>,
    cache: ComparisonCache,
}

impl ComparisonOrchestrator {
    /// Creates an orchestrator with the standard cache discipline.
    #[must_use]
    pub fn new(source: Arc<dyn RecordSource>, diff: Arc<dyn DiffEngine>) -> Self {
        Self {
            source,
            diff,
            cache: ComparisonCache::new(),
        }
    }

    /// Creates an orchestrator with a custom cache TTL.
    #[must_use]
    pub fn with_cache_ttl(
        source: Arc<dyn RecordSource>,
        diff: Arc<dyn DiffEngine>,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            source,
            diff,
            cache: ComparisonCache::with_ttl(ttl),
        }
    }

    /// Compares a record's views across every unordered pair of the
    /// given populations.
    ///
    /// # Errors
    ///
    /// Fails with a retrieval error if any population view cannot be
    /// fetched, or a validation-shaped error for fewer than two
    /// populations. Fetches are not retried.
    pub async fn compare_populations(
        &self,
        record: &IngredientRecord,
        populations: &[Population],
        options: &DiffOptions,
    ) -> Result<Arc<ComparisonResult>, CompareError> {
        let mut unique = populations.to_vec();
        unique.sort_unstable();
        unique.dedup();
        if unique.len() < 2 {
            return Err(CompareError::InsufficientPopulations {
                count: unique.len(),
            });
        }

        let key = CacheKey::populations(&record.id, &unique);
        if let Some(hit) = self.cache.get(&key) {
            debug!(ingredient = %record.id, "comparison cache hit");
            return Ok(hit);
        }

        let mut views = Vec::with_capacity(unique.len());
        for &population in &unique {
            let view = self
                .source
                .fetch_by_population(record, population)
                .await
                .map_err(|e| {
                    warn!(ingredient = %record.id, %population, "population fetch failed");
                    e
                })?;
            let content = canonical_json(&view)?;
            views.push(Snapshot {
                label: population.to_string(),
                population,
                version: None,
                content,
            });
        }

        let mut comparisons = Vec::new();
        for i in 0..views.len() {
            for j in (i + 1)..views.len() {
                comparisons.push(self.compare_pair(views[i].clone(), views[j].clone(), options));
            }
        }

        let result = Arc::new(self.assemble(
            record.id.clone(),
            ComparisonMode::Populations,
            comparisons,
        ));
        self.cache.insert(key, Arc::clone(&result));
        Ok(result)
    }

    /// Compares two version snapshots of a record within one
    /// population.
    ///
    /// # Errors
    ///
    /// Fails with a retrieval error if either snapshot is unavailable.
    /// Fetches are not retried.
    pub async fn compare_versions(
        &self,
        record: &IngredientRecord,
        population: Population,
        left_version: &str,
        right_version: &str,
        options: &DiffOptions,
    ) -> Result<Arc<ComparisonResult>, CompareError> {
        let key = CacheKey::versions(&record.id, population, left_version, right_version);
        if let Some(hit) = self.cache.get(&key) {
            debug!(ingredient = %record.id, "comparison cache hit");
            return Ok(hit);
        }

        let left = self
            .source
            .fetch_by_version(record, population, left_version)
            .await?;
        let right = self
            .source
            .fetch_by_version(record, population, right_version)
            .await?;

        let pair = self.compare_pair(
            Snapshot {
                label: format!("{population} {left_version}"),
                population,
                version: Some(left_version.to_string()),
                content: canonical_json(&left)?,
            },
            Snapshot {
                label: format!("{population} {right_version}"),
                population,
                version: Some(right_version.to_string()),
                content: canonical_json(&right)?,
            },
            options,
        );

        let result = Arc::new(self.assemble(
            record.id.clone(),
            ComparisonMode::Versions,
            vec![pair],
        ));
        self.cache.insert(key, Arc::clone(&result));
        Ok(result)
    }

    fn compare_pair(
        &self,
        left: Snapshot,
        right: Snapshot,
        options: &DiffOptions,
    ) -> ComparisonPair {
        let diff = self.diff.compare(&left.content, &right.content, options);
        let statistics = self.diff.calculate_statistics(&diff);
        ComparisonPair {
            left,
            right,
            diff,
            statistics,
        }
    }

    fn assemble(
        &self,
        ingredient_id: IngredientId,
        mode: ComparisonMode,
        comparisons: Vec<ComparisonPair>,
    ) -> ComparisonResult {
        let mut summary = ComparisonSummary {
            total_comparisons: comparisons.len(),
            ..ComparisonSummary::default()
        };
        for pair in &comparisons {
            summary.total_changes += pair.statistics.total();
            if pair.left.content == pair.right.content {
                summary.identical_pairs += 1;
            }
            for entry in &pair.diff {
                if entry.kind != ChangeKind::Unchanged {
                    if let Some(field) = &entry.field {
                        summary.changed_fields.insert(field.clone());
                    }
                }
            }
        }

        ComparisonResult {
            id: ComparisonId::new(),
            ingredient_id,
            mode,
            timestamp: Utc::now(),
            comparisons,
            summary,
        }
    }

    /// Number of cached results.
    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Drops every cached result.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diff_statistics_total() {
        let stats = DiffStatistics {
            additions: 2,
            deletions: 1,
            modifications: 3,
        };
        assert_eq!(stats.total(), 6);
    }

    #[test]
    fn test_change_kind_serde_is_snake_case() {
        let json = serde_json::to_value(ChangeKind::Modification).unwrap();
        assert_eq!(json, serde_json::Value::String("modification".to_string()));
    }

    #[test]
    fn test_comparison_mode_display() {
        assert_eq!(format!("{}", ComparisonMode::Populations), "populations");
        assert_eq!(format!("{}", ComparisonMode::Versions), "versions");
    }

    #[test]
    fn test_canonical_json_is_deterministic() {
        let record = IngredientRecord::new("ing-1", "Heparin", Population::Adult)
            .with_unit("units");
        let a = canonical_json(&record).unwrap();
        let b = canonical_json(&record).unwrap();
        assert_eq!(a, b);
        assert!(a.contains("Heparin"));
    }

    // Compile-time test: ensure collaborator traits are object-safe.
    fn _assert_diff_engine_object_safe(_: &dyn DiffEngine) {}
    fn _assert_record_source_object_safe(_: &dyn RecordSource) {}
}
