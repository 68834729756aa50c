//! The linking store and its service surface.
//!
//! `LinkingService` is the single source of truth for "is X linked, to
//! what, with what confidence/conflicts". It is an explicit service
//! object: construct one per scope (process, request, test) rather than
//! sharing hidden global state. One mutex guards the link map and the
//! operation history together, because every mutation must append a
//! history record atomically with the store change.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::candidate::detect_shared_ingredients;
use crate::conflict::{detect_conflicts, ConflictField, ConflictResolution, LinkingConflict};
use crate::error::{LinkError, ValidationError};
use crate::history::{LinkingOperation, OperationHistory, OperationType};
use crate::ingredient::{IngredientId, IngredientRecord};
use crate::population::Population;
use crate::similarity;

/// The current linkage state for one source ingredient.
///
/// At most one of these exists per source id at any time; a source
/// links to at most one target per population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkingResult {
    /// The source record the link hangs off.
    pub source: IngredientRecord,

    /// One linked target per population.
    pub linked: BTreeMap<Population, IngredientRecord>,

    /// Detected conflicts, resolved or not.
    pub conflicts: Vec<LinkingConflict>,

    /// Mean pairwise similarity between the source and every target.
    pub confidence: f64,
}

impl LinkingResult {
    /// Populations currently linked, in cohort order.
    #[must_use]
    pub fn populations(&self) -> Vec<Population> {
        self.linked.keys().copied().collect()
    }

    /// Conflicts that have no recorded resolution.
    #[must_use]
    pub fn unresolved_conflicts(&self) -> Vec<&LinkingConflict> {
        self.conflicts.iter().filter(|c| !c.is_resolved()).collect()
    }

    /// Returns true if any conflict is unresolved.
    #[must_use]
    pub fn has_unresolved_conflicts(&self) -> bool {
        self.conflicts.iter().any(|c| !c.is_resolved())
    }
}

/// Derived status view for one source id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkingStatus {
    /// Always true for a returned status; absent links return `None`
    /// from the query instead.
    pub linked: bool,

    /// Populations currently linked.
    pub populations: Vec<Population>,

    /// Number of unresolved conflicts.
    pub conflicts: usize,

    /// Timestamp of the most recent history record touching the id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,

    /// Current link confidence.
    pub confidence: f64,
}

/// What to do with sources that still carry unresolved conflicts after
/// a bulk pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkConflictPolicy {
    /// Exclude conflicted results from the returned batch. The link
    /// itself still happened and remains in the store and history.
    Skip,

    /// Return conflicted results alongside clean ones.
    Keep,
}

/// Options for [`LinkingService::bulk_link_ingredients`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkLinkOptions {
    /// Minimum candidate score (inclusive) to link.
    pub threshold: f64,

    /// Apply `use_primary` to every detected conflict before storing.
    pub auto_resolve_conflicts: bool,

    /// Treatment of results that still carry unresolved conflicts.
    pub conflict_resolution: BulkConflictPolicy,

    /// Populations to search for candidates.
    pub populations: Vec<Population>,
}

impl Default for BulkLinkOptions {
    fn default() -> Self {
        Self {
            threshold: 0.75,
            auto_resolve_conflicts: false,
            conflict_resolution: BulkConflictPolicy::Skip,
            populations: Population::ALL.to_vec(),
        }
    }
}

/// Exported view of one link, by id reference only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedIngredientRef {
    /// The linked population.
    pub population: Population,
    /// The linked record's id.
    pub ingredient_id: IngredientId,
}

/// Exported view of one linking result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedLink {
    /// The source record's id.
    pub source_ingredient: IngredientId,
    /// Id references to the linked records.
    pub linked_ingredients: Vec<LinkedIngredientRef>,
    /// Conflicts at export time, including resolutions.
    pub conflicts: Vec<LinkingConflict>,
    /// Link confidence at export time.
    pub confidence: f64,
}

/// Serialized store-and-history snapshot.
///
/// Import restores the history only; live link records must be
/// re-hydrated by id by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkingExport {
    /// Current links, keyed by source id.
    pub links: BTreeMap<IngredientId, ExportedLink>,
    /// The full retained operation history.
    pub history: Vec<LinkingOperation>,
    /// Export time.
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct LinkerState {
    links: HashMap<IngredientId, LinkingResult>,
    history: OperationHistory,
}

/// In-memory linking store with an undo/redo history.
///
/// All mutating calls serialize on one internal mutex; read calls take
/// the same lock briefly and clone out what they return, so callers
/// never hold references into the store.
#[derive(Debug, Default)]
pub struct LinkingService {
    state: Mutex<LinkerState>,
}

impl LinkingService {
    /// Creates an empty service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, LinkerState>, LinkError> {
        self.state
            .lock()
            .map_err(|_| LinkError::internal("linking store mutex poisoned"))
    }

    fn mean_confidence(
        source: &IngredientRecord,
        targets: &BTreeMap<Population, IngredientRecord>,
    ) -> f64 {
        if targets.is_empty() {
            return 0.0;
        }
        let total: f64 = targets
            .values()
            .map(|t| similarity::score(source, t).value)
            .sum();
        #[allow(clippy::cast_precision_loss)]
        {
            total / targets.len() as f64
        }
    }

    /// Links a source record to one target per population.
    ///
    /// Conflicts are detected first. Without `auto_resolve` they are
    /// stored unresolved and the link is tentative; with it, every
    /// conflict is marked `use_primary`. Confidence is computed the same
    /// way in both branches. A history record is appended either way.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty source name or an empty
    /// target set, or an internal error if the store mutex is poisoned.
    pub fn link_ingredients(
        &self,
        source: &IngredientRecord,
        targets: &BTreeMap<Population, IngredientRecord>,
        auto_resolve: bool,
    ) -> Result<LinkingResult, LinkError> {
        self.link_with_op(source, targets, auto_resolve, OperationType::Link)
    }

    fn link_with_op(
        &self,
        source: &IngredientRecord,
        targets: &BTreeMap<Population, IngredientRecord>,
        auto_resolve: bool,
        op_type: OperationType,
    ) -> Result<LinkingResult, LinkError> {
        if source.name.trim().is_empty() {
            return Err(ValidationError::EmptyIngredientName.into());
        }
        if targets.is_empty() {
            return Err(ValidationError::EmptyLinkTargets.into());
        }

        let mut conflicts = detect_conflicts(source, targets);
        if auto_resolve {
            for conflict in &mut conflicts {
                conflict.resolve(ConflictResolution::UsePrimary);
            }
        }

        let confidence = Self::mean_confidence(source, targets);
        let result = LinkingResult {
            source: source.clone(),
            linked: targets.clone(),
            conflicts,
            confidence,
        };

        let mut ingredient_ids = vec![source.id.clone()];
        ingredient_ids.extend(targets.values().map(|t| t.id.clone()));

        let mut state = self.lock()?;
        let previous = state.links.get(&source.id).cloned();
        state.links.insert(source.id.clone(), result.clone());
        state.history.push(LinkingOperation::new(
            op_type,
            ingredient_ids,
            result.populations(),
            previous,
            Some(result.clone()),
        ));

        debug!(
            source = %source.id,
            populations = result.linked.len(),
            conflicts = result.conflicts.len(),
            confidence = result.confidence,
            "linked ingredient"
        );
        Ok(result)
    }

    /// Removes a link, fully or for the given populations only.
    ///
    /// Returns the pre-unlink result, or `None` if the id was not
    /// linked. A partial unlink that empties the link set removes the
    /// store entry entirely. Always appends an unlink history record.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the store mutex is poisoned.
    pub fn unlink_ingredients(
        &self,
        id: &IngredientId,
        populations: Option<&[Population]>,
    ) -> Result<Option<LinkingResult>, LinkError> {
        let mut state = self.lock()?;
        let Some(previous) = state.links.get(id).cloned() else {
            return Ok(None);
        };

        let (new_state, removed) = match populations {
            None => {
                state.links.remove(id);
                (None, previous.populations())
            }
            Some(pops) => {
                let mut updated = previous.clone();
                for population in pops {
                    updated.linked.remove(population);
                }
                if updated.linked.is_empty() {
                    state.links.remove(id);
                    (None, pops.to_vec())
                } else {
                    // Re-derive conflicts against the remaining targets,
                    // carrying over resolutions recorded per field.
                    let mut rederived = detect_conflicts(&updated.source, &updated.linked);
                    for conflict in &mut rederived {
                        if let Some(prior) = previous
                            .conflicts
                            .iter()
                            .find(|c| c.field == conflict.field)
                        {
                            conflict.resolution = prior.resolution.clone();
                        }
                    }
                    updated.conflicts = rederived;
                    updated.confidence = Self::mean_confidence(&updated.source, &updated.linked);
                    state.links.insert(id.clone(), updated.clone());
                    (Some(updated), pops.to_vec())
                }
            }
        };

        state.history.push(LinkingOperation::new(
            OperationType::Unlink,
            vec![id.clone()],
            removed,
            Some(previous.clone()),
            new_state,
        ));

        debug!(source = %id, "unlinked ingredient");
        Ok(Some(previous))
    }

    /// Runs candidate detection over a batch and links the best
    /// candidate per population for each source.
    ///
    /// Candidates below `options.threshold` are ignored; the best
    /// (first, since candidates are sorted) per population wins. With
    /// the `Skip` policy, sources whose link still carries unresolved
    /// conflicts are excluded from the returned map — the store entry
    /// and history record are kept regardless.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the population set is empty, or
    /// any error from the underlying link calls.
    pub fn bulk_link_ingredients(
        &self,
        records: &[IngredientRecord],
        options: &BulkLinkOptions,
    ) -> Result<BTreeMap<IngredientId, LinkingResult>, LinkError> {
        if options.populations.is_empty() {
            return Err(ValidationError::EmptyPopulationSet.into());
        }

        let candidates = detect_shared_ingredients(records, &options.populations);
        let mut batch = BTreeMap::new();

        for record in records {
            let Some(ranked) = candidates.get(&record.id) else {
                continue;
            };

            let mut targets: BTreeMap<Population, IngredientRecord> = BTreeMap::new();
            for candidate in ranked {
                if candidate.score < options.threshold {
                    continue;
                }
                targets
                    .entry(candidate.population)
                    .or_insert_with(|| candidate.ingredient.clone());
            }
            if targets.is_empty() {
                continue;
            }

            let result = self.link_with_op(
                record,
                &targets,
                options.auto_resolve_conflicts,
                OperationType::BulkLink,
            )?;

            if result.has_unresolved_conflicts()
                && options.conflict_resolution == BulkConflictPolicy::Skip
            {
                continue;
            }
            batch.insert(record.id.clone(), result);
        }

        Ok(batch)
    }

    /// Applies a resolution to the named conflict of a stored link.
    ///
    /// `keep_all` and `use_primary` only mark the conflict. A manual
    /// resolution additionally writes the supplied value into the field
    /// on fresh copies of every linked target and swaps them in
    /// atomically, so snapshots held by callers are never mutated.
    ///
    /// Returns `None` if the id is not linked or no unresolved conflict
    /// exists for the field.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the store mutex is poisoned.
    pub fn resolve_conflict(
        &self,
        id: &IngredientId,
        field: ConflictField,
        resolution: ConflictResolution,
    ) -> Result<Option<LinkingResult>, LinkError> {
        let mut state = self.lock()?;
        let Some(previous) = state.links.get(id).cloned() else {
            return Ok(None);
        };

        let mut updated = previous.clone();
        let Some(conflict) = updated
            .conflicts
            .iter_mut()
            .find(|c| c.field == field && !c.is_resolved())
        else {
            return Ok(None);
        };
        conflict.resolve(resolution.clone());

        if let ConflictResolution::Manual { value } = &resolution {
            let replaced: BTreeMap<Population, IngredientRecord> = updated
                .linked
                .iter()
                .map(|(&population, record)| {
                    let mut next = record.clone();
                    field.apply(&mut next, value);
                    (population, next)
                })
                .collect();
            updated.linked = replaced;
        }

        state.links.insert(id.clone(), updated.clone());
        state.history.push(LinkingOperation::new(
            OperationType::ResolveConflict,
            vec![id.clone()],
            updated.populations(),
            Some(previous),
            Some(updated.clone()),
        ));

        debug!(source = %id, field = %field, resolution = %resolution, "resolved conflict");
        Ok(Some(updated))
    }

    /// Reverts the most recent operation. Returns false when there is
    /// nothing to undo.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the store mutex is poisoned.
    pub fn undo(&self) -> Result<bool, LinkError> {
        let mut state = self.lock()?;
        let Some(op) = state.history.undo() else {
            return Ok(false);
        };
        let Some(primary) = op.primary_id().cloned() else {
            return Ok(true);
        };
        match op.previous_state {
            Some(result) => {
                state.links.insert(primary, result);
            }
            None => {
                state.links.remove(&primary);
            }
        }
        debug!(op = %op.op_type, "undid operation");
        Ok(true)
    }

    /// Reapplies the most recently undone operation. Returns false when
    /// the history cursor is already at the tail.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the store mutex is poisoned.
    pub fn redo(&self) -> Result<bool, LinkError> {
        let mut state = self.lock()?;
        let Some(op) = state.history.redo() else {
            return Ok(false);
        };
        let Some(primary) = op.primary_id().cloned() else {
            return Ok(true);
        };
        match op.new_state {
            Some(result) => {
                state.links.insert(primary, result);
            }
            None => {
                state.links.remove(&primary);
            }
        }
        debug!(op = %op.op_type, "redid operation");
        Ok(true)
    }

    /// Returns true if an undo is possible.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the store mutex is poisoned.
    pub fn can_undo(&self) -> Result<bool, LinkError> {
        Ok(self.lock()?.history.can_undo())
    }

    /// Returns true if a redo is possible.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the store mutex is poisoned.
    pub fn can_redo(&self) -> Result<bool, LinkError> {
        Ok(self.lock()?.history.can_redo())
    }

    /// Derived status for one id, or `None` if it is not linked.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the store mutex is poisoned.
    pub fn get_linking_status(
        &self,
        id: &IngredientId,
    ) -> Result<Option<LinkingStatus>, LinkError> {
        let state = self.lock()?;
        let Some(result) = state.links.get(id) else {
            return Ok(None);
        };
        let last_modified = state.history.latest_for(id).map(|op| op.timestamp);
        Ok(Some(LinkingStatus {
            linked: true,
            populations: result.populations(),
            conflicts: result.unresolved_conflicts().len(),
            last_modified,
            confidence: result.confidence,
        }))
    }

    /// The stored linking result for one id, if any.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the store mutex is poisoned.
    pub fn get_linking_result(
        &self,
        id: &IngredientId,
    ) -> Result<Option<LinkingResult>, LinkError> {
        Ok(self.lock()?.links.get(id).cloned())
    }

    /// Ids of every currently linked source, sorted.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the store mutex is poisoned.
    pub fn linked_ids(&self) -> Result<Vec<IngredientId>, LinkError> {
        let state = self.lock()?;
        let mut ids: Vec<IngredientId> = state.links.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    /// Number of retained history operations.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the store mutex is poisoned.
    pub fn history_len(&self) -> Result<usize, LinkError> {
        Ok(self.lock()?.history.len())
    }

    /// Serializes the store and history into a single snapshot.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the store mutex is poisoned.
    pub fn export_linking_data(&self) -> Result<LinkingExport, LinkError> {
        let state = self.lock()?;
        let links = state
            .links
            .iter()
            .map(|(id, result)| {
                let linked_ingredients = result
                    .linked
                    .iter()
                    .map(|(&population, record)| LinkedIngredientRef {
                        population,
                        ingredient_id: record.id.clone(),
                    })
                    .collect();
                (
                    id.clone(),
                    ExportedLink {
                        source_ingredient: result.source.id.clone(),
                        linked_ingredients,
                        conflicts: result.conflicts.clone(),
                        confidence: result.confidence,
                    },
                )
            })
            .collect();

        Ok(LinkingExport {
            links,
            history: state.history.entries().to_vec(),
            timestamp: Utc::now(),
        })
    }

    /// Restores a previously exported snapshot.
    ///
    /// Only the operation history is restored (cursor at the tail); the
    /// link map starts empty because exported links carry id references
    /// only. Callers re-hydrate records by id and re-link as needed.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the store mutex is poisoned.
    pub fn import_linking_data(&self, export: LinkingExport) -> Result<(), LinkError> {
        let mut state = self.lock()?;
        state.links.clear();
        state.history = OperationHistory::from_entries(export.history);
        debug!(history = state.history.len(), "imported linking data");
        Ok(())
    }

    /// Drops every link and the whole history.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the store mutex is poisoned.
    pub fn clear(&self) -> Result<(), LinkError> {
        let mut state = self.lock()?;
        state.links.clear();
        state.history.clear();
        Ok(())
    }
}
