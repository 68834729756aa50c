//! Bounded, index-addressed operation history.
//!
//! A standard linear undo/redo log: pushing after an undo discards the
//! stale redo branch, and the log is capped so long sessions cannot grow
//! it without bound. The history records *state snapshots*; applying
//! them back into the store is the linking service's job.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ingredient::IngredientId;
use crate::linking::LinkingResult;
use crate::population::Population;

/// Maximum retained operations; the oldest is evicted beyond this.
pub const MAX_HISTORY: usize = 50;

/// Unique identifier for a linking operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Creates a new random operation ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of mutation an operation performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    /// A single link was created or replaced.
    Link,
    /// A link was removed, fully or per-population.
    Unlink,
    /// A link created by a bulk pass.
    BulkLink,
    /// A conflict resolution was applied.
    ResolveConflict,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Link => write!(f, "link"),
            Self::Unlink => write!(f, "unlink"),
            Self::BulkLink => write!(f, "bulk_link"),
            Self::ResolveConflict => write!(f, "resolve_conflict"),
        }
    }
}

/// One undoable/redoable action over the linking store.
///
/// Never mutated after append, except by history truncation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkingOperation {
    /// Unique identifier.
    pub id: OperationId,

    /// What the operation did.
    pub op_type: OperationType,

    /// When it was applied.
    pub timestamp: DateTime<Utc>,

    /// Ingredient ids the operation touched; the first is the primary
    /// id whose store entry undo/redo restores.
    pub ingredient_ids: Vec<IngredientId>,

    /// Populations the operation touched.
    pub populations: Vec<Population>,

    /// Store state for the primary id before the mutation. Absent means
    /// the id was not linked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_state: Option<LinkingResult>,

    /// Store state for the primary id after the mutation. Absent means
    /// the mutation removed the entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_state: Option<LinkingResult>,
}

impl LinkingOperation {
    /// Creates an operation stamped with the current time.
    #[must_use]
    pub fn new(
        op_type: OperationType,
        ingredient_ids: Vec<IngredientId>,
        populations: Vec<Population>,
        previous_state: Option<LinkingResult>,
        new_state: Option<LinkingResult>,
    ) -> Self {
        Self {
            id: OperationId::new(),
            op_type,
            timestamp: Utc::now(),
            ingredient_ids,
            populations,
            previous_state,
            new_state,
        }
    }

    /// The id whose store entry this operation governs.
    #[must_use]
    pub fn primary_id(&self) -> Option<&IngredientId> {
        self.ingredient_ids.first()
    }

    /// Returns true if the operation touched the given id.
    #[must_use]
    pub fn references(&self, id: &IngredientId) -> bool {
        self.ingredient_ids.iter().any(|i| i == id)
    }
}

/// Linear command log with a cursor.
///
/// The cursor points at the most recently applied (undoable) operation;
/// `None` means everything has been undone (or the log is empty).
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct OperationHistory {
    entries: Vec<LinkingOperation>,
    cursor: Option<usize>,
}

impl OperationHistory {
    /// Creates an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores a history from exported entries, cursor at the tail.
    #[must_use]
    pub fn from_entries(mut entries: Vec<LinkingOperation>) -> Self {
        if entries.len() > MAX_HISTORY {
            entries.drain(..entries.len() - MAX_HISTORY);
        }
        let cursor = entries.len().checked_sub(1);
        Self { entries, cursor }
    }

    /// Appends an operation, discarding any undone tail first.
    ///
    /// Beyond the cap the oldest entry is dropped; the cursor stays on
    /// the new entry either way.
    pub fn push(&mut self, op: LinkingOperation) {
        let keep = self.cursor.map_or(0, |i| i + 1);
        self.entries.truncate(keep);
        self.entries.push(op);
        if self.entries.len() > MAX_HISTORY {
            self.entries.remove(0);
        }
        self.cursor = Some(self.entries.len() - 1);
    }

    /// Steps the cursor back and returns the operation to revert.
    /// `None` when there is nothing left to undo.
    pub fn undo(&mut self) -> Option<LinkingOperation> {
        let index = self.cursor?;
        self.cursor = index.checked_sub(1);
        Some(self.entries[index].clone())
    }

    /// Steps the cursor forward and returns the operation to reapply.
    /// `None` when the cursor is already at the tail.
    pub fn redo(&mut self) -> Option<LinkingOperation> {
        let next = self.cursor.map_or(0, |i| i + 1);
        if next >= self.entries.len() {
            return None;
        }
        self.cursor = Some(next);
        Some(self.entries[next].clone())
    }

    /// Returns true if an undo is possible.
    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.cursor.is_some()
    }

    /// Returns true if a redo is possible.
    #[must_use]
    pub fn can_redo(&self) -> bool {
        match self.cursor {
            None => !self.entries.is_empty(),
            Some(i) => i + 1 < self.entries.len(),
        }
    }

    /// Number of retained operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no operations are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All retained operations, oldest first.
    #[must_use]
    pub fn entries(&self) -> &[LinkingOperation] {
        &self.entries
    }

    /// The most recent operation referencing the given id, regardless
    /// of cursor position.
    #[must_use]
    pub fn latest_for(&self, id: &IngredientId) -> Option<&LinkingOperation> {
        self.entries.iter().rev().find(|op| op.references(id))
    }

    /// Drops all entries and resets the cursor.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = None;
    }
}
