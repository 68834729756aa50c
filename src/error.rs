//! Error types for formlink.
//!
//! All errors are strongly typed using thiserror. Three conditions from
//! the engine contract are deliberately *not* errors: an id that is not
//! linked surfaces as `None`, an exhausted undo/redo returns `false`,
//! and an unresolved conflict is an inspectable state of a link, not a
//! failure.

use thiserror::Error;

use crate::ingredient::IngredientId;
use crate::population::Population;

/// Validation errors that occur during input validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A source record's name was empty or whitespace.
    #[error("Ingredient name cannot be empty")]
    EmptyIngredientName,

    /// A link call was given no target records.
    #[error("Link requires at least one target record")]
    EmptyLinkTargets,

    /// A reference range had inverted bounds.
    #[error("Invalid reference range: min ({min}) is greater than max ({max})")]
    InvalidReferenceRange {
        /// The offending lower bound.
        min: f64,
        /// The offending upper bound.
        max: f64,
    },

    /// A bulk operation was given no populations to search.
    #[error("Population set cannot be empty")]
    EmptyPopulationSet,
}

/// A required snapshot could not be fetched from the record store.
///
/// Produced by [`RecordSource`](crate::compare::RecordSource)
/// implementations. The engine never retries a failed fetch; retry
/// policy belongs to the store collaborator.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// The store holds no snapshot for the requested view.
    #[error("Snapshot not found for {id} in {population}{}", .version.as_deref().map(|v| format!(" at version {v}")).unwrap_or_default())]
    SnapshotNotFound {
        /// The requested ingredient.
        id: IngredientId,
        /// The requested population view.
        population: Population,
        /// The requested version, for version-mode fetches.
        version: Option<String>,
    },

    /// The store itself failed; a retry may succeed.
    #[error("Record store backend error: {message}")]
    Backend {
        /// Backend-supplied failure description.
        message: String,
    },
}

/// Errors from linking-store mutations.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Input validation failed before the store was touched.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The store is in an unusable state (poisoned lock).
    #[error("Internal linking error: {message}")]
    Internal {
        /// What went wrong.
        message: String,
    },
}

impl LinkError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Errors from comparison orchestration.
#[derive(Debug, Error)]
pub enum CompareError {
    /// A snapshot fetch failed.
    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    /// A population comparison needs at least two distinct populations.
    #[error("Population comparison requires at least two populations, got {count}")]
    InsufficientPopulations {
        /// Distinct populations after deduplication.
        count: usize,
    },

    /// A fetched snapshot could not be canonicalized.
    #[error("Failed to serialize snapshot: {message}")]
    Serialization {
        /// Serializer failure description.
        message: String,
    },
}

/// Top-level error type for formlink.
#[derive(Debug, Error)]
pub enum FormlinkError {
    /// An error from the linking store.
    #[error("Linking error: {0}")]
    Link(#[from] LinkError),

    /// An error from comparison orchestration.
    #[error("Comparison error: {0}")]
    Compare(#[from] CompareError),
}

impl FormlinkError {
    /// Returns true if a retry against the record store could succeed.
    ///
    /// Only backend retrieval failures are retryable; validation and
    /// missing-snapshot conditions will not change on retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Compare(CompareError::Retrieval(RetrievalError::Backend { .. }))
        )
    }
}

/// Result type alias for formlink operations.
pub type FormlinkResult<T> = Result<T, FormlinkError>;
