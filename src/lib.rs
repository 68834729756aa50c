//! # Formlink - Cross-Population Ingredient Reconciliation
//!
//! Formlink decides whether two independently-maintained ingredient
//! records, defined per patient-population cohort, represent the same
//! clinical ingredient. It links them, detects and resolves field-level
//! conflicts between linked copies, and keeps a reversible history of
//! every linking decision. A companion orchestrator computes structural
//! differences between paired records with result caching.
//!
//! ## Core Concepts
//!
//! - **Population**: a patient cohort (neonatal/child/adolescent/adult)
//!   under which an ingredient may have a distinct record
//! - **Candidate**: a scored, proposed link target prior to confirmation
//! - **Conflict**: a field on which linked records disagree; a valid,
//!   inspectable state rather than an error
//! - **Confidence**: mean similarity across all linked targets
//!
//! ## Usage
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use formlink::{IngredientRecord, LinkingService, Population};
//!
//! let service = LinkingService::new();
//!
//! let source = IngredientRecord::new("neo-1", "Calcium Gluconate", Population::Neonatal);
//! let target = IngredientRecord::new("chi-1", "Calcium Gluconate", Population::Child);
//!
//! let mut targets = BTreeMap::new();
//! targets.insert(target.population, target);
//!
//! let result = service.link_ingredients(&source, &targets, false).unwrap();
//! assert!(result.confidence > 0.9);
//!
//! service.undo().unwrap();
//! assert!(service.get_linking_status(&"neo-1".into()).unwrap().is_none());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Domain types
pub mod error;
pub mod ingredient;
pub mod population;

// Detection and scoring
pub mod candidate;
pub mod similarity;

// Linking store, conflicts, and history
pub mod conflict;
pub mod history;
pub mod linking;

// Comparison orchestration
pub mod compare;

// Re-export primary types at crate root for convenience
pub use candidate::{detect_shared_ingredients, LinkingCandidate};
pub use compare::cache::{CacheKey, ComparisonCache};
pub use compare::{
    ChangeKind, ComparisonId, ComparisonMode, ComparisonOrchestrator, ComparisonPair,
    ComparisonResult, ComparisonSummary, DiffEngine, DiffEntry, DiffOptions, DiffStatistics,
    RecordSource, Snapshot,
};
pub use conflict::{detect_conflicts, ConflictField, ConflictResolution, LinkingConflict};
pub use error::{
    CompareError, FormlinkError, FormlinkResult, LinkError, RetrievalError, ValidationError,
};
pub use history::{
    LinkingOperation, OperationHistory, OperationId, OperationType, MAX_HISTORY,
};
pub use ingredient::{IngredientId, IngredientRecord, ReferenceRange};
pub use linking::{
    BulkConflictPolicy, BulkLinkOptions, ExportedLink, LinkedIngredientRef, LinkingExport,
    LinkingResult, LinkingService, LinkingStatus,
};
pub use population::Population;
pub use similarity::{MatchType, MatchedField, SimilarityScore, CANDIDATE_THRESHOLD};
