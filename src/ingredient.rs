//! Ingredient records and identity.
//!
//! Records are owned by the external document store; the engine works on
//! cloned snapshots and never writes back through this module. Ids are
//! assigned by the store, so they are opaque strings rather than UUIDs.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::population::Population;

/// Store-assigned ingredient identifier.
///
/// Ids are stable across populations only by accident of the upstream
/// store; two populations' views of the same clinical ingredient usually
/// carry *different* ids, which is exactly why linking exists.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct IngredientId(String);

impl IngredientId {
    /// Creates an id from a store-assigned string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IngredientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IngredientId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for IngredientId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A clinically valid value range for one population.
///
/// Absent bounds are open: a missing `min` means 0, a missing `max`
/// means unbounded above. Only ranges tagged with the same population
/// are ever compared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRange {
    /// The cohort this range applies to.
    pub population: Population,

    /// Lower bound (inclusive). Absent means 0.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    /// Upper bound (inclusive). Absent means unbounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,

    /// Unit the bounds are expressed in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl ReferenceRange {
    /// Creates a range, rejecting an inverted pair of bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidReferenceRange`] if both bounds
    /// are present and `min > max`.
    pub fn new(
        population: Population,
        min: Option<f64>,
        max: Option<f64>,
    ) -> Result<Self, ValidationError> {
        if let (Some(lo), Some(hi)) = (min, max) {
            if lo > hi {
                return Err(ValidationError::InvalidReferenceRange { min: lo, max: hi });
            }
        }
        Ok(Self {
            population,
            min,
            max,
            unit: None,
        })
    }

    /// Sets the unit the bounds are expressed in.
    #[must_use]
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Returns the effective lower bound.
    #[must_use]
    pub fn effective_min(&self) -> f64 {
        self.min.unwrap_or(0.0)
    }

    /// Returns the effective upper bound.
    #[must_use]
    pub fn effective_max(&self) -> f64 {
        self.max.unwrap_or(f64::INFINITY)
    }

    /// Returns true if the two ranges intersect.
    ///
    /// Uses the closed-interval rule `min1 <= max2 && min2 <= max1` with
    /// absent bounds treated as open.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.effective_min() <= other.effective_max()
            && other.effective_min() <= self.effective_max()
    }
}

/// A clinical ingredient as known for one population.
///
/// This is a read-only snapshot of what the external store holds. The
/// engine clones and compares these; the only mutation it ever performs
/// is replacing a stored snapshot during manual conflict resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngredientRecord {
    /// Store-assigned identifier.
    pub id: IngredientId,

    /// Primary ingredient name.
    pub name: String,

    /// Human-facing display name, if the store carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Therapeutic category.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// Dosing unit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    /// Concentration expression (e.g. "100 mg/mL").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concentration: Option<String>,

    /// The population this record is defined for.
    pub population: Population,

    /// Store version of this snapshot.
    pub version: u64,

    /// Clinically valid ranges, possibly for several populations.
    #[serde(default)]
    pub reference_ranges: Vec<ReferenceRange>,
}

impl IngredientRecord {
    /// Creates a minimal record with the given identity.
    #[must_use]
    pub fn new(
        id: impl Into<IngredientId>,
        name: impl Into<String>,
        population: Population,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            display_name: None,
            category: None,
            unit: None,
            concentration: None,
            population,
            version: 1,
            reference_ranges: Vec::new(),
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    /// Sets the therapeutic category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Sets the dosing unit.
    #[must_use]
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Sets the concentration expression.
    #[must_use]
    pub fn with_concentration(mut self, concentration: impl Into<String>) -> Self {
        self.concentration = Some(concentration.into());
        self
    }

    /// Sets the store version.
    #[must_use]
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Appends a reference range.
    #[must_use]
    pub fn with_reference_range(mut self, range: ReferenceRange) -> Self {
        self.reference_ranges.push(range);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingredient_id_roundtrip() {
        let id = IngredientId::new("ing-42");
        assert_eq!(id.as_str(), "ing-42");
        assert_eq!(format!("{id}"), "ing-42");

        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"ing-42\"");
    }

    #[test]
    fn test_reference_range_rejects_inverted_bounds() {
        let err = ReferenceRange::new(Population::Child, Some(5.0), Some(1.0));
        assert!(matches!(
            err,
            Err(ValidationError::InvalidReferenceRange { .. })
        ));
    }

    #[test]
    fn test_reference_range_overlap_closed_intervals() {
        let a = ReferenceRange::new(Population::Child, Some(1.0), Some(5.0)).unwrap();
        let b = ReferenceRange::new(Population::Child, Some(5.0), Some(9.0)).unwrap();
        let c = ReferenceRange::new(Population::Child, Some(6.0), Some(9.0)).unwrap();

        assert!(a.overlaps(&b)); // touching endpoints count
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn test_reference_range_open_bounds() {
        let unbounded = ReferenceRange::new(Population::Adult, None, None).unwrap();
        let narrow = ReferenceRange::new(Population::Adult, Some(100.0), Some(200.0)).unwrap();
        assert!(unbounded.overlaps(&narrow));
        assert!(narrow.overlaps(&unbounded));

        let no_min = ReferenceRange::new(Population::Adult, None, Some(50.0)).unwrap();
        assert!(!no_min.overlaps(&narrow)); // [0, 50] vs [100, 200]
    }

    #[test]
    fn test_record_builder_chain() {
        let record = IngredientRecord::new("ing-1", "Calcium Gluconate", Population::Neonatal)
            .with_display_name("Calcium Gluconate 10%")
            .with_category("electrolyte")
            .with_unit("mEq")
            .with_concentration("100 mg/mL")
            .with_version(3);

        assert_eq!(record.display_name.as_deref(), Some("Calcium Gluconate 10%"));
        assert_eq!(record.version, 3);
        assert!(record.reference_ranges.is_empty());
    }

    #[test]
    fn test_record_serialization_skips_absent_fields() {
        let record = IngredientRecord::new("ing-1", "Heparin", Population::Adult);
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("display_name").is_none());
        assert!(json.get("category").is_none());
        assert_eq!(json["population"], "adult");
    }
}
