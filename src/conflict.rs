//! Field-level conflict detection between linked records.
//!
//! Conflicts are first-class objects, not errors. A link carrying an
//! unresolved conflict is a valid, inspectable state. The compared field
//! set is a closed enum so the compiler enforces exhaustiveness instead
//! of relying on stringly-typed field lookup.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ingredient::IngredientRecord;
use crate::population::Population;

/// A record field that participates in conflict detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictField {
    /// Primary ingredient name.
    Name,
    /// Human-facing display name.
    DisplayName,
    /// Dosing unit.
    Unit,
    /// Therapeutic category.
    Category,
    /// Concentration expression.
    Concentration,
}

impl ConflictField {
    /// All compared fields.
    pub const ALL: [Self; 5] = [
        Self::Name,
        Self::DisplayName,
        Self::Unit,
        Self::Category,
        Self::Concentration,
    ];

    /// Reads this field from a record. `None` means the field is not
    /// defined on that record.
    #[must_use]
    pub fn value_of(self, record: &IngredientRecord) -> Option<String> {
        match self {
            Self::Name => Some(record.name.clone()),
            Self::DisplayName => record.display_name.clone(),
            Self::Unit => record.unit.clone(),
            Self::Category => record.category.clone(),
            Self::Concentration => record.concentration.clone(),
        }
    }

    /// Writes a value into this field on a record.
    pub fn apply(self, record: &mut IngredientRecord, value: &str) {
        match self {
            Self::Name => record.name = value.to_string(),
            Self::DisplayName => record.display_name = Some(value.to_string()),
            Self::Unit => record.unit = Some(value.to_string()),
            Self::Category => record.category = Some(value.to_string()),
            Self::Concentration => record.concentration = Some(value.to_string()),
        }
    }

    /// Returns the canonical snake_case field name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::DisplayName => "display_name",
            Self::Unit => "unit",
            Self::Category => "category",
            Self::Concentration => "concentration",
        }
    }
}

impl fmt::Display for ConflictField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a conflict was (or should be) resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Leave every population's value in place.
    KeepAll,

    /// Treat the source record's value as authoritative; no value
    /// mutation, the disagreement is simply accepted.
    UsePrimary,

    /// Overwrite the field on every linked target with the given value.
    Manual {
        /// The value to write.
        value: String,
    },
}

impl fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeepAll => write!(f, "keep_all"),
            Self::UsePrimary => write!(f, "use_primary"),
            Self::Manual { value } => write!(f, "manual({value})"),
        }
    }
}

/// A disagreement on one field across a link set.
///
/// Detection triggers on disagreement with the source only, but the
/// conflict retains the full per-population value map and lists every
/// population in the link set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkingConflict {
    /// The disputed field.
    pub field: ConflictField,

    /// Every population in the link set, source included.
    pub populations: Vec<Population>,

    /// The field's value per population, where defined.
    pub values: BTreeMap<Population, String>,

    /// The source record's value for the field.
    pub source_value: String,

    /// Recorded resolution, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ConflictResolution>,
}

impl LinkingConflict {
    /// Returns true if a resolution has been recorded.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    /// Records a resolution. Value mutation for manual resolutions is
    /// the linking store's job; this only marks the conflict.
    pub fn resolve(&mut self, resolution: ConflictResolution) {
        self.resolution = Some(resolution);
    }
}

/// Detects field-level conflicts between a source and its link targets.
///
/// A conflict is flagged for a field iff the source and at least one
/// target both define it with unequal values. Fields undefined on either
/// side never conflict.
#[must_use]
pub fn detect_conflicts(
    source: &IngredientRecord,
    targets: &BTreeMap<Population, IngredientRecord>,
) -> Vec<LinkingConflict> {
    let mut conflicts = Vec::new();

    for field in ConflictField::ALL {
        let Some(source_value) = field.value_of(source) else {
            continue;
        };

        let mut values = BTreeMap::new();
        let mut disagrees = false;
        for (&population, record) in targets {
            if let Some(value) = field.value_of(record) {
                if value != source_value {
                    disagrees = true;
                }
                values.insert(population, value);
            }
        }

        if disagrees {
            values.insert(source.population, source_value.clone());
            let populations: BTreeSet<Population> = targets
                .keys()
                .copied()
                .chain(std::iter::once(source.population))
                .collect();
            conflicts.push(LinkingConflict {
                field,
                populations: populations.into_iter().collect(),
                values,
                source_value,
                resolution: None,
            });
        }
    }

    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets_of(records: Vec<IngredientRecord>) -> BTreeMap<Population, IngredientRecord> {
        records.into_iter().map(|r| (r.population, r)).collect()
    }

    #[test]
    fn test_no_conflicts_when_fields_agree() {
        let source = IngredientRecord::new("neo-1", "Heparin", Population::Neonatal)
            .with_unit("units");
        let targets = targets_of(vec![
            IngredientRecord::new("chi-1", "Heparin", Population::Child).with_unit("units"),
        ]);

        assert!(detect_conflicts(&source, &targets).is_empty());
    }

    #[test]
    fn test_conflict_iff_both_sides_define_and_differ() {
        let source = IngredientRecord::new("neo-1", "Heparin", Population::Neonatal)
            .with_unit("units")
            .with_category("anticoagulant");
        // Unit differs, category is undefined on the target.
        let targets = targets_of(vec![
            IngredientRecord::new("chi-1", "Heparin", Population::Child).with_unit("mL"),
        ]);

        let conflicts = detect_conflicts(&source, &targets);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].field, ConflictField::Unit);
        assert_eq!(conflicts[0].source_value, "units");
    }

    #[test]
    fn test_undefined_on_source_never_conflicts() {
        let source = IngredientRecord::new("neo-1", "Heparin", Population::Neonatal);
        let targets = targets_of(vec![
            IngredientRecord::new("chi-1", "Heparin", Population::Child)
                .with_category("anticoagulant"),
        ]);

        assert!(detect_conflicts(&source, &targets).is_empty());
    }

    #[test]
    fn test_conflict_lists_all_link_set_populations() {
        let source = IngredientRecord::new("neo-1", "Heparin", Population::Neonatal)
            .with_unit("units");
        let targets = targets_of(vec![
            IngredientRecord::new("chi-1", "Heparin", Population::Child).with_unit("units"),
            IngredientRecord::new("adu-1", "Heparin", Population::Adult).with_unit("mL"),
        ]);

        let conflicts = detect_conflicts(&source, &targets);
        assert_eq!(conflicts.len(), 1);
        let conflict = &conflicts[0];
        // One disagreeing target is enough; the agreeing one is listed too.
        assert_eq!(
            conflict.populations,
            vec![Population::Neonatal, Population::Child, Population::Adult]
        );
        assert_eq!(conflict.values[&Population::Neonatal], "units");
        assert_eq!(conflict.values[&Population::Child], "units");
        assert_eq!(conflict.values[&Population::Adult], "mL");
    }

    #[test]
    fn test_resolution_marking() {
        let source = IngredientRecord::new("neo-1", "Heparin", Population::Neonatal)
            .with_unit("units");
        let targets = targets_of(vec![
            IngredientRecord::new("chi-1", "Heparin", Population::Child).with_unit("mL"),
        ]);

        let mut conflicts = detect_conflicts(&source, &targets);
        assert!(!conflicts[0].is_resolved());

        conflicts[0].resolve(ConflictResolution::UsePrimary);
        assert!(conflicts[0].is_resolved());
        assert_eq!(conflicts[0].resolution, Some(ConflictResolution::UsePrimary));
    }

    #[test]
    fn test_field_apply_and_value_of_are_inverse() {
        let mut record = IngredientRecord::new("x", "Old", Population::Child);
        for field in ConflictField::ALL {
            field.apply(&mut record, "new-value");
            assert_eq!(field.value_of(&record).as_deref(), Some("new-value"));
        }
    }

    #[test]
    fn test_resolution_serde_tags() {
        let json = serde_json::to_value(ConflictResolution::KeepAll).unwrap();
        assert_eq!(json["method"], "keep_all");

        let json = serde_json::to_value(ConflictResolution::Manual {
            value: "mEq".to_string(),
        })
        .unwrap();
        assert_eq!(json["method"], "manual");
        assert_eq!(json["value"], "mEq");
    }
}
