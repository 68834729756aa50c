//! Candidate detection across populations.
//!
//! Detection is a pure read: it proposes ranked link targets without
//! touching the linking store. Complexity is quadratic in the working
//! set, which is acceptable because detection runs on curated batches,
//! not full catalogs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ingredient::{IngredientId, IngredientRecord};
use crate::population::Population;
use crate::similarity::{self, MatchType, MatchedField, CANDIDATE_THRESHOLD};

/// A proposed match for a source record in a target population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkingCandidate {
    /// The proposed target record.
    pub ingredient: IngredientRecord,

    /// The population the target is defined for.
    pub population: Population,

    /// Similarity score against the source, in (0.5, 1].
    pub score: f64,

    /// Classification of the score.
    pub match_type: MatchType,

    /// Fields that individually matched.
    pub matched_fields: Vec<MatchedField>,
}

/// Finds ranked linking candidates for every record in a working set.
///
/// Each record is compared against every *other* record defined for one
/// of the requested populations. Candidates scoring strictly above the
/// admission threshold (0.5) are kept, sorted descending by score with a
/// stable sort so equal scores keep comparison order. Sources with no
/// admissible candidate are omitted from the map.
#[must_use]
pub fn detect_shared_ingredients(
    records: &[IngredientRecord],
    populations: &[Population],
) -> BTreeMap<IngredientId, Vec<LinkingCandidate>> {
    let mut results = BTreeMap::new();

    for source in records {
        let mut candidates = Vec::new();
        for &population in populations {
            for other in records {
                if other.id == source.id || other.population != population {
                    continue;
                }
                let scored = similarity::score(source, other);
                if scored.value > CANDIDATE_THRESHOLD {
                    candidates.push(LinkingCandidate {
                        ingredient: other.clone(),
                        population,
                        score: scored.value,
                        match_type: scored.match_type,
                        matched_fields: scored.matched_fields,
                    });
                }
            }
        }

        if !candidates.is_empty() {
            candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
            results.insert(source.id.clone(), candidates);
        }
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(id: &str, name: &str, population: Population) -> IngredientRecord {
        IngredientRecord::new(id, name, population)
            .with_category("electrolyte")
            .with_unit("mEq")
    }

    #[test]
    fn test_detects_cross_population_duplicates() {
        let records = vec![
            named("neo-1", "Calcium Gluconate", Population::Neonatal),
            named("chi-1", "Calcium Gluconate", Population::Child),
            IngredientRecord::new("chi-2", "Insulin", Population::Child),
        ];

        let detected = detect_shared_ingredients(&records, &[Population::Child]);

        let candidates = &detected[&IngredientId::new("neo-1")];
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].ingredient.id, IngredientId::new("chi-1"));
        assert_eq!(candidates[0].match_type, MatchType::Exact);
    }

    #[test]
    fn test_unrelated_records_below_threshold_are_dropped() {
        let records = vec![
            named("neo-1", "Calcium Gluconate", Population::Neonatal),
            IngredientRecord::new("chi-1", "Zinc", Population::Child),
        ];

        let detected = detect_shared_ingredients(&records, &[Population::Child]);
        assert!(!detected.contains_key(&IngredientId::new("neo-1")));
    }

    #[test]
    fn test_excludes_self_and_unrequested_populations() {
        let records = vec![
            named("neo-1", "Heparin", Population::Neonatal),
            named("adu-1", "Heparin", Population::Adult),
        ];

        // Adult not in the requested set, so nothing qualifies.
        let detected = detect_shared_ingredients(&records, &[Population::Child]);
        assert!(detected.is_empty());

        let detected = detect_shared_ingredients(&records, &[Population::Adult]);
        assert_eq!(detected[&IngredientId::new("neo-1")].len(), 1);
        // The adult record also sees the neonatal one when asked for it.
        let detected = detect_shared_ingredients(&records, &Population::ALL);
        assert_eq!(detected[&IngredientId::new("adu-1")].len(), 1);
    }

    #[test]
    fn test_candidates_sorted_descending_by_score() {
        let records = vec![
            named("neo-1", "Calcium Gluconate", Population::Neonatal),
            named("chi-1", "Calcium Gluconate", Population::Child),
            named("chi-2", "Calcium Carbonate", Population::Child),
        ];

        let detected = detect_shared_ingredients(&records, &[Population::Child]);
        let candidates = &detected[&IngredientId::new("neo-1")];
        assert_eq!(candidates.len(), 2);
        assert!(candidates[0].score >= candidates[1].score);
        assert_eq!(candidates[0].ingredient.id, IngredientId::new("chi-1"));
    }
}
