//! Weighted similarity scoring between ingredient records.
//!
//! Scoring is a pure function: no state, no I/O. A weight contributes
//! only when the field is applicable on both sides, and the final score
//! is normalized by the weights actually applied, so an absent optional
//! field never penalizes a pair.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ingredient::{IngredientRecord, ReferenceRange};

/// Admission threshold for linking candidates (strictly greater than).
pub const CANDIDATE_THRESHOLD: f64 = 0.5;

/// Minimum per-field similarity for a field to count as matched.
const MATCHED_FIELD_MIN: f64 = 0.8;

const NAME_WEIGHT: f64 = 0.4;
const DISPLAY_NAME_WEIGHT: f64 = 0.3;
const CATEGORY_WEIGHT: f64 = 0.15;
const UNIT_WEIGHT: f64 = 0.1;
const RANGE_WEIGHT: f64 = 0.05;

/// Classification of a similarity score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    /// Score at or above 0.95.
    Exact,
    /// Score at or above 0.75.
    Partial,
    /// Anything weaker that still cleared the candidate threshold.
    Fuzzy,
}

impl MatchType {
    /// Classifies a score.
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= 0.95 {
            Self::Exact
        } else if score >= 0.75 {
            Self::Partial
        } else {
            Self::Fuzzy
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::Partial => write!(f, "partial"),
            Self::Fuzzy => write!(f, "fuzzy"),
        }
    }
}

/// A field that contributed a match between two records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedField {
    /// Primary names agreed.
    Name,
    /// Display names agreed.
    DisplayName,
    /// Categories were identical.
    Category,
    /// Units were identical.
    Unit,
    /// Reference ranges for shared populations overlapped.
    ReferenceRanges,
}

impl fmt::Display for MatchedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name => write!(f, "name"),
            Self::DisplayName => write!(f, "display_name"),
            Self::Category => write!(f, "category"),
            Self::Unit => write!(f, "unit"),
            Self::ReferenceRanges => write!(f, "reference_ranges"),
        }
    }
}

/// The outcome of scoring one pair of records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityScore {
    /// Normalized weighted similarity in [0, 1].
    pub value: f64,

    /// Classification derived from `value`.
    pub match_type: MatchType,

    /// Fields that individually cleared the match bar.
    pub matched_fields: Vec<MatchedField>,
}

/// Classic dynamic-programming edit distance (insert/delete/substitute,
/// unit cost each). Operates on Unicode scalar values.
#[must_use]
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    // Single-row DP over the shorter string.
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, &ca) in a.iter().enumerate() {
        let mut prev_diag = row[0];
        row[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = prev_diag + usize::from(ca != cb);
            prev_diag = row[j + 1];
            row[j + 1] = substitution.min(row[j] + 1).min(row[j + 1] + 1);
        }
    }
    row[b.len()]
}

/// Case-insensitive edit-distance similarity: `1 - lev / max(len)`.
///
/// Two empty strings are identical (1.0); one empty against one
/// non-empty is maximally dissimilar (0.0).
#[must_use]
pub fn string_similarity(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();

    let len_a = a.chars().count();
    let len_b = b.chars().count();
    if len_a == 0 && len_b == 0 {
        return 1.0;
    }
    if len_a == 0 || len_b == 0 {
        return 0.0;
    }

    let distance = levenshtein(&a, &b);
    let max_len = len_a.max(len_b);
    #[allow(clippy::cast_precision_loss)]
    {
        1.0 - distance as f64 / max_len as f64
    }
}

/// Fraction of population-matched range pairs that overlap.
///
/// Returns `None` when either side carries no ranges (the weight does
/// not apply). When both sides have ranges but no pair shares a
/// population tag, the score is 0.0.
#[must_use]
pub fn reference_range_overlap(a: &[ReferenceRange], b: &[ReferenceRange]) -> Option<f64> {
    if a.is_empty() || b.is_empty() {
        return None;
    }

    let mut compared = 0usize;
    let mut overlapping = 0usize;
    for ra in a {
        for rb in b {
            if ra.population != rb.population {
                continue;
            }
            compared += 1;
            if ra.overlaps(rb) {
                overlapping += 1;
            }
        }
    }

    if compared == 0 {
        return Some(0.0);
    }
    #[allow(clippy::cast_precision_loss)]
    Some(overlapping as f64 / compared as f64)
}

/// Computes the weighted similarity between two records.
///
/// Weights: name 0.4, display name 0.3, category 0.15, unit 0.1,
/// reference-range overlap 0.05. Optional fields contribute only when
/// present on both sides; the accumulated sum is divided by the weights
/// actually applied. If nothing applies the score is 0.
///
/// # Examples
///
/// ```
/// use formlink::{similarity, IngredientRecord, Population};
///
/// let a = IngredientRecord::new("a", "Calcium Gluconate", Population::Neonatal);
/// let b = IngredientRecord::new("b", "Calcium Gluconate", Population::Child);
/// let score = similarity::score(&a, &b);
/// assert!((score.value - 1.0).abs() < f64::EPSILON);
/// ```
#[must_use]
pub fn score(a: &IngredientRecord, b: &IngredientRecord) -> SimilarityScore {
    let mut weighted = 0.0;
    let mut applied = 0.0;
    let mut matched_fields = Vec::new();

    let name_sim = string_similarity(&a.name, &b.name);
    weighted += NAME_WEIGHT * name_sim;
    applied += NAME_WEIGHT;
    if name_sim >= MATCHED_FIELD_MIN {
        matched_fields.push(MatchedField::Name);
    }

    if let (Some(da), Some(db)) = (&a.display_name, &b.display_name) {
        let sim = string_similarity(da, db);
        weighted += DISPLAY_NAME_WEIGHT * sim;
        applied += DISPLAY_NAME_WEIGHT;
        if sim >= MATCHED_FIELD_MIN {
            matched_fields.push(MatchedField::DisplayName);
        }
    }

    if let (Some(ca), Some(cb)) = (&a.category, &b.category) {
        let exact = ca == cb;
        weighted += CATEGORY_WEIGHT * f64::from(u8::from(exact));
        applied += CATEGORY_WEIGHT;
        if exact {
            matched_fields.push(MatchedField::Category);
        }
    }

    if let (Some(ua), Some(ub)) = (&a.unit, &b.unit) {
        let exact = ua == ub;
        weighted += UNIT_WEIGHT * f64::from(u8::from(exact));
        applied += UNIT_WEIGHT;
        if exact {
            matched_fields.push(MatchedField::Unit);
        }
    }

    if let Some(overlap) = reference_range_overlap(&a.reference_ranges, &b.reference_ranges) {
        weighted += RANGE_WEIGHT * overlap;
        applied += RANGE_WEIGHT;
        if overlap >= MATCHED_FIELD_MIN {
            matched_fields.push(MatchedField::ReferenceRanges);
        }
    }

    let value = if applied > 0.0 { weighted / applied } else { 0.0 };
    SimilarityScore {
        value,
        match_type: MatchType::from_score(value),
        matched_fields,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::population::Population;

    fn record(name: &str) -> IngredientRecord {
        IngredientRecord::new("ing", name, Population::Neonatal)
    }

    #[test]
    fn test_levenshtein_basics() {
        assert_eq!(levenshtein("", ""), 0);
        assert_eq!(levenshtein("abc", ""), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("flaw", "lawn"), 2);
    }

    #[test]
    fn test_string_similarity_empty_conventions() {
        assert!((string_similarity("", "") - 1.0).abs() < f64::EPSILON);
        assert!((string_similarity("a", "")).abs() < f64::EPSILON);
        assert!((string_similarity("", "a")).abs() < f64::EPSILON);
    }

    #[test]
    fn test_string_similarity_case_insensitive() {
        assert!((string_similarity("Heparin", "heparin") - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_score_reflexivity() {
        let a = record("Calcium Gluconate")
            .with_display_name("Calcium Gluconate 10%")
            .with_category("electrolyte")
            .with_unit("mEq")
            .with_reference_range(
                ReferenceRange::new(Population::Neonatal, Some(1.0), Some(2.0)).unwrap(),
            );
        let s = score(&a, &a);
        assert!((s.value - 1.0).abs() < f64::EPSILON);
        assert_eq!(s.match_type, MatchType::Exact);
        assert_eq!(
            s.matched_fields,
            vec![
                MatchedField::Name,
                MatchedField::DisplayName,
                MatchedField::Category,
                MatchedField::Unit,
                MatchedField::ReferenceRanges,
            ]
        );
    }

    #[test]
    fn test_score_absent_optional_fields_do_not_penalize() {
        // Only names are applicable; identical names score 1.0 even
        // though every optional field is missing.
        let a = record("Heparin");
        let b = record("Heparin");
        assert!((score(&a, &b).value - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_score_single_field_difference_is_its_normalized_weight() {
        // name + category + unit applicable; only category differs.
        let a = record("Heparin").with_category("anticoagulant").with_unit("units");
        let b = record("Heparin").with_category("electrolyte").with_unit("units");
        let s = score(&a, &b);

        let expected = (0.4 + 0.1) / (0.4 + 0.15 + 0.1);
        assert!((s.value - expected).abs() < 1e-9);
        assert_eq!(s.matched_fields, vec![MatchedField::Name, MatchedField::Unit]);
    }

    #[test]
    fn test_range_overlap_no_shared_population_scores_zero() {
        let a = vec![ReferenceRange::new(Population::Neonatal, Some(1.0), Some(2.0)).unwrap()];
        let b = vec![ReferenceRange::new(Population::Child, Some(1.0), Some(2.0)).unwrap()];
        assert_eq!(reference_range_overlap(&a, &b), Some(0.0));
    }

    #[test]
    fn test_range_overlap_not_applicable_when_either_side_empty() {
        let a = vec![ReferenceRange::new(Population::Neonatal, Some(1.0), Some(2.0)).unwrap()];
        assert_eq!(reference_range_overlap(&a, &[]), None);
        assert_eq!(reference_range_overlap(&[], &a), None);
    }

    #[test]
    fn test_range_overlap_partial() {
        let a = vec![
            ReferenceRange::new(Population::Child, Some(1.0), Some(5.0)).unwrap(),
            ReferenceRange::new(Population::Child, Some(100.0), Some(200.0)).unwrap(),
        ];
        let b = vec![ReferenceRange::new(Population::Child, Some(4.0), Some(8.0)).unwrap()];
        // Two compared pairs, one overlapping.
        assert_eq!(reference_range_overlap(&a, &b), Some(0.5));
    }

    #[test]
    fn test_calcium_scenario_exact_match() {
        // Same name/display/category/unit, reference ranges tagged for
        // different populations: the range term applies with value 0,
        // giving exactly 0.95.
        let a = record("Calcium Gluconate")
            .with_display_name("Calcium Gluconate")
            .with_category("electrolyte")
            .with_unit("mEq")
            .with_reference_range(
                ReferenceRange::new(Population::Neonatal, Some(1.0), Some(2.0)).unwrap(),
            );
        let b = IngredientRecord::new("other", "Calcium Gluconate", Population::Child)
            .with_display_name("Calcium Gluconate")
            .with_category("electrolyte")
            .with_unit("mEq")
            .with_reference_range(
                ReferenceRange::new(Population::Child, Some(1.5), Some(2.5)).unwrap(),
            );

        let s = score(&a, &b);
        assert!(s.value >= 0.95);
        assert_eq!(s.match_type, MatchType::Exact);
    }

    #[test]
    fn test_calcium_carbonate_is_weaker_than_exact() {
        let a = record("Calcium Gluconate").with_category("electrolyte").with_unit("mEq");
        let b = record("Calcium Carbonate").with_category("electrolyte").with_unit("mEq");

        let s = score(&a, &b);
        assert!(s.value > CANDIDATE_THRESHOLD);
        assert!(s.value < 0.95);
        assert_ne!(s.match_type, MatchType::Exact);
    }

    #[test]
    fn test_match_type_thresholds() {
        assert_eq!(MatchType::from_score(0.95), MatchType::Exact);
        assert_eq!(MatchType::from_score(0.949), MatchType::Partial);
        assert_eq!(MatchType::from_score(0.75), MatchType::Partial);
        assert_eq!(MatchType::from_score(0.749), MatchType::Fuzzy);
    }
}
