//! Per-tier score thresholds.
//!
//! A piece of content is flagged for a category when its score meets or
//! exceeds the threshold of the book's age rating. Columns are ordered
//! `ALL, 13+, 16+, 18+` and never decrease left to right.

use crate::models::{AgeRating, CategoryScores};

/// Threshold for any category the table does not list.
pub const DEFAULT_THRESHOLDS: [f64; 4] = [0.50, 0.50, 0.50, 0.50];

pub const THRESHOLD_TABLE: &[(&str, [f64; 4])] = &[
    ("harassment", [0.20, 0.35, 0.50, 0.70]),
    ("harassment/threatening", [0.10, 0.20, 0.35, 0.50]),
    ("hate", [0.10, 0.20, 0.30, 0.40]),
    ("hate/threatening", [0.05, 0.10, 0.20, 0.30]),
    ("illicit", [0.20, 0.35, 0.50, 0.70]),
    ("illicit/violent", [0.10, 0.20, 0.35, 0.50]),
    ("self-harm", [0.10, 0.20, 0.35, 0.50]),
    ("self-harm/intent", [0.05, 0.10, 0.20, 0.35]),
    ("self-harm/instructions", [0.05, 0.10, 0.15, 0.25]),
    ("sexual", [0.10, 0.30, 0.60, 0.90]),
    ("sexual/minors", [0.01, 0.01, 0.01, 0.01]),
    ("violence", [0.30, 0.50, 0.70, 0.85]),
    ("violence/graphic", [0.15, 0.35, 0.60, 0.80]),
];

fn tier_index(rating: AgeRating) -> usize {
    match rating {
        AgeRating::All => 0,
        AgeRating::Teen13 => 1,
        AgeRating::Teen16 => 2,
        AgeRating::Adult18 => 3,
    }
}

pub fn threshold(rating: AgeRating, category: &str) -> f64 {
    let row = THRESHOLD_TABLE
        .iter()
        .find(|(name, _)| *name == category)
        .map(|(_, row)| row)
        .unwrap_or(&DEFAULT_THRESHOLDS);
    row[tier_index(rating)]
}

// NaN sorts as the worst possible score.
fn normalize(score: f64) -> f64 {
    if score.is_nan() {
        1.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// Categories whose score reaches the tier threshold, in name order.
pub fn flagged_categories(scores: &CategoryScores, rating: AgeRating) -> Vec<String> {
    scores
        .iter()
        .filter(|(category, score)| normalize(**score) >= threshold(rating, category))
        .map(|(category, _)| category.clone())
        .collect()
}

pub fn is_flagged(scores: &CategoryScores, rating: AgeRating) -> bool {
    scores
        .iter()
        .any(|(category, score)| normalize(*score) >= threshold(rating, category))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(entries: &[(&str, f64)]) -> CategoryScores {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect()
    }

    #[test]
    fn table_is_monotonic_across_tiers() {
        for (category, row) in THRESHOLD_TABLE.iter().chain([("default", DEFAULT_THRESHOLDS)].iter()) {
            for pair in row.windows(2) {
                assert!(pair[0] <= pair[1], "{} thresholds decrease: {:?}", category, row);
            }
        }
    }

    #[test]
    fn unknown_category_uses_default_row() {
        assert_eq!(threshold(AgeRating::Teen16, "spam"), 0.50);
    }

    #[test]
    fn nan_score_is_flagged() {
        assert!(is_flagged(&scores(&[("hate", f64::NAN)]), AgeRating::Adult18));
    }

    #[test]
    fn out_of_range_scores_are_clamped() {
        assert!(!is_flagged(&scores(&[("violence", -3.0)]), AgeRating::All));
        assert!(is_flagged(&scores(&[("violence", 7.0)]), AgeRating::Adult18));
    }

    #[test]
    fn flagged_categories_are_sorted() {
        let flagged = flagged_categories(
            &scores(&[("violence", 0.9), ("hate", 0.9), ("sexual", 0.0)]),
            AgeRating::Teen13,
        );
        assert_eq!(flagged, vec!["hate".to_string(), "violence".to_string()]);
    }
}
