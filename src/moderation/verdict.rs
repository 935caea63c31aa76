use std::collections::BTreeSet;
use std::str::FromStr;

use serde::Deserialize;

use crate::models::{
    AgeRating, BookModerationReport, ChapterVerdict, ContentVerdict, ModerationOutcome,
    ModerationRecord, VerdictStatus,
};

use super::thresholds;

/// ParseFailurePolicy
///
/// Decides what a stored result that cannot be parsed counts as. `FailOpen`
/// lets the piece pass and only logs the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseFailurePolicy {
    #[default]
    FailOpen,
    FailClosed,
}

impl FromStr for ParseFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail-open" | "open" => Ok(ParseFailurePolicy::FailOpen),
            "fail-closed" | "closed" => Ok(ParseFailurePolicy::FailClosed),
            other => Err(format!(
                "unknown parse policy '{}'; expected fail-open or fail-closed",
                other
            )),
        }
    }
}

/// Stored blobs come either as a whole API response or as a single result.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredResult {
    Response { results: Vec<ModerationOutcome> },
    Single(ModerationOutcome),
}

impl ContentVerdict {
    pub fn evaluated(flagged_categories: Vec<String>) -> Self {
        let flagged = !flagged_categories.is_empty();
        Self {
            status: VerdictStatus::Evaluated,
            flagged,
            passed: !flagged,
            flagged_categories,
        }
    }

    pub fn missing() -> Self {
        Self {
            status: VerdictStatus::Missing,
            flagged: false,
            passed: true,
            flagged_categories: Vec::new(),
        }
    }

    pub fn malformed(policy: ParseFailurePolicy) -> Self {
        let flagged = policy == ParseFailurePolicy::FailClosed;
        Self {
            status: VerdictStatus::Malformed,
            flagged,
            passed: !flagged,
            flagged_categories: Vec::new(),
        }
    }
}

/// Union of flagged categories over every result of one response.
pub fn evaluate_outcomes(results: &[ModerationOutcome], rating: AgeRating) -> Vec<String> {
    results
        .iter()
        .flat_map(|outcome| thresholds::flagged_categories(&outcome.category_scores, rating))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// parse_stored_result
///
/// Turns a persisted moderation blob into a verdict. Never fails: missing
/// blobs pass, malformed ones follow `policy` and are logged.
pub fn parse_stored_result(
    raw: Option<&str>,
    rating: AgeRating,
    policy: ParseFailurePolicy,
) -> ContentVerdict {
    let raw = match raw.map(str::trim) {
        Some(text) if !text.is_empty() => text,
        _ => return ContentVerdict::missing(),
    };

    match serde_json::from_str::<StoredResult>(raw) {
        Ok(StoredResult::Response { results }) if !results.is_empty() => {
            ContentVerdict::evaluated(evaluate_outcomes(&results, rating))
        }
        Ok(StoredResult::Response { .. }) => {
            tracing::warn!(?policy, "stored moderation result has no results");
            ContentVerdict::malformed(policy)
        }
        Ok(StoredResult::Single(outcome)) => ContentVerdict::evaluated(
            thresholds::flagged_categories(&outcome.category_scores, rating),
        ),
        Err(e) => {
            tracing::warn!(error = %e, ?policy, "failed to parse stored moderation result");
            ContentVerdict::malformed(policy)
        }
    }
}

pub fn any_content_flagged(
    title: &ContentVerdict,
    description: &ContentVerdict,
    cover_image: &ContentVerdict,
    chapters: &[ChapterVerdict],
) -> bool {
    title.flagged
        || description.flagged
        || cover_image.flagged
        || chapters.iter().any(|c| c.verdict.flagged)
}

/// evaluate_record
///
/// Evaluates every piece of a stored record at `rating`.
pub fn evaluate_record(
    record: &ModerationRecord,
    rating: AgeRating,
    policy: ParseFailurePolicy,
) -> BookModerationReport {
    let title = parse_stored_result(record.title_result.as_deref(), rating, policy);
    let description = parse_stored_result(record.description_result.as_deref(), rating, policy);
    let cover_image = parse_stored_result(record.cover_image_result.as_deref(), rating, policy);
    let chapters: Vec<ChapterVerdict> = record
        .chapter_results
        .iter()
        .map(|chapter| ChapterVerdict {
            chapter_id: chapter.chapter_id,
            verdict: parse_stored_result(Some(&chapter.result), rating, policy),
        })
        .collect();

    let any_content_flagged = any_content_flagged(&title, &description, &cover_image, &chapters);

    BookModerationReport {
        book_id: record.book_id,
        author_id: record.author_id,
        age_rating: rating,
        title,
        description,
        cover_image,
        chapters,
        any_content_flagged,
    }
}
