//! Content moderation: the client for the third-party moderation API and the
//! age-rating threshold logic that turns its scores into flag decisions.

pub mod client;
pub mod thresholds;
pub mod verdict;

pub use client::{
    MockModerationService, ModerationError, ModerationRequest, ModerationService, ModerationState,
    OpenAiModerationClient, decode_response,
};
pub use thresholds::{flagged_categories, is_flagged, threshold};
pub use verdict::{
    ParseFailurePolicy, any_content_flagged, evaluate_outcomes, evaluate_record,
    parse_stored_result,
};
