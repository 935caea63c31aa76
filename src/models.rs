use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

// --- Shared Enumerations ---

/// AgeRating
///
/// Ordinal audience tier of a book. Variant order is the strictness order:
/// `All` is the strictest, `Adult18` the most permissive.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS, ToSchema, Default,
)]
#[ts(export)]
pub enum AgeRating {
    #[default]
    #[serde(rename = "ALL")]
    All,
    #[serde(rename = "13+")]
    Teen13,
    #[serde(rename = "16+")]
    Teen16,
    #[serde(rename = "18+")]
    Adult18,
}

impl AgeRating {
    pub const ALL_TIERS: [AgeRating; 4] = [
        AgeRating::All,
        AgeRating::Teen13,
        AgeRating::Teen16,
        AgeRating::Adult18,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgeRating::All => "ALL",
            AgeRating::Teen13 => "13+",
            AgeRating::Teen16 => "16+",
            AgeRating::Adult18 => "18+",
        }
    }
}

impl fmt::Display for AgeRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgeRating {
    type Err = String;

    // The trailing '+' is optional: query strings decode an unescaped '+' to a space.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_end_matches('+').to_ascii_uppercase().as_str() {
            "ALL" => Ok(AgeRating::All),
            "13" => Ok(AgeRating::Teen13),
            "16" => Ok(AgeRating::Teen16),
            "18" => Ok(AgeRating::Adult18),
            other => Err(format!(
                "unknown age rating '{}'; expected ALL, 13+, 16+ or 18+",
                other
            )),
        }
    }
}

/// Role
///
/// RBAC field carried in the session token and mirrored into the `user_role` cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum BookStatus {
    #[default]
    Draft,
    Pending,
    Published,
    Rejected,
}

// --- Backend Mirrors ---

/// AuthorRef
///
/// The `book.author` reference as returned by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct AuthorRef {
    pub id: Uuid,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
}

/// Book
///
/// Flat mirror of the backend book record. Only the fields the permission
/// checks and moderation flow read are modelled here.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Book {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub cover_image: Option<String>,
    pub author: AuthorRef,
    pub status: BookStatus,
    pub age_rating: AgeRating,
    #[serde(default)]
    pub categories: Vec<Category>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Chapter {
    pub id: Uuid,
    pub book_id: Uuid,
    pub title: String,
    pub content: String,
    pub position: i32,
    pub published: bool,
}

/// SessionUser
///
/// The user half of the `{user, token, isLoggedIn}` session blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct SessionUser {
    pub id: Uuid,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// SessionView
///
/// Output of `GET /session`, shaped like the blob the frontend keeps in storage.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SessionView {
    pub user: Option<SessionUser>,
    pub token: Option<String>,
    pub is_logged_in: bool,
}

/// Input payload for `POST /session`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CreateSessionRequest {
    pub user: SessionUser,
    pub token: String,
}

/// BookPermissions
///
/// Output of `POST /books/permissions`: what the caller may do with a book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct BookPermissions {
    pub can_view: bool,
    pub can_edit: bool,
    pub can_moderate: bool,
    pub can_view_moderation: bool,
}

// --- Moderation API Schemas ---

pub type CategoryScores = BTreeMap<String, f64>;

/// ModerationOutcome
///
/// One entry of the moderation API's `results` array.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct ModerationOutcome {
    #[serde(default)]
    pub flagged: bool,
    #[serde(default)]
    pub categories: BTreeMap<String, bool>,
    pub category_scores: CategoryScores,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct ModerationResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    pub results: Vec<ModerationOutcome>,
}

/// ChaptersContent
///
/// The frontend sends either one concatenated string or one string per chapter.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(untagged)]
#[ts(export)]
pub enum ChaptersContent {
    Single(String),
    Many(Vec<String>),
}

impl ChaptersContent {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            ChaptersContent::Single(text) => vec![text],
            ChaptersContent::Many(texts) => texts,
        }
    }
}

impl Default for ChaptersContent {
    fn default() -> Self {
        ChaptersContent::Many(Vec::new())
    }
}

/// Input payload for `POST /api/moderation/book`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct BookModerationRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub chapters_content: ChaptersContent,
    #[serde(default)]
    pub model: Option<String>,
}

/// Input payload for `POST /api/moderation/text`. `input` is forwarded untouched,
/// so anything the moderation API accepts (string, list, multimodal parts) works.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct TextModerationRequest {
    #[schema(value_type = Object)]
    pub input: serde_json::Value,
    #[serde(default)]
    pub model: Option<String>,
}

// --- Book Moderation Workflow ---

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct ChapterSubmission {
    pub chapter_id: Uuid,
    #[serde(default)]
    pub title: String,
    pub content: String,
}

/// BookSubmission
///
/// Input payload for `POST /books/moderation`: everything of a book that gets moderated.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct BookSubmission {
    pub book_id: Uuid,
    pub author_id: Uuid,
    pub age_rating: AgeRating,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub cover_image_url: Option<String>,
    #[serde(default)]
    pub chapters: Vec<ChapterSubmission>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct ChapterResult {
    pub chapter_id: Uuid,
    /// Raw moderation API response JSON for this chapter.
    pub result: String,
}

/// ModerationRecord
///
/// Persisted moderation state of a book. Every `*_result` holds the raw JSON
/// text of a moderation response; it is parsed at evaluation time, so a record
/// written by another client may carry missing or malformed blobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct ModerationRecord {
    pub book_id: Uuid,
    pub author_id: Uuid,
    pub age_rating: AgeRating,
    pub title_result: Option<String>,
    pub description_result: Option<String>,
    pub cover_image_result: Option<String>,
    pub chapter_results: Vec<ChapterResult>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum VerdictStatus {
    #[default]
    Evaluated,
    Missing,
    Malformed,
}

/// ContentVerdict
///
/// Evaluation of one moderated piece. `passed` is always `!flagged`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct ContentVerdict {
    pub status: VerdictStatus,
    pub flagged: bool,
    pub passed: bool,
    pub flagged_categories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct ChapterVerdict {
    pub chapter_id: Uuid,
    pub verdict: ContentVerdict,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct BookModerationReport {
    pub book_id: Uuid,
    pub author_id: Uuid,
    pub age_rating: AgeRating,
    pub title: ContentVerdict,
    pub description: ContentVerdict,
    pub cover_image: ContentVerdict,
    pub chapters: Vec<ChapterVerdict>,
    pub any_content_flagged: bool,
}

/// ModerationStats
///
/// Output schema for the admin moderation dashboard (GET /admin/moderation/stats).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct ModerationStats {
    pub total_records: i64,
    pub flagged_records: i64,
    pub malformed_pieces: i64,
    pub by_age_rating: BTreeMap<String, i64>,
}

// --- Uploads ---

/// PresignedUrlRequest
///
/// Input payload for requesting a short-lived cover upload URL (POST /uploads/cover).
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema, TS, Default)]
#[ts(export)]
pub struct PresignedUrlRequest {
    /// The original filename, used to derive the file extension.
    #[schema(example = "cover.png")]
    pub filename: String,
    /// The MIME type; only images are accepted.
    #[schema(example = "image/png")]
    pub file_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, TS, Default)]
#[ts(export)]
pub struct PresignedUrlResponse {
    /// The time-limited URL for the PUT request.
    pub upload_url: String,
    /// The object key the cover will be stored under.
    pub resource_key: String,
}
