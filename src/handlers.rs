use std::collections::{BTreeMap, HashSet};

use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::{
    AppState,
    config::Env,
    error::AppError,
    models::{
        AgeRating, Book, BookModerationReport, BookModerationRequest, BookPermissions,
        BookSubmission, ChapterResult, CreateSessionRequest, ModerationRecord, ModerationResponse,
        ModerationStats, PresignedUrlRequest, PresignedUrlResponse, SessionView,
        TextModerationRequest, VerdictStatus,
    },
    moderation::{self, ModerationRequest},
    permissions,
    session::{self, Session},
    storage::{self, ALLOWED_COVER_TYPES},
};

// --- Query Structs ---

/// ModerationQuery
///
/// Optional age-rating override when reading a stored moderation result.
#[derive(Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ModerationQuery {
    /// One of ALL, 13+, 16+, 18+ (the '+' may be omitted).
    pub age_rating: Option<String>,
}

/// AdminModerationFilter
///
/// Query parameters for the admin moderation listing.
#[derive(Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AdminModerationFilter {
    /// Keep only reports whose `any_content_flagged` equals this value.
    pub flagged: Option<bool>,
    /// Evaluate every record at this rating instead of its own.
    pub age_rating: Option<String>,
}

fn parse_rating(raw: Option<&str>) -> Result<Option<AgeRating>, AppError> {
    raw.filter(|r| !r.trim().is_empty())
        .map(|r| r.parse::<AgeRating>().map_err(AppError::BadRequest))
        .transpose()
}

fn require_admin(session: &Session) -> Result<(), AppError> {
    if permissions::can_moderate(session) {
        Ok(())
    } else {
        Err(AppError::Forbidden("Admin role required".to_string()))
    }
}

// --- Moderation Proxy ---

/// moderate_book
///
/// [Public Route] Forwards a book's text to the moderation API as
/// `input = [title, description, ...chapters]` and returns the API response
/// unchanged; `results` follow the input order.
#[utoipa::path(
    post,
    path = "/api/moderation/book",
    request_body = BookModerationRequest,
    responses(
        (status = 200, description = "Moderation API response", body = ModerationResponse),
        (status = 400, description = "Invalid body or nothing to moderate"),
        (status = 500, description = "Moderation API unavailable")
    )
)]
pub async fn moderate_book(
    State(state): State<AppState>,
    payload: Result<Json<BookModerationRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(payload) = payload?;

    let mut texts = vec![payload.title, payload.description];
    texts.extend(payload.chapters_content.into_vec());
    if texts.iter().all(|t| t.trim().is_empty()) {
        return Err(AppError::BadRequest("No content to moderate".to_string()));
    }

    let model = payload
        .model
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| state.config.moderation_model.clone());
    tracing::debug!(inputs = texts.len(), %model, "moderating book content");

    let response = state
        .moderation
        .moderate(&ModerationRequest::texts(&texts, model))
        .await?;
    Ok(Json(response))
}

/// moderate_text
///
/// [Public Route] Forwards `{input, model}` to the moderation API as-is.
#[utoipa::path(
    post,
    path = "/api/moderation/text",
    request_body = TextModerationRequest,
    responses(
        (status = 200, description = "Moderation API response", body = ModerationResponse),
        (status = 400, description = "Invalid body or empty input"),
        (status = 500, description = "Moderation API unavailable")
    )
)]
pub async fn moderate_text(
    State(state): State<AppState>,
    payload: Result<Json<TextModerationRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(payload) = payload?;

    let empty = match &payload.input {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    };
    if empty {
        return Err(AppError::BadRequest("Input is required".to_string()));
    }

    let request = ModerationRequest {
        input: payload.input,
        model: payload
            .model
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| state.config.moderation_model.clone()),
    };
    let response = state.moderation.moderate(&request).await?;
    Ok(Json(response))
}

// --- Session ---

/// get_session
///
/// [Public Route] The caller's session as `{user, token, isLoggedIn}`.
/// Anonymous or invalid credentials yield `isLoggedIn: false`.
#[utoipa::path(
    get,
    path = "/session",
    responses((status = 200, description = "Session", body = SessionView))
)]
pub async fn get_session(session: Option<Session>) -> Json<SessionView> {
    Json(
        session
            .map(|s| s.view())
            .unwrap_or_else(Session::anonymous_view),
    )
}

/// create_session
///
/// [Public Route] Validates a backend-issued token and mirrors it into the
/// `auth_token` and `user_role` cookies.
#[utoipa::path(
    post,
    path = "/session",
    request_body = CreateSessionRequest,
    responses(
        (status = 200, description = "Session stored", body = SessionView),
        (status = 401, description = "Invalid token or user mismatch")
    )
)]
pub async fn create_session(
    State(state): State<AppState>,
    payload: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(payload) = payload?;

    let claims = session::decode_token(&payload.token, &state.config.jwt_secret)?;
    if claims.sub != payload.user.id {
        return Err(AppError::Unauthorized(
            "Token does not belong to this user".to_string(),
        ));
    }

    // The token is authoritative for the role; profile fields come from the body.
    let mut resolved = Session::from_claims(claims, payload.token);
    resolved.user.username = payload.user.username.or(resolved.user.username);
    resolved.user.email = payload.user.email.or(resolved.user.email);

    let mut headers = HeaderMap::new();
    for cookie in session::session_cookies(&resolved, state.config.env == Env::Production) {
        headers.append(header::SET_COOKIE, cookie);
    }

    tracing::info!(user_id = %resolved.user_id(), "session created");
    Ok((headers, Json(resolved.view())))
}

/// delete_session
///
/// [Public Route] Logs out by expiring both session cookies.
#[utoipa::path(
    delete,
    path = "/session",
    responses((status = 204, description = "Session cleared"))
)]
pub async fn delete_session(State(state): State<AppState>) -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    for cookie in session::clear_session_cookies(state.config.env == Env::Production) {
        headers.append(header::SET_COOKIE, cookie);
    }
    (StatusCode::NO_CONTENT, headers)
}

/// book_permissions
///
/// [Public Route] Evaluates the permission rules for the caller against a book record.
#[utoipa::path(
    post,
    path = "/books/permissions",
    request_body = Book,
    responses((status = 200, description = "Permissions", body = BookPermissions))
)]
pub async fn book_permissions(
    session: Option<Session>,
    payload: Result<Json<Book>, JsonRejection>,
) -> Result<Json<BookPermissions>, AppError> {
    let Json(book) = payload?;
    let session = session.as_ref();

    Ok(Json(BookPermissions {
        can_view: permissions::can_view_book(session, &book),
        can_edit: session.is_some_and(|s| permissions::can_edit_book(s, &book)),
        can_moderate: session.is_some_and(permissions::can_moderate),
        can_view_moderation: session
            .is_some_and(|s| permissions::can_view_moderation(s, book.author.id)),
    }))
}

// --- Book Moderation Workflow ---

enum Piece {
    Title,
    Description,
    Chapter(usize),
}

/// Re-wraps one result as a standalone response, the shape stored per piece.
fn piece_json(response: &ModerationResponse, index: usize) -> Result<String, AppError> {
    let single = ModerationResponse {
        id: response.id.clone(),
        model: response.model.clone(),
        results: vec![response.results[index].clone()],
    };
    serde_json::to_string(&single).map_err(|e| AppError::Internal(e.to_string()))
}

/// submit_book_moderation
///
/// [Authenticated Route] Moderates every piece of a book (title, description,
/// cover image, chapters), stores the raw results and returns the evaluated
/// report. Only the book's author may submit.
#[utoipa::path(
    post,
    path = "/books/moderation",
    request_body = BookSubmission,
    responses(
        (status = 200, description = "Evaluated report", body = BookModerationReport),
        (status = 400, description = "Invalid submission"),
        (status = 403, description = "Not the author")
    )
)]
pub async fn submit_book_moderation(
    session: Session,
    State(state): State<AppState>,
    payload: Result<Json<BookSubmission>, JsonRejection>,
) -> Result<Json<BookModerationReport>, AppError> {
    let Json(submission) = payload?;

    if !permissions::can_submit_moderation(&session, submission.author_id) {
        return Err(AppError::Forbidden(
            "Only the author may submit this book for moderation".to_string(),
        ));
    }
    if submission.title.trim().is_empty() {
        return Err(AppError::BadRequest("Title is required".to_string()));
    }
    // A stored result keeps its author; nobody else may overwrite it.
    if let Some(existing) = state.repo.get_moderation(submission.book_id).await {
        if !permissions::can_submit_moderation(&session, existing.author_id) {
            return Err(AppError::Forbidden(
                "Only the author may submit this book for moderation".to_string(),
            ));
        }
    }
    let mut seen = HashSet::new();
    if !submission.chapters.iter().all(|c| seen.insert(c.chapter_id)) {
        return Err(AppError::BadRequest("Duplicate chapter id".to_string()));
    }

    let model = submission
        .model
        .clone()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| state.config.moderation_model.clone());

    // Empty pieces are not sent; they are stored as missing.
    let mut pieces = Vec::new();
    let mut texts = Vec::new();
    let candidates = [
        (Piece::Title, &submission.title),
        (Piece::Description, &submission.description),
    ]
    .into_iter()
    .chain(
        submission
            .chapters
            .iter()
            .enumerate()
            .map(|(i, c)| (Piece::Chapter(i), &c.content)),
    );
    for (piece, text) in candidates {
        if !text.trim().is_empty() {
            pieces.push(piece);
            texts.push(text.clone());
        }
    }

    let mut title_result = None;
    let mut description_result = None;
    let mut chapter_texts = vec![String::new(); submission.chapters.len()];

    let raw = state
        .moderation
        .moderate(&ModerationRequest::texts(&texts, model.clone()))
        .await?;
    let response = moderation::decode_response(&raw)?;
    if response.results.len() != texts.len() {
        return Err(AppError::Internal(format!(
            "moderation API returned {} results for {} inputs",
            response.results.len(),
            texts.len()
        )));
    }
    for (index, piece) in pieces.iter().enumerate() {
        let stored = piece_json(&response, index)?;
        match piece {
            Piece::Title => title_result = Some(stored),
            Piece::Description => description_result = Some(stored),
            Piece::Chapter(i) => chapter_texts[*i] = stored,
        }
    }

    let cover_image_result = match submission.cover_image_url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => {
            let raw = state
                .moderation
                .moderate(&ModerationRequest::image_url(url, model))
                .await?;
            Some(raw.to_string())
        }
        _ => None,
    };

    let now = Utc::now();
    let record = ModerationRecord {
        book_id: submission.book_id,
        author_id: submission.author_id,
        age_rating: submission.age_rating,
        title_result,
        description_result,
        cover_image_result,
        chapter_results: submission
            .chapters
            .iter()
            .zip(chapter_texts)
            .map(|(chapter, result)| ChapterResult {
                chapter_id: chapter.chapter_id,
                result,
            })
            .collect(),
        created_at: now,
        updated_at: now,
    };

    let saved = state
        .repo
        .save_moderation(record)
        .await
        .ok_or_else(|| AppError::Internal("Failed to store moderation result".to_string()))?;

    let report =
        moderation::evaluate_record(&saved, saved.age_rating, state.config.parse_failure_policy);
    tracing::info!(
        book_id = %report.book_id,
        age_rating = %report.age_rating,
        flagged = report.any_content_flagged,
        "book moderated"
    );
    Ok(Json(report))
}

/// get_book_moderation
///
/// [Authenticated Route] Evaluates the stored result of a book, at its own
/// rating or the `age_rating` override. Author or admin only; anyone else
/// gets the same 404 as for a book without a result.
#[utoipa::path(
    get,
    path = "/books/{id}/moderation",
    params(("id" = Uuid, Path, description = "Book ID"), ModerationQuery),
    responses(
        (status = 200, description = "Evaluated report", body = BookModerationReport),
        (status = 404, description = "No stored result visible to the caller")
    )
)]
pub async fn get_book_moderation(
    session: Session,
    State(state): State<AppState>,
    Path(book_id): Path<Uuid>,
    Query(query): Query<ModerationQuery>,
) -> Result<Json<BookModerationReport>, AppError> {
    let override_rating = parse_rating(query.age_rating.as_deref())?;

    // Callers who may not see the result cannot tell it exists either.
    let record = state
        .repo
        .get_moderation(book_id)
        .await
        .filter(|record| permissions::can_view_moderation(&session, record.author_id))
        .ok_or_else(|| AppError::NotFound("No moderation result for this book".to_string()))?;

    let rating = override_rating.unwrap_or(record.age_rating);
    Ok(Json(moderation::evaluate_record(
        &record,
        rating,
        state.config.parse_failure_policy,
    )))
}

/// get_cover_upload_url
///
/// [Authenticated Route] Presigned URL for uploading a cover image straight to storage.
#[utoipa::path(
    post,
    path = "/uploads/cover",
    request_body = PresignedUrlRequest,
    responses(
        (status = 200, description = "URL", body = PresignedUrlResponse),
        (status = 400, description = "Not an accepted image type")
    )
)]
pub async fn get_cover_upload_url(
    session: Session,
    State(state): State<AppState>,
    payload: Result<Json<PresignedUrlRequest>, JsonRejection>,
) -> Result<Json<PresignedUrlResponse>, AppError> {
    let Json(payload) = payload?;

    if !ALLOWED_COVER_TYPES.contains(&payload.file_type.as_str()) {
        return Err(AppError::BadRequest(format!(
            "Unsupported cover type '{}'",
            payload.file_type
        )));
    }

    let object_key = storage::cover_object_key(session.user_id(), &payload.filename);
    let upload_url = state
        .storage
        .get_presigned_upload_url(&object_key, &payload.file_type)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "presigned url generation failed");
            AppError::Internal("Failed to create upload URL".to_string())
        })?;

    Ok(Json(PresignedUrlResponse {
        upload_url,
        resource_key: object_key,
    }))
}

// --- Admin ---

/// list_moderations
///
/// [Admin Route] Every stored result, evaluated, newest first.
#[utoipa::path(
    get,
    path = "/admin/moderation",
    params(AdminModerationFilter),
    responses(
        (status = 200, description = "Reports", body = [BookModerationReport]),
        (status = 403, description = "Not an admin")
    )
)]
pub async fn list_moderations(
    session: Session,
    State(state): State<AppState>,
    Query(filter): Query<AdminModerationFilter>,
) -> Result<Json<Vec<BookModerationReport>>, AppError> {
    require_admin(&session)?;
    let override_rating = parse_rating(filter.age_rating.as_deref())?;

    let reports = state
        .repo
        .list_moderations()
        .await
        .iter()
        .map(|record| {
            moderation::evaluate_record(
                record,
                override_rating.unwrap_or(record.age_rating),
                state.config.parse_failure_policy,
            )
        })
        .filter(|report| {
            filter
                .flagged
                .is_none_or(|flagged| report.any_content_flagged == flagged)
        })
        .collect();

    Ok(Json(reports))
}

/// moderation_stats
///
/// [Admin Route] Dashboard counters over every stored result.
#[utoipa::path(
    get,
    path = "/admin/moderation/stats",
    responses(
        (status = 200, description = "Stats", body = ModerationStats),
        (status = 403, description = "Not an admin")
    )
)]
pub async fn moderation_stats(
    session: Session,
    State(state): State<AppState>,
) -> Result<Json<ModerationStats>, AppError> {
    require_admin(&session)?;

    let records = state.repo.list_moderations().await;
    let mut stats = ModerationStats {
        total_records: records.len() as i64,
        by_age_rating: AgeRating::ALL_TIERS
            .iter()
            .map(|rating| (rating.to_string(), 0))
            .collect::<BTreeMap<_, _>>(),
        ..ModerationStats::default()
    };

    for record in &records {
        let report =
            moderation::evaluate_record(record, record.age_rating, state.config.parse_failure_policy);
        if report.any_content_flagged {
            stats.flagged_records += 1;
        }
        stats.malformed_pieces += [&report.title, &report.description, &report.cover_image]
            .into_iter()
            .chain(report.chapters.iter().map(|c| &c.verdict))
            .filter(|v| v.status == VerdictStatus::Malformed)
            .count() as i64;
        *stats
            .by_age_rating
            .entry(record.age_rating.to_string())
            .or_default() += 1;
    }

    Ok(Json(stats))
}

/// delete_moderation
///
/// [Admin Route] Clears the stored result of a book.
#[utoipa::path(
    delete,
    path = "/admin/moderation/{book_id}",
    params(("book_id" = Uuid, Path, description = "Book ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not an admin"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_moderation(
    session: Session,
    State(state): State<AppState>,
    Path(book_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    require_admin(&session)?;

    if state.repo.delete_moderation(book_id).await {
        tracing::info!(%book_id, admin = %session.user_id(), "moderation result deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound("No moderation result for this book".to_string()))
    }
}
