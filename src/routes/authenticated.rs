use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Authenticated Router Module
///
/// Every route here sits behind the session middleware in `create_router`,
/// so anonymous callers get 401 before a handler runs. Ownership checks
/// (author vs admin) happen inside the handlers.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // POST /books/moderation
        // Moderates every piece of a book and stores the raw results. Author only.
        .route("/books/moderation", post(handlers::submit_book_moderation))
        // GET /books/{id}/moderation?age_rating=
        // Stored result evaluated against the book's rating or an override.
        .route("/books/{id}/moderation", get(handlers::get_book_moderation))
        // POST /uploads/cover
        // Presigned PUT URL (10 minutes) for a cover image.
        .route("/uploads/cover", post(handlers::get_cover_upload_url))
}
