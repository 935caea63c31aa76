use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints reachable without a session. Handlers that care about the caller
/// take `Option<Session>` and degrade to the anonymous view.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        .route("/health", get(|| async { "ok" }))
        // POST /api/moderation/book
        // Forwards [title, description, ...chapters] to the moderation API.
        .route("/api/moderation/book", post(handlers::moderate_book))
        // POST /api/moderation/text
        // Pass-through for arbitrary text or multimodal input.
        .route("/api/moderation/text", post(handlers::moderate_text))
        // GET/POST/DELETE /session
        // Read, store (cookie mirror) and clear the caller's session.
        .route(
            "/session",
            get(handlers::get_session)
                .post(handlers::create_session)
                .delete(handlers::delete_session),
        )
        // POST /books/permissions
        // Permission flags of the caller for a book record.
        .route("/books/permissions", post(handlers::book_permissions))
}
