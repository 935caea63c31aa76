use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{delete, get},
};

/// Admin Router Module
///
/// Moderation oversight. Handlers reject with 403 unless the session carries
/// the `admin` role.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // GET /admin/moderation?flagged=&age_rating=
        .route("/moderation", get(handlers::list_moderations))
        // GET /admin/moderation/stats
        .route("/moderation/stats", get(handlers::moderation_stats))
        // DELETE /admin/moderation/{book_id}
        .route("/moderation/{book_id}", delete(handlers::delete_moderation))
}
