use axum::{
    Router,
    extract::{FromRef, Request},
    http::HeaderName,
    middleware::{self, Next},
    response::Response,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod moderation;
pub mod permissions;
pub mod repository;
pub mod session;
pub mod storage;

pub mod routes;
use routes::{admin, authenticated, public};
use session::Session;

// --- Public Re-exports ---

pub use config::AppConfig;
pub use moderation::{MockModerationService, ModerationState, OpenAiModerationClient};
pub use repository::{InMemoryRepository, PostgresRepository, RepositoryState};
pub use storage::{MockStorageService, S3StorageClient, StorageState};

/// ApiDoc
///
/// OpenAPI document for every annotated handler, served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::moderate_book, handlers::moderate_text,
        handlers::get_session, handlers::create_session, handlers::delete_session,
        handlers::book_permissions, handlers::submit_book_moderation,
        handlers::get_book_moderation, handlers::get_cover_upload_url,
        handlers::list_moderations, handlers::moderation_stats, handlers::delete_moderation
    ),
    components(
        schemas(
            models::AgeRating, models::Role, models::BookStatus, models::Book, models::AuthorRef,
            models::Category, models::Chapter, models::SessionUser, models::SessionView,
            models::CreateSessionRequest, models::BookPermissions, models::ModerationOutcome,
            models::ModerationResponse, models::ChaptersContent, models::BookModerationRequest,
            models::TextModerationRequest, models::ChapterSubmission, models::BookSubmission,
            models::VerdictStatus, models::ContentVerdict, models::ChapterVerdict,
            models::BookModerationReport, models::ModerationStats,
            models::PresignedUrlRequest, models::PresignedUrlResponse,
        )
    ),
    tags(
        (name = "harus-library", description = "Haru's Library moderation and session API")
    )
)]
struct ApiDoc;

/// AppState
///
/// The single cloneable container for every service and the configuration.
/// Each service sits behind an `Arc<dyn Trait>`, so tests swap in the mocks
/// and the in-memory repository without touching the handlers.
///
/// Handlers take the whole state with `State<AppState>`; extractors such as
/// `Session` pull only what they need through the `FromRef` impls below.
#[derive(Clone)]
pub struct AppState {
    /// Stored moderation results (Postgres or in-memory).
    pub repo: RepositoryState,
    /// Moderation API client (OpenAI or the mock).
    pub moderation: ModerationState,
    /// Cover uploads (S3/MinIO or the mock).
    pub storage: StorageState,
    pub config: AppConfig,
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for ModerationState {
    fn from_ref(app_state: &AppState) -> ModerationState {
        app_state.moderation.clone()
    }
}

impl FromRef<AppState> for StorageState {
    fn from_ref(app_state: &AppState) -> StorageState {
        app_state.storage.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// session_middleware
///
/// Guards `authenticated_routes`: the `Session` extractor rejects with 401
/// before the handler runs when no valid credentials are present.
async fn session_middleware(_session: Session, request: Request, next: Next) -> Response {
    next.run(request).await
}

/// create_router
///
/// Assembles the routing tree, the observability layers and the shared state.
///
/// Layer order, outermost first:
/// 1. CORS (permissive; the Next.js frontend is served from another origin).
/// 2. `SetRequestIdLayer`: a UUID `x-request-id` for every request.
/// 3. `TraceLayer`: one `http_request` span per request carrying that id.
/// 4. `PropagateRequestIdLayer`: echoes the id on the response.
///
/// Authenticated routes additionally run `session_middleware` as a route
/// layer, so unknown paths still 404 instead of 401.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes())
        .merge(
            authenticated::authenticated_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                session_middleware,
            )),
        )
        // Role checks happen inside the admin handlers.
        .nest("/admin", admin::admin_routes())
        .with_state(state);

    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Span for `TraceLayer` carrying method, URI and the `x-request-id`.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
