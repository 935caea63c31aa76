use harus_library::{
    AppState,
    config::{AppConfig, Env},
    create_router,
    moderation::{ModerationState, OpenAiModerationClient},
    repository::{InMemoryRepository, PostgresRepository, RepositoryState},
    storage::{S3StorageClient, StorageService, StorageState},
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// Loads configuration, sets up logging, connects the repository, the
/// moderation client and storage, then serves the router.
#[tokio::main]
async fn main() {
    // 1. Configuration (fail-fast on missing production secrets)
    dotenv::dotenv().ok();
    let config = AppConfig::load();

    // 2. Logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "harus_library=debug,tower_http=info".into());

    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    // 3. Repository
    let repo = match &config.db_url {
        Some(db_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(db_url)
                .await
                .expect("FATAL: Failed to connect to Postgres. Check DATABASE_URL.");
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .expect("FATAL: Failed to run database migrations.");
            Arc::new(PostgresRepository::new(pool)) as RepositoryState
        }
        None => {
            tracing::warn!("DATABASE_URL not set, moderation results are kept in memory");
            Arc::new(InMemoryRepository::new()) as RepositoryState
        }
    };

    // 4. Moderation API client
    if config.openai_api_key.is_none() {
        tracing::warn!("OPENAI_API_KEY not set, moderation requests will fail with 500");
    }
    let moderation = Arc::new(
        OpenAiModerationClient::new(
            &config.openai_base_url,
            config.openai_api_key.clone(),
            config.moderation_max_retries,
            Duration::from_secs(config.moderation_timeout_secs),
        )
        .expect("FATAL: Failed to build the moderation HTTP client."),
    ) as ModerationState;

    // 5. Storage (S3/MinIO)
    let s3_client = S3StorageClient::new(
        &config.s3_endpoint,
        &config.s3_region,
        &config.s3_key,
        &config.s3_secret,
        &config.s3_bucket,
    )
    .await;

    // Local MinIO starts without the bucket.
    if config.env == Env::Local {
        s3_client.ensure_bucket_exists().await;
    }
    let storage = Arc::new(s3_client) as StorageState;

    // 6. State and server
    let bind_addr = config.bind_addr.clone();
    let app = create_router(AppState {
        repo,
        moderation,
        storage,
        config,
    });

    let listener = TcpListener::bind(&bind_addr)
        .await
        .expect("FATAL: Failed to bind the HTTP listener. Check BIND_ADDR.");

    tracing::info!("Listening on {}", bind_addr);
    tracing::info!("API Documentation (Swagger UI) available at: http://{}/swagger-ui", bind_addr);

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("server error: {}", e);
    }
}
