use std::env;

use crate::moderation::ParseFailurePolicy;

pub const DEFAULT_MODERATION_MODEL: &str = "omni-moderation-latest";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const LOCAL_JWT_SECRET: &str = "super-secure-test-secret-value-local";

/// AppConfig
///
/// Holds the service's entire configuration state. It is loaded once at startup,
/// never mutated afterwards, and pulled into handlers and extractors via `FromRef`.
#[derive(Clone, Debug)]
pub struct AppConfig {
    // Runtime environment marker. Controls the local auth bypass and cookie hardening.
    pub env: Env,
    // Address the HTTP listener binds to.
    pub bind_addr: String,
    // Postgres connection string. Local runs without one use the in-memory repository.
    pub db_url: Option<String>,
    // Secret used to validate the session JWTs issued by the backend.
    pub jwt_secret: String,
    // Moderation API credentials and tuning.
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub moderation_model: String,
    pub moderation_max_retries: u32,
    pub moderation_timeout_secs: u64,
    // What a stored moderation result that fails to parse counts as.
    pub parse_failure_policy: ParseFailurePolicy,
    // S3-compatible storage for cover image uploads.
    pub s3_endpoint: String,
    pub s3_region: String,
    pub s3_key: String,
    pub s3_secret: String,
    pub s3_bucket: String,
}

/// Env
///
/// Runtime context selected by `APP_ENV`.
///
/// - `Local`: every secret has a development default, the `x-user-id` header
///   bypass is honoured, cookies are sent without `Secure`, and a missing
///   `DATABASE_URL` falls back to the in-memory repository.
/// - `Production`: every secret must be set explicitly, the bypass is off,
///   and session cookies carry `Secure`.
#[derive(Clone, PartialEq, Debug)]
pub enum Env {
    Local,
    Production,
}

impl Default for AppConfig {
    /// Safe, non-panicking values for test state scaffolding.
    fn default() -> Self {
        Self {
            env: Env::Local,
            bind_addr: "127.0.0.1:3000".to_string(),
            db_url: None,
            jwt_secret: LOCAL_JWT_SECRET.to_string(),
            openai_api_key: Some("sk-test".to_string()),
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            moderation_model: DEFAULT_MODERATION_MODEL.to_string(),
            moderation_max_retries: 1,
            moderation_timeout_secs: 30,
            parse_failure_policy: ParseFailurePolicy::FailOpen,
            s3_endpoint: "http://localhost:9000".to_string(),
            s3_region: "us-east-1".to_string(),
            s3_key: "admin".to_string(),
            s3_secret: "password".to_string(),
            s3_bucket: "haru-test".to_string(),
        }
    }
}

impl AppConfig {
    /// load
    ///
    /// Reads every parameter from environment variables and fails fast.
    ///
    /// # Panics
    /// Panics in `Env::Production` when a required secret is missing, and in any
    /// environment when a numeric or policy variable cannot be parsed.
    pub fn load() -> Self {
        let env = match env::var("APP_ENV").as_deref() {
            Ok("production") => Env::Production,
            _ => Env::Local,
        };

        let jwt_secret = env::var("JWT_SECRET")
            .or_else(|_| env::var("SUPABASE_JWT_SECRET"))
            .ok();
        let jwt_secret = match env {
            Env::Production => {
                jwt_secret.expect("FATAL: JWT_SECRET or SUPABASE_JWT_SECRET must be set in production.")
            }
            Env::Local => jwt_secret.unwrap_or_else(|| LOCAL_JWT_SECRET.to_string()),
        };

        let db_url = env::var("DATABASE_URL").ok();
        let openai_api_key = env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());
        if env == Env::Production {
            assert!(db_url.is_some(), "FATAL: DATABASE_URL required in prod");
            assert!(openai_api_key.is_some(), "FATAL: OPENAI_API_KEY required in prod");
        }

        let parse_failure_policy = match env::var("MODERATION_PARSE_POLICY") {
            Ok(raw) => raw
                .parse()
                .unwrap_or_else(|e| panic!("FATAL: MODERATION_PARSE_POLICY: {}", e)),
            Err(_) => ParseFailurePolicy::FailOpen,
        };

        let (s3_endpoint, s3_region, s3_key, s3_secret) = match env {
            Env::Local => (
                env::var("S3_ENDPOINT").unwrap_or_else(|_| "http://localhost:9000".to_string()),
                "us-east-1".to_string(),
                env::var("S3_ACCESS_KEY").unwrap_or_else(|_| "admin".to_string()),
                env::var("S3_SECRET_KEY").unwrap_or_else(|_| "password".to_string()),
            ),
            Env::Production => {
                let project_url =
                    env::var("SUPABASE_URL").expect("FATAL: SUPABASE_URL required in prod");
                (
                    format!("{}/storage/v1/s3", project_url),
                    "stub".to_string(),
                    env::var("S3_ACCESS_KEY").expect("FATAL: S3_ACCESS_KEY required in prod"),
                    env::var("S3_SECRET_KEY").expect("FATAL: S3_SECRET_KEY required in prod"),
                )
            }
        };

        Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            db_url,
            jwt_secret,
            openai_api_key,
            openai_base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_OPENAI_BASE_URL.to_string()),
            moderation_model: env::var("MODERATION_MODEL")
                .unwrap_or_else(|_| DEFAULT_MODERATION_MODEL.to_string()),
            moderation_max_retries: parse_var("MODERATION_MAX_RETRIES", 1),
            moderation_timeout_secs: parse_var("MODERATION_TIMEOUT_SECS", 30),
            parse_failure_policy,
            s3_endpoint,
            s3_region,
            s3_key,
            s3_secret,
            s3_bucket: env::var("S3_BUCKET_NAME").unwrap_or_else(|_| "haru-uploads".to_string()),
            env,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, fallback: T) -> T {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("FATAL: {} must be a number, got '{}'", name, raw)),
        Err(_) => fallback,
    }
}
