use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::presigning::PresigningConfig;
use std::sync::Arc;
use std::time::Duration;

/// MIME types accepted for book covers.
pub const ALLOWED_COVER_TYPES: &[&str] = &["image/jpeg", "image/png", "image/webp", "image/gif"];

const UPLOAD_URL_TTL: Duration = Duration::from_secs(600);

/// StorageService
///
/// Contract for the object store holding book cover images. Handlers only
/// depend on this trait through `StorageState`, so the S3 client and the
/// in-memory mock are interchangeable in `AppState`.
///
/// Upload flow:
/// 1. The author asks `POST /uploads/cover` for a URL, naming the file and its MIME type.
/// 2. The handler checks the type against `ALLOWED_COVER_TYPES` and builds a
///    key scoped to the user with `cover_object_key`.
/// 3. `get_presigned_upload_url` signs a short-lived PUT for that key.
/// 4. The browser uploads straight to the bucket and later sends the public
///    URL back as `cover_image_url` for moderation.
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Creates the configured bucket when missing. Local setup only.
    async fn ensure_bucket_exists(&self);

    /// Presigned PUT URL for `key`, constrained to `content_type`.
    async fn get_presigned_upload_url(
        &self,
        key: &str,
        content_type: &str,
    ) -> Result<String, String>;
}

/// S3StorageClient
///
/// aws-sdk-s3 implementation of `StorageService`.
///
/// Static credentials and path-style addressing keep the same client working
/// against MinIO in local Docker setups and against Supabase Storage's
/// S3-compatible endpoint in production. Presigning happens locally, so
/// `get_presigned_upload_url` never contacts the server.
#[derive(Clone)]
pub struct S3StorageClient {
    client: s3::Client,
    bucket_name: String,
}

impl S3StorageClient {
    pub async fn new(
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        bucket: &str,
    ) -> Self {
        let credentials =
            s3::config::Credentials::new(access_key, secret_key, None, None, "static");

        let config = s3::Config::builder()
            .credentials_provider(credentials)
            .endpoint_url(endpoint)
            .region(s3::config::Region::new(region.to_string()))
            .behavior_version_latest()
            .force_path_style(true)
            .build();

        Self {
            client: s3::Client::from_conf(config),
            bucket_name: bucket.to_string(),
        }
    }
}

#[async_trait]
impl StorageService for S3StorageClient {
    async fn ensure_bucket_exists(&self) {
        if let Err(e) = self
            .client
            .create_bucket()
            .bucket(&self.bucket_name)
            .send()
            .await
        {
            // Already-exists errors land here too.
            tracing::debug!(bucket = %self.bucket_name, "create_bucket: {}", e);
        }
    }

    async fn get_presigned_upload_url(
        &self,
        key: &str,
        content_type: &str,
    ) -> Result<String, String> {
        let presigning = PresigningConfig::expires_in(UPLOAD_URL_TTL).map_err(|e| e.to_string())?;

        let presigned_req = self
            .client
            .put_object()
            .bucket(&self.bucket_name)
            .key(sanitize_key(key))
            .content_type(content_type)
            .presigned(presigning)
            .await
            .map_err(|e| e.to_string())?;

        Ok(presigned_req.uri().to_string())
    }
}

/// sanitize_key
///
/// Drops empty, `.` and `..` segments so no key escapes its prefix.
pub fn sanitize_key(key: &str) -> String {
    key.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".." && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Object key for a new cover: `covers/{user_id}/{uuid}.{ext}`.
pub fn cover_object_key(user_id: uuid::Uuid, filename: &str) -> String {
    let extension = std::path::Path::new(filename)
        .extension()
        .and_then(std::ffi::OsStr::to_str)
        .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or("bin")
        .to_ascii_lowercase();
    sanitize_key(&format!(
        "covers/{}/{}.{}",
        user_id,
        uuid::Uuid::new_v4(),
        extension
    ))
}

/// MockStorageService
///
/// Returns deterministic URLs without touching the network.
#[derive(Clone, Default)]
pub struct MockStorageService {
    /// When true, all operations return a simulated failure.
    pub should_fail: bool,
}

impl MockStorageService {
    pub fn new() -> Self {
        Self { should_fail: false }
    }

    pub fn new_failing() -> Self {
        Self { should_fail: true }
    }
}

#[async_trait]
impl StorageService for MockStorageService {
    async fn ensure_bucket_exists(&self) {}

    async fn get_presigned_upload_url(
        &self,
        key: &str,
        _content_type: &str,
    ) -> Result<String, String> {
        if self.should_fail {
            return Err("Mock Storage Error: Simulation requested".to_string());
        }

        Ok(format!(
            "http://localhost:9000/mock-bucket/{}?signature=fake",
            sanitize_key(key)
        ))
    }
}

pub type StorageState = Arc<dyn StorageService>;
