use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use harus_library::{
    AppConfig, AppState, create_router,
    models::PresignedUrlResponse,
    moderation::MockModerationService,
    repository::InMemoryRepository,
    storage::{MockStorageService, S3StorageClient, StorageService, cover_object_key, sanitize_key},
};
use serde_json::json;
use tower::util::ServiceExt;
use uuid::Uuid;

#[cfg(test)]
mod mock_tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_success() {
        let mock = MockStorageService::new();
        let key = "covers/abc/cover.png";
        let url = mock.get_presigned_upload_url(key, "image/png").await.unwrap();

        assert!(url.contains("signature=fake"));
        assert!(url.contains(key));
    }

    #[tokio::test]
    async fn test_mock_failure() {
        let mock = MockStorageService::new_failing();
        let result = mock.get_presigned_upload_url("cover.png", "image/png").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_mock_sanitization() {
        let mock = MockStorageService::new();
        let url = mock
            .get_presigned_upload_url("../../etc/passwd", "image/png")
            .await
            .unwrap();
        assert!(!url.contains(".."));
    }
}

#[cfg(test)]
mod key_tests {
    use super::*;

    #[test]
    fn sanitize_drops_traversal_segments() {
        assert_eq!(sanitize_key("covers/./a/../b//c.png"), "covers/a/b/c.png");
    }

    #[test]
    fn cover_keys_are_scoped_to_the_user() {
        let user = Uuid::new_v4();
        let key = cover_object_key(user, "My Cover.PNG");
        assert!(key.starts_with(&format!("covers/{}/", user)));
        assert!(key.ends_with(".png"));
    }

    #[test]
    fn odd_extensions_fall_back_to_bin() {
        let user = Uuid::new_v4();
        assert!(cover_object_key(user, "noextension").ends_with(".bin"));
        assert!(cover_object_key(user, "cover.j$g").ends_with(".bin"));
    }
}

#[cfg(test)]
mod s3_tests {
    use super::*;

    #[tokio::test]
    async fn test_s3_presigned_url_format() {
        let client = S3StorageClient::new(
            "http://localhost:9000",
            "us-east-1",
            "testkey",
            "testsecret",
            "testbucket",
        )
        .await;

        let key = format!("covers/{}/cover.png", Uuid::new_v4());
        let url = client.get_presigned_upload_url(&key, "image/png").await.unwrap();

        // Presigning is local; no server is contacted.
        assert!(url.contains("localhost:9000"));
        assert!(url.contains("testbucket"));
        assert!(url.contains(&key));
    }
}

#[cfg(test)]
mod handler_tests {
    use super::*;

    fn router(storage: MockStorageService) -> axum::Router {
        create_router(AppState {
            repo: Arc::new(InMemoryRepository::new()),
            moderation: Arc::new(MockModerationService::new()),
            storage: Arc::new(storage),
            config: AppConfig::default(),
        })
    }

    fn upload_request(user: Option<Uuid>, file_type: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/uploads/cover")
            .header("content-type", "application/json");
        if let Some(id) = user {
            builder = builder.header("x-user-id", id.to_string());
        }
        builder
            .body(Body::from(
                json!({ "filename": "cover.webp", "file_type": file_type }).to_string(),
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn image_upload_url_is_issued() {
        let user = Uuid::new_v4();
        let response = router(MockStorageService::new())
            .oneshot(upload_request(Some(user), "image/webp"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: PresignedUrlResponse = serde_json::from_slice(&bytes).unwrap();
        assert!(body.resource_key.starts_with(&format!("covers/{}/", user)));
        assert!(body.resource_key.ends_with(".webp"));
        assert!(body.upload_url.contains(&body.resource_key));
    }

    #[tokio::test]
    async fn non_image_types_are_rejected() {
        let response = router(MockStorageService::new())
            .oneshot(upload_request(Some(Uuid::new_v4()), "application/pdf"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn anonymous_uploads_are_unauthorized() {
        let response = router(MockStorageService::new())
            .oneshot(upload_request(None, "image/png"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn storage_failure_is_internal() {
        let response = router(MockStorageService::new_failing())
            .oneshot(upload_request(Some(Uuid::new_v4()), "image/png"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
