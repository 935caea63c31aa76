use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
};
use harus_library::moderation::{
    ModerationError, ModerationRequest, ModerationService, OpenAiModerationClient,
};
use serde_json::{Value, json};
use tokio::net::TcpListener;

// --- Fake Upstream ---

#[derive(Clone)]
struct Upstream {
    hits: Arc<AtomicUsize>,
    // Status returned for the first `fail_first` calls, then 200.
    fail_status: StatusCode,
    fail_first: usize,
    last_body: Arc<std::sync::Mutex<Option<(Value, String)>>>,
}

async fn moderations(
    State(upstream): State<Upstream>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let call = upstream.hits.fetch_add(1, Ordering::SeqCst);
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    *upstream.last_body.lock().unwrap() = Some((body.clone(), auth));

    if call < upstream.fail_first {
        return (
            upstream.fail_status,
            Json(json!({ "error": { "message": "upstream says no", "type": "test" } })),
        );
    }

    let count = body["input"].as_array().map(|a| a.len()).unwrap_or(1);
    let results: Vec<Value> = (0..count)
        .map(|_| json!({ "flagged": false, "categories": {}, "category_scores": { "hate": 0.01 } }))
        .collect();
    (
        StatusCode::OK,
        Json(json!({ "id": "modr-fake", "model": body["model"], "results": results })),
    )
}

async fn spawn_upstream(fail_status: StatusCode, fail_first: usize) -> (String, Upstream) {
    let upstream = Upstream {
        hits: Arc::new(AtomicUsize::new(0)),
        fail_status,
        fail_first,
        last_body: Arc::new(std::sync::Mutex::new(None)),
    };
    let app = Router::new()
        .route("/v1/moderations", post(moderations))
        .with_state(upstream.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}/v1", addr), upstream)
}

fn client(base_url: &str, max_retries: u32) -> OpenAiModerationClient {
    OpenAiModerationClient::new(
        base_url,
        Some("sk-live-test".to_string()),
        max_retries,
        Duration::from_secs(5),
    )
    .unwrap()
}

// --- Tests ---

#[tokio::test]
async fn forwards_input_model_and_bearer_key() {
    let (base_url, upstream) = spawn_upstream(StatusCode::OK, 0).await;
    let request = ModerationRequest::texts(
        &["Title".to_string(), "".to_string(), "Chapter one".to_string()],
        "omni-moderation-latest",
    );

    let response = client(&base_url, 1).moderate(&request).await.unwrap();

    assert_eq!(response["id"], "modr-fake");
    assert_eq!(response["results"].as_array().unwrap().len(), 3);

    let (body, auth) = upstream.last_body.lock().unwrap().clone().unwrap();
    assert_eq!(body["input"], json!(["Title", "", "Chapter one"]));
    assert_eq!(body["model"], "omni-moderation-latest");
    assert_eq!(auth, "Bearer sk-live-test");
}

#[tokio::test]
async fn image_requests_use_multimodal_parts() {
    let (base_url, upstream) = spawn_upstream(StatusCode::OK, 0).await;
    let request = ModerationRequest::image_url("https://cdn.example/cover.png", "omni-moderation-latest");

    client(&base_url, 0).moderate(&request).await.unwrap();

    let (body, _) = upstream.last_body.lock().unwrap().clone().unwrap();
    assert_eq!(body["input"][0]["type"], "image_url");
    assert_eq!(body["input"][0]["image_url"]["url"], "https://cdn.example/cover.png");
}

#[tokio::test]
async fn server_errors_are_retried_exactly_max_retries_times() {
    let (base_url, upstream) = spawn_upstream(StatusCode::SERVICE_UNAVAILABLE, usize::MAX).await;

    let err = client(&base_url, 2)
        .moderate(&ModerationRequest::texts(&["x".to_string()], "m"))
        .await
        .unwrap_err();

    assert!(matches!(err, ModerationError::Upstream { status: 503, .. }));
    assert_eq!(upstream.hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn rate_limit_recovers_on_retry() {
    let (base_url, upstream) = spawn_upstream(StatusCode::TOO_MANY_REQUESTS, 1).await;

    let response = client(&base_url, 1)
        .moderate(&ModerationRequest::texts(&["x".to_string()], "m"))
        .await
        .unwrap();

    assert_eq!(response["results"].as_array().unwrap().len(), 1);
    assert_eq!(upstream.hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let (base_url, upstream) = spawn_upstream(StatusCode::UNAUTHORIZED, usize::MAX).await;

    let err = client(&base_url, 3)
        .moderate(&ModerationRequest::texts(&["x".to_string()], "m"))
        .await
        .unwrap_err();

    match err {
        ModerationError::Upstream { status, message } => {
            assert_eq!(status, 401);
            assert_eq!(message, "upstream says no");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(upstream.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_api_key_fails_without_a_request() {
    let (base_url, upstream) = spawn_upstream(StatusCode::OK, 0).await;
    let client = OpenAiModerationClient::new(&base_url, None, 1, Duration::from_secs(5)).unwrap();

    let err = client
        .moderate(&ModerationRequest::texts(&["x".to_string()], "m"))
        .await
        .unwrap_err();

    assert!(matches!(err, ModerationError::MissingApiKey));
    assert_eq!(upstream.hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unreachable_upstream_is_a_transport_error() {
    // Bind then drop to get a port with nothing listening.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client(&format!("http://{}/v1", addr), 0)
        .moderate(&ModerationRequest::texts(&["x".to_string()], "m"))
        .await
        .unwrap_err();

    assert!(matches!(err, ModerationError::Transport(_)));
}
