use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::models::{CategoryScores, ModerationOutcome, ModerationResponse};

use super::thresholds::THRESHOLD_TABLE;

/// ModerationRequest
///
/// Body sent to the moderation API. `input` is whatever the API accepts:
/// a string, a list of strings, or a list of multimodal parts.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ModerationRequest {
    pub input: Value,
    pub model: String,
}

impl ModerationRequest {
    pub fn texts(texts: &[String], model: impl Into<String>) -> Self {
        Self {
            input: json!(texts),
            model: model.into(),
        }
    }

    pub fn image_url(url: &str, model: impl Into<String>) -> Self {
        Self {
            input: json!([{ "type": "image_url", "image_url": { "url": url } }]),
            model: model.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ModerationError {
    #[error("moderation API key is not configured")]
    MissingApiKey,
    #[error("moderation API returned {status}: {message}")]
    Upstream { status: u16, message: String },
    #[error("moderation API request failed: {0}")]
    Transport(String),
    #[error("moderation API returned an unreadable response: {0}")]
    InvalidResponse(String),
}

impl ModerationError {
    fn is_retryable(&self) -> bool {
        match self {
            ModerationError::Transport(_) => true,
            ModerationError::Upstream { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// ModerationService
///
/// Contract for the third-party moderation API, so handlers can run against
/// the real client or the in-process mock.
#[async_trait]
pub trait ModerationService: Send + Sync {
    /// Forwards `request` and returns the API's JSON body unchanged.
    async fn moderate(&self, request: &ModerationRequest) -> Result<Value, ModerationError>;
}

pub type ModerationState = Arc<dyn ModerationService>;

/// Decodes the typed view of a raw response.
pub fn decode_response(raw: &Value) -> Result<ModerationResponse, ModerationError> {
    serde_json::from_value(raw.clone()).map_err(|e| ModerationError::InvalidResponse(e.to_string()))
}

// --- Real Implementation ---

/// OpenAiModerationClient
///
/// reqwest client for `POST {base_url}/moderations`. Transport failures, 429
/// and 5xx responses are retried `max_retries` times; everything else is
/// returned on the first attempt.
#[derive(Clone)]
pub struct OpenAiModerationClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    max_retries: u32,
}

impl OpenAiModerationClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        max_retries: u32,
        timeout: Duration,
    ) -> Result<Self, ModerationError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ModerationError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            max_retries,
        })
    }

    async fn send_once(&self, api_key: &str, request: &ModerationRequest) -> Result<Value, ModerationError> {
        let response = self
            .http
            .post(format!("{}/moderations", self.base_url))
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| ModerationError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModerationError::Upstream {
                status: status.as_u16(),
                message: upstream_message(&body),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ModerationError::InvalidResponse(e.to_string()))
    }
}

/// Pulls `error.message` out of an API error body, falling back to the raw text.
fn upstream_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

#[async_trait]
impl ModerationService for OpenAiModerationClient {
    async fn moderate(&self, request: &ModerationRequest) -> Result<Value, ModerationError> {
        let api_key = self.api_key.as_deref().ok_or(ModerationError::MissingApiKey)?;

        let mut attempt = 0;
        loop {
            match self.send_once(api_key, request).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(error = %e, attempt, "retrying moderation request");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// --- Mock Implementation (For Tests) ---

/// MockModerationService
///
/// Deterministic stand-in: every input item scores `base_score` in every known
/// category, except that text items containing a registered trigger get the
/// trigger's score for its category. Requests are recorded for assertions.
#[derive(Clone, Default)]
pub struct MockModerationService {
    pub base_score: f64,
    pub triggers: Vec<(String, String, f64)>,
    pub failure: Option<(u16, String)>,
    pub requests: Arc<Mutex<Vec<ModerationRequest>>>,
}

impl MockModerationService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing(status: u16, message: &str) -> Self {
        Self {
            failure: Some((status, message.to_string())),
            ..Self::default()
        }
    }

    pub fn with_trigger(mut self, needle: &str, category: &str, score: f64) -> Self {
        self.triggers
            .push((needle.to_string(), category.to_string(), score));
        self
    }

    pub fn recorded(&self) -> Vec<ModerationRequest> {
        self.requests
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    fn outcome_for(&self, item: &Value) -> ModerationOutcome {
        let text = item
            .as_str()
            .or_else(|| item["text"].as_str())
            .or_else(|| item["image_url"]["url"].as_str())
            .unwrap_or_default();

        let mut category_scores: CategoryScores = THRESHOLD_TABLE
            .iter()
            .map(|(category, _)| (category.to_string(), self.base_score))
            .collect();
        for (needle, category, score) in &self.triggers {
            if text.contains(needle.as_str()) {
                category_scores.insert(category.clone(), *score);
            }
        }

        ModerationOutcome {
            flagged: false,
            categories: category_scores
                .iter()
                .map(|(category, score)| (category.clone(), *score >= 0.5))
                .collect(),
            category_scores,
        }
    }
}

#[async_trait]
impl ModerationService for MockModerationService {
    async fn moderate(&self, request: &ModerationRequest) -> Result<Value, ModerationError> {
        if let Ok(mut guard) = self.requests.lock() {
            guard.push(request.clone());
        }

        if let Some((status, message)) = &self.failure {
            return Err(ModerationError::Upstream {
                status: *status,
                message: message.clone(),
            });
        }

        let items = match &request.input {
            Value::Array(items) => items.clone(),
            other => vec![other.clone()],
        };
        let results = items.iter().map(|item| self.outcome_for(item)).collect();

        let response = ModerationResponse {
            id: "modr-mock".to_string(),
            model: request.model.clone(),
            results,
        };
        serde_json::to_value(response).map_err(|e| ModerationError::InvalidResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_message_prefers_error_field() {
        let body = r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#;
        assert_eq!(upstream_message(body), "Incorrect API key provided");
        assert_eq!(upstream_message("bad gateway"), "bad gateway");
    }

    #[test]
    fn retry_classification() {
        assert!(ModerationError::Transport("reset".into()).is_retryable());
        assert!(ModerationError::Upstream { status: 503, message: String::new() }.is_retryable());
        assert!(ModerationError::Upstream { status: 429, message: String::new() }.is_retryable());
        assert!(!ModerationError::Upstream { status: 400, message: String::new() }.is_retryable());
        assert!(!ModerationError::MissingApiKey.is_retryable());
    }

    #[tokio::test]
    async fn mock_returns_one_result_per_item() {
        let mock = MockModerationService::new().with_trigger("blood", "violence/graphic", 0.9);
        let raw = mock
            .moderate(&ModerationRequest::texts(
                &["calm".to_string(), "blood everywhere".to_string()],
                "omni-moderation-latest",
            ))
            .await
            .unwrap();
        let response = decode_response(&raw).unwrap();
        assert_eq!(response.results.len(), 2);
        assert_eq!(response.results[1].category_scores["violence/graphic"], 0.9);
        assert_eq!(mock.recorded().len(), 1);
    }
}
