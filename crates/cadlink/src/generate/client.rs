//! Gemini HTTP client.

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use std::time::Duration;

use super::error::{GenerateError, GenerateResult};
use super::types::{
    ApiErrorResponse, Content, GenerateContentRequest, GenerateContentResponse,
};
use super::{CodeGenerator, SYSTEM_INSTRUCTION};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-3-flash-preview";

/// Connection settings for [`GeminiClient`].
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Client for the `generateContent` endpoint.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> GenerateResult<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }

    async fn handle_response(
        &self,
        response: reqwest::Response,
    ) -> GenerateResult<GenerateContentResponse> {
        let status = response.status();

        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| GenerateError::ParseError(format!("Failed to parse response: {}", e)));
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorResponse>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);
        warn!("Model API returned {}: {}", status, message);
        Err(GenerateError::ApiError {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl CodeGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> GenerateResult<String> {
        let request = GenerateContentRequest {
            system_instruction: Content::text(None, SYSTEM_INSTRUCTION),
            contents: vec![Content::text(Some("user"), prompt)],
        };

        debug!("Requesting code from {} ({} byte prompt)", self.config.model, prompt.len());
        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let parsed = self.handle_response(response).await?;
        parsed.text().ok_or(GenerateError::EmptyResponse)
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{Value, json};

    async fn mock_generate(
        Path(rest): Path<String>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        if headers.get("x-goog-api-key").and_then(|v| v.to_str().ok()) != Some("test-key") {
            return (
                StatusCode::FORBIDDEN,
                Json(json!({"error": {"code": 403, "message": "API key not valid"}})),
            );
        }
        let prompt = body["contents"][0]["parts"][0]["text"].as_str().unwrap_or_default();
        if prompt == "nothing" {
            return (StatusCode::OK, Json(json!({"candidates": []})));
        }
        let code = format!("# {rest}\nPart.show(Part.makeBox(10, 10, 10))");
        (
            StatusCode::OK,
            Json(json!({"candidates": [{"content": {"role": "model", "parts": [{"text": code}]}}]})),
        )
    }

    async fn mock_server() -> String {
        let app = Router::new().route("/models/{*rest}", post(mock_generate));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    fn client(base_url: String, key: &str) -> GeminiClient {
        let mut config = GeminiConfig::new(key);
        config.base_url = base_url;
        GeminiClient::new(config).unwrap()
    }

    #[test]
    fn test_endpoint_includes_model() {
        let client = client("http://localhost:1/v1beta/".to_string(), "k");
        assert_eq!(
            client.endpoint(),
            "http://localhost:1/v1beta/models/gemini-3-flash-preview:generateContent"
        );
        assert_eq!(client.model(), DEFAULT_MODEL);
    }

    #[tokio::test]
    async fn test_generate_returns_candidate_text() {
        let client = client(mock_server().await, "test-key");
        let code = client.generate("a cube").await.unwrap();
        assert!(code.contains("gemini-3-flash-preview:generateContent"));
        assert!(code.contains("makeBox"));
    }

    #[tokio::test]
    async fn test_api_error_message_is_extracted() {
        let client = client(mock_server().await, "wrong");
        match client.generate("a cube").await.unwrap_err() {
            GenerateError::ApiError { status, message } => {
                assert_eq!(status, 403);
                assert_eq!(message, "API key not valid");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_candidates_is_an_error() {
        let client = client(mock_server().await, "test-key");
        let err = client.generate("nothing").await.unwrap_err();
        assert!(matches!(err, GenerateError::EmptyResponse));
    }
}
