//! OpenAI-compatible chat-completions client (OpenRouter by default).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Value, json};
use tracing::debug;

use crate::generator::{CompletionRequest, TextGenerator};
use crate::result::AiError;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatCompletionsConfig {
    pub base_url: String,
    pub api_key: String,
    /// Sent as `HTTP-Referer`; OpenRouter uses it for attribution.
    pub referer: Option<String>,
    /// Sent as `X-Title`.
    pub title: Option<String>,
}

impl ChatCompletionsConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            referer: None,
            title: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Clone)]
pub struct ChatCompletionsClient {
    config: ChatCompletionsConfig,
    client: reqwest::Client,
}

impl ChatCompletionsClient {
    pub fn new(config: ChatCompletionsConfig) -> Result<Self, AiError> {
        if config.api_key.trim().is_empty() {
            return Err(AiError::NotConfigured("AI API key is not set".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AiError::Internal(format!("failed to build http client: {e}")))?;
        Ok(Self { config, client })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn payload(request: &CompletionRequest) -> Value {
        let mut payload = json!({
            "model": request.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.prompt },
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        if request.json_response {
            payload["response_format"] = json!({ "type": "json_object" });
        }
        payload
    }
}

#[async_trait]
impl TextGenerator for ChatCompletionsClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, AiError> {
        debug!(model = %request.model, "requesting chat completion");

        let mut builder = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.config.api_key)
            .json(&Self::payload(&request));
        if let Some(referer) = &self.config.referer {
            builder = builder.header("HTTP-Referer", referer);
        }
        if let Some(title) = &self.config.title {
            builder = builder.header("X-Title", title);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AiError::InferenceFailed(format!("completion request failed: {e}")))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| AiError::InferenceFailed(format!("failed reading completion body: {e}")))?;

        if !status.is_success() {
            let message = serde_json::from_slice::<Value>(&body)
                .ok()
                .and_then(|v| {
                    v.pointer("/error/message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or_else(|| String::from_utf8_lossy(&body).to_string());
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    AiError::NotConfigured(format!("provider rejected credentials: {message}"))
                }
                _ => AiError::InferenceFailed(format!("provider returned {status}: {message}")),
            });
        }

        let value: Value = serde_json::from_slice(&body)
            .map_err(|e| AiError::MalformedResponse(format!("completion body is not JSON: {e}")))?;

        value
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                AiError::MalformedResponse("completion has no choices[0].message.content".to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::routing::post;

    async fn spawn_server(status: StatusCode, body: Value) -> String {
        let app = Router::new().route(
            "/chat/completions",
            post(move || {
                let body = body.clone();
                async move { (status, axum::Json(body)) }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}")
    }

    fn client(base_url: String) -> ChatCompletionsClient {
        ChatCompletionsClient::new(ChatCompletionsConfig::new("test-key").with_base_url(base_url))
            .expect("client")
    }

    #[test]
    fn missing_api_key_is_a_configuration_error() {
        let result = ChatCompletionsClient::new(ChatCompletionsConfig::new(" "));
        assert!(matches!(result, Err(AiError::NotConfigured(_))));
    }

    #[test]
    fn payload_requests_json_objects() {
        let payload = ChatCompletionsClient::payload(&CompletionRequest::new(None, "hello"));
        assert_eq!(payload["response_format"]["type"], "json_object");
        assert_eq!(payload["messages"][1]["content"], "hello");
    }

    #[tokio::test]
    async fn returns_first_choice_content() {
        let base = spawn_server(
            StatusCode::OK,
            json!({ "choices": [ { "message": { "content": "{\"subject\":\"s\",\"content\":\"c\"}" } } ] }),
        )
        .await;

        let text = client(base).complete(CompletionRequest::new(None, "p")).await.unwrap();
        assert_eq!(text, "{\"subject\":\"s\",\"content\":\"c\"}");
    }

    #[tokio::test]
    async fn provider_errors_are_inference_failures() {
        let base = spawn_server(
            StatusCode::BAD_GATEWAY,
            json!({ "error": { "message": "upstream down" } }),
        )
        .await;

        let err = client(base).complete(CompletionRequest::new(None, "p")).await.unwrap_err();
        assert!(matches!(err, AiError::InferenceFailed(m) if m.contains("upstream down")));
    }

    #[tokio::test]
    async fn empty_choices_are_malformed() {
        let base = spawn_server(StatusCode::OK, json!({ "choices": [] })).await;
        let err = client(base).complete(CompletionRequest::new(None, "p")).await.unwrap_err();
        assert!(matches!(err, AiError::MalformedResponse(_)));
    }
}
