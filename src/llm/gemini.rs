use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};

use super::retry::with_retry;
use super::types::{
    ApiError, Content, GenerateContentRequest, GenerateContentResponse, GenerationConfig, Part,
};
use super::{ApiKey, ChatClient, ChatRequest, LlmError, Role, env_nonempty};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
pub struct GeminiClient {
    http: Client,
    api_key: ApiKey,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn from_env(http: Client) -> Result<Self, LlmError> {
        let api_key = env_nonempty("GEMINI_API_KEY").ok_or(LlmError::ApiKeyNotSet)?;
        let model = env_nonempty("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        Ok(Self {
            http,
            api_key: ApiKey(api_key),
            model,
            base_url: API_BASE.to_string(),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_base_url(http: Client, base_url: &str) -> Self {
        Self {
            http,
            api_key: ApiKey("test-key".to_string()),
            model: DEFAULT_MODEL.to_string(),
            base_url: base_url.to_string(),
        }
    }

    async fn generate(&self, request: &ChatRequest) -> Result<String, LlmError> {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let url = format!("{}/{model}:generateContent", self.base_url);

        let body = GenerateContentRequest {
            contents: request
                .messages
                .iter()
                .map(|m| Content {
                    parts: vec![Part {
                        text: m.content.clone(),
                    }],
                    role: Some(
                        match m.role {
                            Role::User => "user",
                        }
                        .to_string(),
                    ),
                })
                .collect(),
            system_instruction: (!request.system.is_empty()).then(|| Content {
                parts: vec![Part {
                    text: request.system.clone(),
                }],
                role: None,
            }),
            generation_config: GenerationConfig { temperature: 0.2 },
        };

        debug_assert!(
            url.starts_with("https://") || cfg!(test),
            "API key must only be sent over HTTPS"
        );

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key.0)
            .header("User-Agent", crate::USER_AGENT)
            .json(&body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            warn!("Gemini API rate limited");
            return Err(LlmError::RateLimited);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            if let Ok(body) = serde_json::from_str::<GenerateContentResponse>(&text)
                && let Some(err) = &body.error
            {
                let classified = classify_api_error(err);
                warn!(error = %classified, "Gemini API error");
                return Err(classified);
            }
            let end = text.floor_char_boundary(200);
            warn!(status = %status, "Gemini API error (no structured body)");
            return Err(LlmError::Api {
                code: status.as_u16(),
                message: format!("HTTP {status}: {}", &text[..end]),
            });
        }

        let body: GenerateContentResponse = response.json().await?;
        debug!(model, "gemini completion received");

        if let Some(err) = &body.error {
            let classified = classify_api_error(err);
            warn!(error = %classified, "Gemini API error in 200 response");
            return Err(classified);
        }

        extract_text(&body).ok_or(LlmError::EmptyResponse)
    }
}

impl ChatClient for GeminiClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        with_retry(|| self.generate(request)).await
    }
}

fn extract_text(response: &GenerateContentResponse) -> Option<String> {
    let text: String = response
        .candidates
        .as_ref()?
        .first()?
        .content
        .as_ref()?
        .parts
        .iter()
        .map(|p| p.text.as_str())
        .collect();
    (!text.trim().is_empty()).then_some(text)
}

pub(super) fn classify_api_error(err: &ApiError) -> LlmError {
    let message = err
        .message
        .clone()
        .unwrap_or_else(|| "Unknown error".to_string());

    match err.code {
        Some(429) => LlmError::RateLimited,
        Some(402 | 403) => LlmError::QuotaExhausted(message),
        Some(code) => LlmError::Api { code, message },
        None => LlmError::Api {
            code: 0,
            message: format!("Unknown error (no status code): {message}"),
        },
    }
}


#[cfg(test)]
mod http_tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ok_body(text: &str) -> serde_json::Value {
        serde_json::json!({
            "candidates": [{
                "content": {"parts": [{"text": text}], "role": "model"}
            }]
        })
    }

    #[tokio::test]
    async fn complete_sends_system_instruction_and_returns_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r"gemini-2\.5-flash:generateContent$"))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_partial_json(serde_json::json!({
                "systemInstruction": {"parts": [{"text": "be brief"}]},
                "contents": [{"role": "user", "parts": [{"text": "hi"}]}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("Hello")))
            .mount(&server)
            .await;

        let client = GeminiClient::with_base_url(Client::new(), &server.uri());
        let text = client
            .complete(&ChatRequest::new("be brief", "hi"))
            .await
            .unwrap();
        assert_eq!(text, "Hello");
    }

    #[tokio::test]
    async fn complete_uses_model_override_in_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r"gemini-2\.5-pro:generateContent$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("pro answer")))
            .mount(&server)
            .await;

        let client = GeminiClient::with_base_url(Client::new(), &server.uri());
        let req = ChatRequest::new("", "q").with_model(Some("gemini-2.5-pro"));
        assert_eq!(client.complete(&req).await.unwrap(), "pro answer");
    }

    #[tokio::test]
    async fn complete_400_with_error_body_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r":generateContent$"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {"code": 400, "message": "Invalid argument"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = GeminiClient::with_base_url(Client::new(), &server.uri());
        let result = client.complete(&ChatRequest::new("", "q")).await;
        match result {
            Err(LlmError::Api { code: 400, message }) => {
                assert!(message.contains("Invalid argument"));
            }
            other => panic!("expected Api(400), got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn complete_empty_candidates_is_empty_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r":generateContent$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": []
            })))
            .mount(&server)
            .await;

        let client = GeminiClient::with_base_url(Client::new(), &server.uri());
        let result = client.complete(&ChatRequest::new("", "q")).await;
        assert!(matches!(result, Err(LlmError::EmptyResponse)));
    }

    #[tokio::test]
    async fn complete_200_with_error_field_returns_classified_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r":generateContent$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": {"code": 403, "message": "Quota exceeded"}
            })))
            .mount(&server)
            .await;

        let client = GeminiClient::with_base_url(Client::new(), &server.uri());
        let result = client.complete(&ChatRequest::new("", "q")).await;
        assert!(matches!(result, Err(LlmError::QuotaExhausted(_))));
    }
}
