use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};

use super::gemini::classify_api_error;
use super::retry::with_retry;
use super::types::{ChatCompletionRequest, ChatCompletionResponse, WireMessage};
use super::{ApiKey, ChatClient, ChatRequest, LlmError, Role, env_nonempty};

const API_BASE: &str = "https://openrouter.ai/api/v1";
const DEFAULT_MODEL: &str = "google/gemini-2.5-flash";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Client for OpenRouter's OpenAI-compatible chat completions endpoint.
///
/// `OPENROUTER_BASE_URL` may point at any other OpenAI-compatible gateway.
#[derive(Clone, Debug)]
pub struct OpenRouterClient {
    http: Client,
    api_key: ApiKey,
    model: String,
    base_url: String,
}

impl OpenRouterClient {
    pub fn from_env(http: Client) -> Result<Self, LlmError> {
        let api_key = env_nonempty("OPENROUTER_API_KEY").ok_or(LlmError::ApiKeyNotSet)?;
        let model =
            env_nonempty("OPENROUTER_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let base_url = env_nonempty("OPENROUTER_BASE_URL")
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| API_BASE.to_string());
        Ok(Self {
            http,
            api_key: ApiKey(api_key),
            model,
            base_url,
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

    async fn chat(&self, request: &ChatRequest) -> Result<String, LlmError> {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let url = format!("{}/chat/completions", self.base_url);

        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if !request.system.is_empty() {
            messages.push(WireMessage {
                role: "system",
                content: &request.system,
            });
        }
        messages.extend(request.messages.iter().map(|m| WireMessage {
            role: match m.role {
                Role::User => "user",
            },
            content: &m.content,
        }));

        let body = ChatCompletionRequest {
            model,
            messages,
            temperature: 0.2,
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key.0)
            .header("User-Agent", crate::USER_AGENT)
            .header("X-Title", "medscout")
            .json(&body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            warn!("OpenRouter rate limited");
            return Err(LlmError::RateLimited);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            if let Ok(body) = serde_json::from_str::<ChatCompletionResponse>(&text)
                && let Some(err) = &body.error
            {
                let mut classified = classify_api_error(err);
                if let LlmError::Api { code: 0, message } = classified {
                    classified = LlmError::Api {
                        code: status.as_u16(),
                        message,
                    };
                }
                warn!(error = %classified, "OpenRouter API error");
                return Err(classified);
            }
            let end = text.floor_char_boundary(200);
            warn!(status = %status, "OpenRouter API error (no structured body)");
            return Err(LlmError::Api {
                code: status.as_u16(),
                message: format!("HTTP {status}: {}", &text[..end]),
            });
        }

        let body: ChatCompletionResponse = response.json().await?;
        debug!(model, "openrouter completion received");

        if let Some(err) = &body.error {
            let classified = classify_api_error(err);
            warn!(error = %classified, "OpenRouter error in 200 response");
            return Err(classified);
        }

        body.choices
            .and_then(|choices| choices.into_iter().next())
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(LlmError::EmptyResponse)
    }
}

impl ChatClient for OpenRouterClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        with_retry(|| self.chat(request)).await
    }
}

#[cfg(test)]
mod http_tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn complete_prepends_system_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({
                "model": "google/gemini-2.5-flash",
                "messages": [
                    {"role": "system", "content": "answer in English"},
                    {"role": "user", "content": "what is MeSH?"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "A vocabulary."}}]
            })))
            .mount(&server)
            .await;

        let client = OpenRouterClient::with_base_url(Client::new(), &server.uri());
        let text = client
            .complete(&ChatRequest::new("answer in English", "what is MeSH?"))
            .await
            .unwrap();
        assert_eq!(text, "A vocabulary.");
    }

    #[tokio::test]
    async fn complete_401_keeps_http_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": {"message": "No auth credentials found"}
            })))
            .mount(&server)
            .await;

        let client = OpenRouterClient::with_base_url(Client::new(), &server.uri());
        match client.complete(&ChatRequest::new("", "q")).await {
            Err(LlmError::Api { code: 401, message }) => {
                assert!(message.contains("credentials"));
            }
            other => panic!("expected Api(401), got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn complete_retries_rate_limit_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "after retry"}}]
            })))
            .mount(&server)
            .await;

        let client = OpenRouterClient::with_base_url(Client::new(), &server.uri());
        let text = client.complete(&ChatRequest::new("", "q")).await.unwrap();
        assert_eq!(text, "after retry");
    }

    #[tokio::test]
    async fn complete_null_content_is_empty_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": null}}]
            })))
            .mount(&server)
            .await;

        let client = OpenRouterClient::with_base_url(Client::new(), &server.uri());
        let result = client.complete(&ChatRequest::new("", "q")).await;
        assert!(matches!(result, Err(LlmError::EmptyResponse)));
    }
}
