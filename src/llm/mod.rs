//! Chat-completion collaborator used by the classifier, synthesis, and drug-name translation.

pub mod gemini;
pub mod openrouter;
mod retry;
pub mod types;

use std::env;
use std::fmt;

use reqwest::Client;
use serde::Serialize;

pub use gemini::GeminiClient;
pub use openrouter::OpenRouterClient;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("no LLM API key set. Set OPENROUTER_API_KEY or GEMINI_API_KEY")]
    ApiKeyNotSet,

    #[error("unknown LLM_PROVIDER '{0}': expected 'gemini' or 'openrouter'")]
    UnknownProvider(String),

    #[error("LLM rate limit exceeded. Please retry later.")]
    RateLimited,

    #[error("LLM quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("LLM API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("LLM returned an empty completion")]
    EmptyResponse,

    #[error("LLM call timed out after {0}s")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// One completion request: optional model override, system prompt, and message history.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: Option<String>,
    pub system: String,
    pub messages: Vec<ChatMessage>,
}

impl ChatRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            model: None,
            system: system.into(),
            messages: vec![ChatMessage::user(user)],
        }
    }

    pub fn with_model(mut self, model: Option<&str>) -> Self {
        self.model = model.map(str::to_string);
        self
    }
}

/// Abstraction over a chat-completion backend.
/// Implemented by `LlmClient` for production; mock implementations used in tests.
pub trait ChatClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError>;
}

#[derive(Clone)]
pub(crate) struct ApiKey(pub(crate) String);

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

pub(crate) fn env_nonempty(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Backend selected at startup from `LLM_PROVIDER`, or from whichever API key is present.
#[derive(Clone, Debug)]
pub enum LlmClient {
    Gemini(GeminiClient),
    OpenRouter(OpenRouterClient),
}

impl LlmClient {
    pub fn from_env(http: Client) -> Result<Self, LlmError> {
        match env_nonempty("LLM_PROVIDER").map(|p| p.to_ascii_lowercase()) {
            Some(p) if p == "gemini" => Ok(Self::Gemini(GeminiClient::from_env(http)?)),
            Some(p) if p == "openrouter" => {
                Ok(Self::OpenRouter(OpenRouterClient::from_env(http)?))
            }
            Some(other) => Err(LlmError::UnknownProvider(other)),
            None => OpenRouterClient::from_env(http.clone())
                .map(Self::OpenRouter)
                .or_else(|_| GeminiClient::from_env(http).map(Self::Gemini)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Gemini(_) => "gemini",
            Self::OpenRouter(_) => "openrouter",
        }
    }
}

impl ChatClient for LlmClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        match self {
            Self::Gemini(c) => c.complete(request).await,
            Self::OpenRouter(c) => c.complete(request).await,
        }
    }
}
