use rmcp::ErrorData as McpError;

use crate::llm::LlmError;
use crate::research::engine::ResearchError;

pub(super) fn require_text<'a>(value: &'a str, field: &str) -> Result<&'a str, McpError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(McpError::invalid_params(
            format!("{field} must not be empty"),
            None,
        ));
    }
    Ok(trimmed)
}

pub(super) fn retriable_error(e: &impl std::fmt::Display) -> McpError {
    McpError::internal_error(format!("{e} (retriable)"), None)
}

pub(super) fn llm_to_mcp_error(e: LlmError) -> McpError {
    match &e {
        LlmError::ApiKeyNotSet | LlmError::UnknownProvider(_) => {
            McpError::invalid_params(e.to_string(), None)
        }
        LlmError::RateLimited | LlmError::Timeout(_) => retriable_error(&e),
        LlmError::QuotaExhausted(_) => McpError::invalid_params(
            format!("{e}. Check the billing of your OpenRouter or Gemini account"),
            None,
        ),
        _ => McpError::internal_error(e.to_string(), None),
    }
}

pub(super) fn research_to_mcp_error(e: ResearchError) -> McpError {
    match e {
        ResearchError::Synthesis(inner) => llm_to_mcp_error(inner),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_text_is_invalid_params() {
        let err = require_text("   ", "query").unwrap_err();
        assert!(err.message.contains("query must not be empty"));
        assert_eq!(err.code, rmcp::model::ErrorCode(-32602));
        assert_eq!(require_text("  asma ", "query").unwrap(), "asma");
    }

    #[test]
    fn missing_key_names_env_vars() {
        let err = llm_to_mcp_error(LlmError::ApiKeyNotSet);
        assert!(err.message.contains("OPENROUTER_API_KEY"));
        assert!(err.message.contains("GEMINI_API_KEY"));
        assert_eq!(err.code, rmcp::model::ErrorCode(-32602));
    }

    #[test]
    fn rate_limit_is_retriable() {
        let err = research_to_mcp_error(ResearchError::Synthesis(LlmError::RateLimited));
        assert!(err.message.contains("retriable"));
        assert_eq!(err.code, rmcp::model::ErrorCode(-32603));
    }

    #[test]
    fn api_error_is_internal() {
        let err = llm_to_mcp_error(LlmError::Api {
            code: 500,
            message: "boom".into(),
        });
        assert_eq!(err.code, rmcp::model::ErrorCode(-32603));
        assert!(err.message.contains("boom"));
    }
}
