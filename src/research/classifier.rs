//! LLM-backed intent classification with a deterministic fallback.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use super::prompts::CLASSIFIER_SYSTEM;
use super::{IntentType, ResearchIntent, SearchQueries};
use crate::llm::{ChatClient, ChatRequest, LlmError};

/// First `{` through last `}`; models sometimes wrap the JSON in prose or fences.
static JSON_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("static regex"));

#[derive(Debug, thiserror::Error)]
enum ClassifyError {
    #[error("{0}")]
    Llm(#[from] LlmError),

    #[error("no JSON object in model output")]
    NoJson,

    #[error("malformed intent JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct RawIntent {
    #[serde(rename = "type")]
    intent_type: IntentType,
    keywords: Vec<String>,
    #[serde(default)]
    mesh_terms: Vec<String>,
    #[serde(default)]
    include_terms: Vec<String>,
    #[serde(default)]
    exclude_terms: Vec<String>,
    search_queries: RawQueries,
}

#[derive(Deserialize)]
struct RawQueries {
    strict: String,
    relaxed: String,
    semantic: String,
}

/// Classifies a clinical question. Never fails: any LLM or parse error yields
/// [`ResearchIntent::fallback`].
pub async fn classify(
    llm: &impl ChatClient,
    model: Option<&str>,
    query: &str,
    context: Option<&str>,
) -> ResearchIntent {
    match try_classify(llm, model, query, context).await {
        Ok(intent) => {
            debug!(
                intent_type = %intent.intent_type,
                keywords = intent.keywords.len(),
                excluded = intent.exclude_terms.len(),
                "query classified"
            );
            intent
        }
        Err(e) => {
            warn!(error = %e, "classification failed, using fallback intent");
            ResearchIntent::fallback(query)
        }
    }
}

async fn try_classify(
    llm: &impl ChatClient,
    model: Option<&str>,
    query: &str,
    context: Option<&str>,
) -> Result<ResearchIntent, ClassifyError> {
    let user = match context.map(str::trim).filter(|c| !c.is_empty()) {
        Some(ctx) => format!("Conversation context:\n{ctx}\n\nClinical question:\n{query}"),
        None => format!("Clinical question:\n{query}"),
    };
    let request = ChatRequest::new(CLASSIFIER_SYSTEM, user).with_model(model);
    let output = llm.complete(&request).await?;
    parse_intent(&output, query)
}

fn parse_intent(output: &str, query: &str) -> Result<ResearchIntent, ClassifyError> {
    let block = JSON_BLOCK.find(output).ok_or(ClassifyError::NoJson)?;
    let raw: RawIntent = serde_json::from_str(block.as_str())?;

    let tier = |s: String| {
        let s = s.trim();
        if s.is_empty() {
            query.to_string()
        } else {
            s.to_string()
        }
    };

    Ok(ResearchIntent {
        intent_type: raw.intent_type,
        keywords: raw
            .keywords
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect(),
        mesh_terms: term_set(raw.mesh_terms),
        include_terms: term_set(raw.include_terms),
        exclude_terms: term_set(raw.exclude_terms),
        search_queries: SearchQueries {
            strict: tier(raw.search_queries.strict),
            relaxed: tier(raw.search_queries.relaxed),
            semantic: tier(raw.search_queries.semantic),
        },
        original_query: query.to_string(),
    })
}

fn term_set(terms: Vec<String>) -> BTreeSet<String> {
    terms
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use crate::llm::{ChatClient, ChatRequest, LlmError};

    /// Scripted chat backend that records every request it receives.
    pub struct ScriptedChat {
        responses: Mutex<VecDeque<Result<String, LlmError>>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedChat {
        pub fn new(responses: Vec<Result<String, LlmError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn replies(texts: &[&str]) -> Self {
            Self::new(texts.iter().map(|t| Ok((*t).to_string())).collect())
        }

        pub fn requests(&self) -> Vec<ChatRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl ChatClient for ScriptedChat {
        async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(LlmError::EmptyResponse))
        }
    }
}
