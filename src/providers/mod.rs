//! Literature provider adapters. Every adapter is fail-soft: errors become an empty result.

pub mod openalex;
pub mod pubmed;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub use openalex::OpenAlexClient;
pub use pubmed::PubMedClient;

/// Authors kept per source.
pub const MAX_AUTHORS: usize = 5;
pub const UNKNOWN_DATE: &str = "unknown";
pub const NO_TITLE: &str = "no title";
pub const NO_ABSTRACT: &str = "abstract unavailable";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    PubMed,
    OpenAlex,
    SemanticScholar,
    #[serde(rename = "NICE")]
    Nice,
    Other,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PubMed => "PubMed",
            Self::OpenAlex => "OpenAlex",
            Self::SemanticScholar => "Semantic Scholar",
            Self::Nice => "NICE",
            Self::Other => "Other",
        })
    }
}

/// One retrieved article. `id` is provider-scoped (PMID, OpenAlex work id) and is the dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchSource {
    pub id: String,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub authors: Vec<String>,
    pub date: String,
    pub url: String,
    pub source: SourceKind,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("malformed XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

/// A searchable literature database.
#[async_trait]
pub trait LiteratureProvider: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Returns up to `limit` sources for `query`. Never fails; provider errors yield an empty list.
    async fn search(&self, query: &str, limit: usize) -> Vec<ResearchSource>;
}

/// Runs a provider search under a deadline. A timeout is treated like any other provider outage.
pub async fn search_with_timeout(
    provider: &dyn LiteratureProvider,
    query: &str,
    limit: usize,
    timeout: Duration,
) -> Vec<ResearchSource> {
    match tokio::time::timeout(timeout, provider.search(query, limit)).await {
        Ok(sources) => sources,
        Err(_) => {
            warn!(
                provider = %provider.kind(),
                timeout_secs = timeout.as_secs(),
                "provider search timed out"
            );
            Vec::new()
        }
    }
}

/// Logs a provider failure and substitutes the empty result.
pub(crate) fn fail_soft(
    kind: SourceKind,
    result: Result<Vec<ResearchSource>, ProviderError>,
) -> Vec<ResearchSource> {
    result.unwrap_or_else(|e| {
        warn!(provider = %kind, error = %e, "provider unavailable, continuing without it");
        Vec::new()
    })
}
