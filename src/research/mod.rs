//! Research pipeline: intent classification, provider fan-out, and cited synthesis.

pub mod citations;
pub mod classifier;
pub mod engine;
mod lang;
mod prompts;

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::providers::ResearchSource;

pub use lang::Lang;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentType {
    Diagnosis,
    Treatment,
    Pharmacology,
    Guideline,
    #[default]
    #[serde(other)]
    General,
}

impl fmt::Display for IntentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Diagnosis => "diagnosis",
            Self::Treatment => "treatment",
            Self::Pharmacology => "pharmacology",
            Self::Guideline => "guideline",
            Self::General => "general",
        })
    }
}

/// Boolean search strings at three levels of precision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQueries {
    /// Required concepts plus `NOT` exclusions.
    pub strict: String,
    /// Required concepts without exclusions.
    pub relaxed: String,
    /// Natural-language English question.
    pub semantic: String,
}

impl SearchQueries {
    fn uniform(query: &str) -> Self {
        Self {
            strict: query.to_string(),
            relaxed: query.to_string(),
            semantic: query.to_string(),
        }
    }
}

/// Structured reading of a clinical question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchIntent {
    #[serde(rename = "type")]
    pub intent_type: IntentType,
    pub keywords: Vec<String>,
    pub mesh_terms: BTreeSet<String>,
    pub include_terms: BTreeSet<String>,
    pub exclude_terms: BTreeSet<String>,
    pub search_queries: SearchQueries,
    pub original_query: String,
}

impl ResearchIntent {
    /// Intent used when classification fails: the raw query, verbatim, everywhere.
    pub fn fallback(query: &str) -> Self {
        Self {
            intent_type: IntentType::General,
            keywords: vec![query.to_string()],
            mesh_terms: BTreeSet::new(),
            include_terms: BTreeSet::new(),
            exclude_terms: BTreeSet::new(),
            search_queries: SearchQueries::uniform(query),
            original_query: query.to_string(),
        }
    }

    /// Flat keyword string sent to every provider.
    pub fn keyword_query(&self) -> String {
        let joined = self
            .keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if joined.is_empty() {
            self.search_queries.relaxed.clone()
        } else {
            joined
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchResult {
    /// Markdown with inline `[N]` citations; `N` is the 1-based index into `sources`.
    pub answer: String,
    pub sources: Vec<ResearchSource>,
    pub intent: ResearchIntent,
}
