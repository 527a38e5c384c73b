//! Drug-name normalization: RxNorm lookup with an LLM translation fallback, plus MeSH headings.

use std::collections::HashMap;

use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::llm::{ChatClient, ChatRequest, LlmError};

const RXNAV_BASE: &str = "https://rxnav.nlm.nih.gov/REST";
const MESH_BASE: &str = "https://id.nlm.nih.gov/mesh";
/// Candidates at or below this approximate-match score keep the user's wording as display name.
const SCORE_THRESHOLD: f64 = 50.0;
const MAX_MESH_TERMS: usize = 3;

const TRANSLATION_SYSTEM: &str = "You convert drug names to the generic (INN/USAN) English name used by RxNorm.
The input may be a brand name, a colloquial name, or a Portuguese or Spanish name.
Reply with the generic English name only: no punctuation, no explanation.
If you do not recognize the drug, repeat the input unchanged.

Examples:
paracetamol -> acetaminophen
dipirona -> metamizole
tylenol -> acetaminophen
novalgina -> metamizole
amoxicilina -> amoxicillin
losartana potássica -> losartan
rivotril -> clonazepam";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedDrug {
    pub rxcui: String,
    pub name: String,
    pub score: f64,
    pub mesh_terms: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
enum LookupError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("translation failed: {0}")]
    Translation(#[from] LlmError),
}

#[derive(Deserialize)]
struct ApproximateResponse {
    #[serde(rename = "approximateGroup")]
    group: Option<ApproximateGroup>,
}

#[derive(Deserialize)]
struct ApproximateGroup {
    #[serde(default)]
    candidate: Vec<Candidate>,
}

#[derive(Deserialize, Debug, Clone)]
struct Candidate {
    rxcui: String,
    name: Option<String>,
    #[serde(deserialize_with = "lenient_score")]
    score: f64,
}

#[derive(Deserialize)]
struct MeshDescriptor {
    label: String,
}

/// RxNav reports scores as strings; accept numbers too.
fn lenient_score<'de, D: Deserializer<'de>>(de: D) -> Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Score {
        Num(f64),
        Text(String),
    }
    Ok(match Score::deserialize(de)? {
        Score::Num(n) => n,
        Score::Text(s) => s.trim().parse().unwrap_or(0.0),
    })
}

pub struct DrugNormalizer<C> {
    http: Client,
    /// Translation fallback; without it only the literal term is looked up.
    llm: Option<C>,
    translation_model: Option<String>,
    rxnav_base: String,
    mesh_base: String,
    cache: Mutex<HashMap<String, Option<NormalizedDrug>>>,
}

impl<C: ChatClient> DrugNormalizer<C> {
    pub fn new(http: Client, llm: Option<C>, translation_model: Option<String>) -> Self {
        Self::with_endpoints(http, llm, translation_model, RXNAV_BASE, MESH_BASE)
    }

    pub(crate) fn with_endpoints(
        http: Client,
        llm: Option<C>,
        translation_model: Option<String>,
        rxnav_base: &str,
        mesh_base: &str,
    ) -> Self {
        Self {
            http,
            llm,
            translation_model,
            rxnav_base: rxnav_base.trim_end_matches('/').to_string(),
            mesh_base: mesh_base.trim_end_matches('/').to_string(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Maps a brand or colloquial drug name to an RxNorm concept. `None` when nothing matches
    /// or a lookup failed. Matches and confirmed misses are cached for the life of the
    /// normalizer; failures are not, so the term is retried once the service recovers.
    pub async fn normalize(&self, term: &str) -> Option<NormalizedDrug> {
        let key = term.trim();
        if key.is_empty() {
            return None;
        }
        if let Some(hit) = self.cache.lock().get(key) {
            debug!(term = key, "normalizer cache hit");
            return hit.clone();
        }

        match self.resolve(key).await {
            Ok(resolved) => {
                self.cache.lock().insert(key.to_string(), resolved.clone());
                resolved
            }
            Err(e) => {
                warn!(term = key, error = %e, "drug normalization failed");
                None
            }
        }
    }

    async fn resolve(&self, term: &str) -> Result<Option<NormalizedDrug>, LookupError> {
        let candidate = match self.approximate(term).await? {
            Some(c) => Some(c),
            None => {
                let translated = self.translate(term).await?;
                if translated.eq_ignore_ascii_case(term) {
                    None
                } else {
                    info!(term, %translated, "retrying RxNorm lookup with translation");
                    self.approximate(&translated).await?
                }
            }
        };
        let Some(candidate) = candidate else {
            info!(term, "no RxNorm match");
            return Ok(None);
        };

        let name = match candidate.name {
            Some(name) if candidate.score > SCORE_THRESHOLD && !name.trim().is_empty() => name,
            _ => term.to_string(),
        };
        let mesh_terms = self.mesh_labels(&name).await.unwrap_or_else(|e| {
            warn!(name = %name, error = %e, "MeSH lookup failed");
            Vec::new()
        });

        Ok(Some(NormalizedDrug {
            rxcui: candidate.rxcui,
            name,
            score: candidate.score,
            mesh_terms,
        }))
    }

    async fn approximate(&self, term: &str) -> Result<Option<Candidate>, LookupError> {
        let url = Url::parse_with_params(
            &format!("{}/approximateTerm.json", self.rxnav_base),
            &[("term", term), ("maxEntries", "1")],
        )?;
        let body: ApproximateResponse = self.get_json(url).await?;
        Ok(body
            .group
            .and_then(|g| g.candidate.into_iter().find(|c| !c.rxcui.is_empty())))
    }

    async fn translate(&self, term: &str) -> Result<String, LookupError> {
        let Some(llm) = &self.llm else {
            debug!(term, "no LLM configured, skipping translation");
            return Ok(term.to_string());
        };
        let request = ChatRequest::new(TRANSLATION_SYSTEM, term)
            .with_model(self.translation_model.as_deref());
        let reply = llm.complete(&request).await?;
        let first_line = reply.lines().map(str::trim).find(|l| !l.is_empty());
        Ok(first_line
            .map(|l| l.trim_matches(|c: char| c == '"' || c == '.' || c == '`'))
            .unwrap_or(term)
            .to_string())
    }

    async fn mesh_labels(&self, name: &str) -> Result<Vec<String>, LookupError> {
        let limit = MAX_MESH_TERMS.to_string();
        let url = Url::parse_with_params(
            &format!("{}/lookup/descriptor", self.mesh_base),
            &[("label", name), ("match", "contains"), ("limit", &limit)],
        )?;
        let descriptors: Vec<MeshDescriptor> = self.get_json(url).await?;
        Ok(descriptors
            .into_iter()
            .map(|d| d.label)
            .filter(|l| !l.is_empty())
            .take(MAX_MESH_TERMS)
            .collect())
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: Url) -> Result<T, LookupError> {
        let response = self
            .http
            .get(url)
            .header("User-Agent", crate::USER_AGENT)
            .header("Accept", "application/json")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LookupError::Status(status.as_u16()));
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_accepts_string_or_number() {
        let c: Candidate =
            serde_json::from_str(r#"{"rxcui":"161","name":"acetaminophen","score":"75.5"}"#)
                .unwrap();
        assert_eq!(c.score, 75.5);
        let c: Candidate = serde_json::from_str(r#"{"rxcui":"161","score":12}"#).unwrap();
        assert_eq!(c.score, 12.0);
        assert!(c.name.is_none());
    }

    #[test]
    fn unparseable_score_reads_as_zero() {
        let c: Candidate = serde_json::from_str(r#"{"rxcui":"1","score":"n/a"}"#).unwrap();
        assert_eq!(c.score, 0.0);
    }

    #[test]
    fn empty_group_has_no_candidates() {
        let r: ApproximateResponse =
            serde_json::from_str(r#"{"approximateGroup":{"inputTerm":"xyz"}}"#).unwrap();
        assert!(r.group.unwrap().candidate.is_empty());
    }
}
