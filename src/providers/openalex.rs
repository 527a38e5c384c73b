//! OpenAlex works search. Abstracts arrive as a word → positions inverted index.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::{
    LiteratureProvider, MAX_AUTHORS, NO_ABSTRACT, NO_TITLE, ProviderError, ResearchSource,
    SourceKind, UNKNOWN_DATE, fail_soft,
};

const API_BASE: &str = "https://api.openalex.org";
const SELECT_FIELDS: &str =
    "id,title,display_name,publication_date,authorships,abstract_inverted_index,doi,primary_location";

#[derive(Clone, Debug)]
pub struct OpenAlexClient {
    http: Client,
    mailto: Option<String>,
    base_url: String,
}

#[derive(Deserialize, Debug)]
struct WorksResponse {
    #[serde(default)]
    results: Vec<Work>,
}

#[derive(Deserialize, Debug)]
struct Work {
    id: String,
    title: Option<String>,
    display_name: Option<String>,
    publication_date: Option<String>,
    #[serde(default)]
    authorships: Vec<Authorship>,
    abstract_inverted_index: Option<HashMap<String, Vec<usize>>>,
    doi: Option<String>,
    primary_location: Option<Location>,
}

#[derive(Deserialize, Debug)]
struct Authorship {
    author: Option<Author>,
}

#[derive(Deserialize, Debug)]
struct Author {
    display_name: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Location {
    landing_page_url: Option<String>,
}

impl OpenAlexClient {
    /// `mailto` opts into OpenAlex's polite pool.
    pub fn new(http: Client, mailto: Option<String>) -> Self {
        Self {
            http,
            mailto,
            base_url: API_BASE.to_string(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_base_url(http: Client, base_url: &str, mailto: Option<&str>) -> Self {
        Self {
            http,
            mailto: mailto.map(str::to_string),
            base_url: base_url.to_string(),
        }
    }

    async fn try_search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ResearchSource>, ProviderError> {
        let per_page = limit.to_string();
        let mut url = Url::parse_with_params(
            &format!("{}/works", self.base_url),
            &[
                ("search", query),
                ("per_page", &per_page),
                ("filter", "has_abstract:true"),
                ("select", SELECT_FIELDS),
            ],
        )?;
        if let Some(mailto) = &self.mailto {
            url.query_pairs_mut().append_pair("mailto", mailto);
        }

        let response = self
            .http
            .get(url)
            .header("User-Agent", crate::USER_AGENT)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }

        let body: WorksResponse = response.json().await?;
        let sources: Vec<_> = body
            .results
            .into_iter()
            .take(limit)
            .map(work_to_source)
            .collect();
        debug!(query, results = sources.len(), "openalex search complete");
        Ok(sources)
    }
}

#[async_trait]
impl LiteratureProvider for OpenAlexClient {
    fn kind(&self) -> SourceKind {
        SourceKind::OpenAlex
    }

    async fn search(&self, query: &str, limit: usize) -> Vec<ResearchSource> {
        fail_soft(self.kind(), self.try_search(query, limit).await)
    }
}

fn work_to_source(work: Work) -> ResearchSource {
    let title = work
        .title
        .or(work.display_name)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| NO_TITLE.to_string());

    let abstract_text = work
        .abstract_inverted_index
        .as_ref()
        .map(reconstruct_abstract)
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| NO_ABSTRACT.to_string());

    let authors = work
        .authorships
        .into_iter()
        .filter_map(|a| a.author?.display_name)
        .filter(|name| !name.trim().is_empty())
        .take(MAX_AUTHORS)
        .collect();

    let url = work
        .doi
        .filter(|d| !d.is_empty())
        .or_else(|| work.primary_location.and_then(|l| l.landing_page_url))
        .unwrap_or_else(|| work.id.clone());

    ResearchSource {
        id: work.id,
        title,
        abstract_text,
        authors,
        date: work
            .publication_date
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| UNKNOWN_DATE.to_string()),
        url,
        source: SourceKind::OpenAlex,
    }
}

/// Rebuilds plain text from an inverted index: each word is placed at every one of its
/// positions, then positions are read in ascending order. Unfilled positions are skipped.
pub fn reconstruct_abstract(index: &HashMap<String, Vec<usize>>) -> String {
    let mut positioned: BTreeMap<usize, &str> = BTreeMap::new();
    for (word, positions) in index {
        for &pos in positions {
            positioned.insert(pos, word);
        }
    }
    positioned.into_values().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(pairs: &[(&str, &[usize])]) -> HashMap<String, Vec<usize>> {
        pairs
            .iter()
            .map(|(w, p)| ((*w).to_string(), p.to_vec()))
            .collect()
    }

    #[test]
    fn reconstructs_in_position_order() {
        let idx = index(&[("hello", &[0]), ("world", &[1])]);
        assert_eq!(reconstruct_abstract(&idx), "hello world");
    }

    #[test]
    fn repeated_words_fill_every_position() {
        let idx = index(&[("the", &[0, 3]), ("cat", &[1]), ("saw", &[2]), ("dog", &[4])]);
        assert_eq!(reconstruct_abstract(&idx), "the cat saw the dog");
    }

    #[test]
    fn gaps_are_skipped_without_placeholder() {
        let idx = index(&[("hello", &[0]), ("world", &[2])]);
        assert_eq!(reconstruct_abstract(&idx), "hello world");
    }

    #[test]
    fn empty_index_yields_empty_text() {
        assert_eq!(reconstruct_abstract(&HashMap::new()), "");
    }

    fn work(json: serde_json::Value) -> Work {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn work_prefers_doi_url() {
        let source = work_to_source(work(serde_json::json!({
            "id": "https://openalex.org/W1",
            "title": "Dapagliflozin in HFrEF",
            "publication_date": "2019-11-21",
            "doi": "https://doi.org/10.1056/nejmoa1911303",
            "primary_location": {"landing_page_url": "https://nejm.org/x"},
            "authorships": [
                {"author": {"display_name": "John McMurray"}},
                {"author": null}
            ],
            "abstract_inverted_index": {"Background": [0], "text": [1]}
        })));

        assert_eq!(source.id, "https://openalex.org/W1");
        assert_eq!(source.url, "https://doi.org/10.1056/nejmoa1911303");
        assert_eq!(source.authors, vec!["John McMurray"]);
        assert_eq!(source.abstract_text, "Background text");
        assert_eq!(source.date, "2019-11-21");
        assert_eq!(source.source, SourceKind::OpenAlex);
    }

    #[test]
    fn work_falls_back_to_landing_page_then_id() {
        let landing = work_to_source(work(serde_json::json!({
            "id": "https://openalex.org/W2",
            "display_name": "Display title",
            "primary_location": {"landing_page_url": "https://journal.org/a"}
        })));
        assert_eq!(landing.url, "https://journal.org/a");
        assert_eq!(landing.title, "Display title");
        assert_eq!(landing.abstract_text, NO_ABSTRACT);
        assert_eq!(landing.date, UNKNOWN_DATE);

        let bare = work_to_source(work(serde_json::json!({"id": "https://openalex.org/W3"})));
        assert_eq!(bare.url, "https://openalex.org/W3");
        assert_eq!(bare.title, NO_TITLE);
    }
}
