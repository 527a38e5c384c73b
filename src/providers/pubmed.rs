//! PubMed via NCBI E-utilities: `esearch` for relevance-ranked PMIDs, then one batched `efetch`.

use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::{
    LiteratureProvider, MAX_AUTHORS, NO_ABSTRACT, NO_TITLE, ProviderError, ResearchSource,
    SourceKind, UNKNOWN_DATE, fail_soft,
};

const API_BASE: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

#[derive(Clone, Debug)]
pub struct PubMedClient {
    http: Client,
    api_key: Option<String>,
    base_url: String,
}

#[derive(Deserialize)]
struct ESearchResponse {
    esearchresult: ESearchResult,
}

#[derive(Deserialize)]
struct ESearchResult {
    #[serde(default)]
    idlist: Vec<String>,
}

impl PubMedClient {
    /// `api_key` raises the NCBI rate limit from 3 to 10 requests per second.
    pub fn new(http: Client, api_key: Option<String>) -> Self {
        Self {
            http,
            api_key,
            base_url: API_BASE.to_string(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_base_url(http: Client, base_url: &str) -> Self {
        Self {
            http,
            api_key: None,
            base_url: base_url.to_string(),
        }
    }

    fn endpoint(&self, tool: &str, params: &[(&str, &str)]) -> Result<Url, ProviderError> {
        let mut url = Url::parse_with_params(&format!("{}/{tool}", self.base_url), params)?;
        if let Some(key) = &self.api_key {
            url.query_pairs_mut().append_pair("api_key", key);
        }
        Ok(url)
    }

    async fn get(&self, url: Url) -> Result<reqwest::Response, ProviderError> {
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
        Ok(response)
    }

    async fn esearch(&self, query: &str, limit: usize) -> Result<Vec<String>, ProviderError> {
        let retmax = limit.to_string();
        let url = self.endpoint(
            "esearch.fcgi",
            &[
                ("db", "pubmed"),
                ("term", query),
                ("retmode", "json"),
                ("retmax", &retmax),
                ("sort", "relevance"),
            ],
        )?;
        let body: ESearchResponse = self.get(url).await?.json().await?;
        let mut ids = body.esearchresult.idlist;
        ids.truncate(limit);
        Ok(ids)
    }

    async fn efetch(&self, pmids: &[String]) -> Result<Vec<ResearchSource>, ProviderError> {
        let ids = pmids.join(",");
        let url = self.endpoint(
            "efetch.fcgi",
            &[("db", "pubmed"), ("id", &ids), ("retmode", "xml")],
        )?;
        let xml = self.get(url).await?.text().await?;
        Ok(parse_efetch_xml(&xml)?)
    }

    async fn try_search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ResearchSource>, ProviderError> {
        let pmids = self.esearch(query, limit).await?;
        if pmids.is_empty() {
            debug!(query, "pubmed esearch returned no ids");
            return Ok(Vec::new());
        }
        let sources = self.efetch(&pmids).await?;
        debug!(ids = pmids.len(), parsed = sources.len(), "pubmed efetch complete");
        Ok(sources)
    }
}

#[async_trait]
impl LiteratureProvider for PubMedClient {
    fn kind(&self) -> SourceKind {
        SourceKind::PubMed
    }

    async fn search(&self, query: &str, limit: usize) -> Vec<ResearchSource> {
        fail_soft(self.kind(), self.try_search(query, limit).await)
    }
}

#[derive(Default)]
struct ArticleBuilder {
    pmid: Option<String>,
    title: String,
    abstract_parts: Vec<String>,
    abstract_label: Option<String>,
    abstract_buf: String,
    authors: Vec<String>,
    last_name: String,
    fore_name: String,
    collective_name: String,
    year: Option<String>,
    month: Option<String>,
    medline_date: Option<String>,
}

impl ArticleBuilder {
    fn finish_abstract_segment(&mut self) {
        let text = collapse_whitespace(&self.abstract_buf);
        self.abstract_buf.clear();
        if text.is_empty() {
            return;
        }
        match self.abstract_label.take() {
            Some(label) => self.abstract_parts.push(format!("{label}: {text}")),
            None => self.abstract_parts.push(text),
        }
    }

    fn finish_author(&mut self) {
        let name = if !self.collective_name.trim().is_empty() {
            collapse_whitespace(&self.collective_name)
        } else {
            collapse_whitespace(&format!("{} {}", self.fore_name, self.last_name))
        };
        self.last_name.clear();
        self.fore_name.clear();
        self.collective_name.clear();
        if !name.is_empty() {
            self.authors.push(name);
        }
    }

    fn build(self) -> Option<ResearchSource> {
        let id = self.pmid.filter(|p| !p.is_empty())?;

        let title = collapse_whitespace(&self.title);
        let abstract_text = self.abstract_parts.join(" ");
        let date = match (self.year, self.month, self.medline_date) {
            (Some(year), Some(month), _) => format!("{year} {month}"),
            (Some(year), None, _) => year,
            (None, _, Some(medline)) => medline,
            (None, _, None) => UNKNOWN_DATE.to_string(),
        };

        Some(ResearchSource {
            url: format!("https://pubmed.ncbi.nlm.nih.gov/{id}/"),
            id,
            title: if title.is_empty() {
                NO_TITLE.to_string()
            } else {
                title
            },
            abstract_text: if abstract_text.is_empty() {
                NO_ABSTRACT.to_string()
            } else {
                abstract_text
            },
            authors: self.authors.into_iter().take(MAX_AUTHORS).collect(),
            date,
            source: SourceKind::PubMed,
        })
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn label_of(e: &BytesStart<'_>) -> Option<String> {
    let attr = e.try_get_attribute("Label").ok().flatten()?;
    let value = attr.unescape_value().ok()?;
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Parses an efetch `PubmedArticleSet` document. Missing fields degrade to placeholders;
/// articles without a PMID are dropped.
pub fn parse_efetch_xml(xml: &str) -> Result<Vec<ResearchSource>, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    let mut current: Option<ArticleBuilder> = None;
    let mut sources = Vec::new();

    loop {
        let event = reader.read_event_into(&mut buf)?;
        match event {
            Event::Start(ref e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if let Some(article) = current.as_mut() {
                    match name.as_str() {
                        "AbstractText" if in_primary_abstract(&stack) => {
                            article.abstract_buf.clear();
                            article.abstract_label = label_of(e);
                        }
                        "Author" => {
                            article.last_name.clear();
                            article.fore_name.clear();
                            article.collective_name.clear();
                        }
                        _ => {}
                    }
                } else if name == "PubmedArticle" {
                    current = Some(ArticleBuilder::default());
                }
                stack.push(name);
            }
            Event::End(_) => {
                let name = stack.pop().unwrap_or_default();
                if name == "PubmedArticle" {
                    if let Some(source) = current.take().and_then(ArticleBuilder::build) {
                        sources.push(source);
                    }
                } else if let Some(article) = current.as_mut() {
                    match name.as_str() {
                        "AbstractText" if in_primary_abstract(&stack) => {
                            article.finish_abstract_segment()
                        }
                        "Author" => article.finish_author(),
                        _ => {}
                    }
                }
            }
            Event::Text(ref t) => {
                if let Some(article) = current.as_mut() {
                    let text = t.unescape()?;
                    route_text(article, &stack, &text);
                }
            }
            Event::CData(ref c) => {
                if let Some(article) = current.as_mut() {
                    let text = String::from_utf8_lossy(c).into_owned();
                    route_text(article, &stack, &text);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(sources)
}

/// `Abstract` holds the original-language abstract; `OtherAbstract` carries publisher
/// translations, which are ignored.
fn in_primary_abstract(stack: &[String]) -> bool {
    stack.iter().any(|s| s == "Abstract") && !stack.iter().any(|s| s == "OtherAbstract")
}

fn route_text(article: &mut ArticleBuilder, stack: &[String], text: &str) {
    let within = |tag: &str| stack.iter().any(|s| s == tag);

    // Titles and abstracts may contain inline markup (<i>, <sup>), so collect all descendant text.
    if within("ArticleTitle") {
        article.title.push_str(text);
        return;
    }
    if within("AbstractText") {
        if in_primary_abstract(stack) {
            article.abstract_buf.push_str(text);
        }
        return;
    }

    let Some(tag) = stack.last().map(String::as_str) else {
        return;
    };
    let parent = stack.len().checked_sub(2).map(|i| stack[i].as_str());
    let value = text.trim();
    if value.is_empty() {
        return;
    }

    match (tag, parent) {
        ("PMID", Some("MedlineCitation")) if article.pmid.is_none() => {
            article.pmid = Some(value.to_string());
        }
        ("LastName", Some("Author")) => article.last_name.push_str(value),
        ("ForeName", Some("Author")) => article.fore_name.push_str(value),
        ("CollectiveName", Some("Author")) => article.collective_name.push_str(value),
        ("Year", Some("PubDate")) => article.year = Some(value.to_string()),
        ("Month", Some("PubDate")) => article.month = Some(value.to_string()),
        ("MedlineDate", Some("PubDate")) => article.medline_date = Some(value.to_string()),
        _ => {}
    }
}
