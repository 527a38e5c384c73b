use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{info, warn};

use super::prompts::{
    status_classifying, status_done, status_failed, status_searching, status_synthesizing,
    synthesis_system,
};
use super::{Lang, ResearchIntent, ResearchResult, citations, classifier};
use crate::llm::{ChatClient, ChatRequest, LlmError};
use crate::markdown::{author_list, escape_md_link, excerpt, sanitize_heading};
use crate::providers::{LiteratureProvider, ResearchSource, SourceKind, search_with_timeout};

pub const DEFAULT_PER_PROVIDER_LIMIT: usize = 5;
pub const DEFAULT_MAX_SOURCES: usize = 10;
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_SYNTHESIS_TIMEOUT: Duration = Duration::from_secs(90);
const MAX_ABSTRACT_BYTES: usize = 3000;
const REPORT_AUTHORS: usize = 3;

/// Progress callback; receives a human-readable status in the response language.
pub type ProgressFn<'a> = dyn Fn(&str) + Send + Sync + 'a;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Classifying,
    Searching,
    Synthesizing,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Classifying => "classifying",
            Self::Searching => "searching",
            Self::Synthesizing => "synthesizing",
            Self::Done => "done",
            Self::Failed => "failed",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResearchError {
    #[error("answer synthesis failed: {0}")]
    Synthesis(#[from] LlmError),
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub per_provider_limit: usize,
    pub max_sources: usize,
    pub search_timeout: Duration,
    pub synthesis_timeout: Duration,
    pub classifier_model: Option<String>,
    pub synthesis_model: Option<String>,
    pub lang: Lang,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            per_provider_limit: DEFAULT_PER_PROVIDER_LIMIT,
            max_sources: DEFAULT_MAX_SOURCES,
            search_timeout: DEFAULT_SEARCH_TIMEOUT,
            synthesis_timeout: DEFAULT_SYNTHESIS_TIMEOUT,
            classifier_model: None,
            synthesis_model: None,
            lang: Lang::Auto,
        }
    }
}

/// Classify → search all providers concurrently → merge → synthesize with citations.
///
/// Provider failures are absorbed (an outage just contributes no sources); a synthesis
/// failure is returned to the caller.
pub struct Orchestrator<C> {
    llm: C,
    providers: Vec<Arc<dyn LiteratureProvider>>,
    options: PipelineOptions,
}

impl<C: ChatClient> Orchestrator<C> {
    pub fn new(
        llm: C,
        providers: Vec<Arc<dyn LiteratureProvider>>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            llm,
            providers,
            options,
        }
    }

    #[cfg(test)]
    pub(crate) fn llm(&self) -> &C {
        &self.llm
    }

    pub async fn research(
        &self,
        query: &str,
        on_progress: Option<&ProgressFn<'_>>,
    ) -> Result<ResearchResult, ResearchError> {
        self.research_in(query, self.options.lang, on_progress).await
    }

    /// Like [`Orchestrator::research`] with an explicit response language.
    pub async fn research_in(
        &self,
        query: &str,
        lang: Lang,
        on_progress: Option<&ProgressFn<'_>>,
    ) -> Result<ResearchResult, ResearchError> {
        let lang = lang.resolve(query);
        let report = |stage: Stage, status: &str| {
            info!(%stage, status, "research progress");
            if let Some(cb) = on_progress {
                cb(status);
            }
        };

        report(Stage::Classifying, status_classifying(lang));
        let intent = self.classify(query, None).await;

        let keyword_query = intent.keyword_query();
        let searching = status_searching(lang, &self.provider_names());
        report(Stage::Searching, searching.as_str());
        let sources = self
            .gather(&keyword_query, self.options.per_provider_limit, None)
            .await;

        if sources.is_empty() {
            info!(query = %keyword_query, "no sources found, skipping synthesis");
            report(Stage::Done, status_done(lang));
            return Ok(ResearchResult {
                answer: lang.no_results_message(&self.provider_names()),
                sources,
                intent,
            });
        }

        let synthesizing = status_synthesizing(lang, sources.len());
        report(Stage::Synthesizing, synthesizing.as_str());
        let answer = match self.synthesize(query, lang, &sources).await {
            Ok(answer) => answer,
            Err(e) => {
                report(Stage::Failed, status_failed(lang));
                return Err(e.into());
            }
        };

        let stray = citations::out_of_range(&answer, sources.len());
        if !stray.is_empty() {
            warn!(?stray, sources = sources.len(), "answer cites sources outside the provided set");
        }

        report(Stage::Done, status_done(lang));
        Ok(ResearchResult {
            answer,
            sources,
            intent,
        })
    }

    pub async fn classify(&self, query: &str, context: Option<&str>) -> ResearchIntent {
        classifier::classify(
            &self.llm,
            self.options.classifier_model.as_deref(),
            query,
            context,
        )
        .await
    }

    /// Searches every configured provider (or only `only`) concurrently and merges the results.
    pub async fn gather(
        &self,
        query: &str,
        per_provider: usize,
        only: Option<SourceKind>,
    ) -> Vec<ResearchSource> {
        search_providers(&self.providers, query, per_provider, only, &self.options).await
    }

    async fn synthesize(
        &self,
        query: &str,
        lang: Lang,
        sources: &[ResearchSource],
    ) -> Result<String, LlmError> {
        let user = format!(
            "Question: {query}\n\nSources:\n\n{}",
            build_context(sources)
        );
        let request = ChatRequest::new(synthesis_system(lang, sources.len()), user)
            .with_model(self.options.synthesis_model.as_deref());

        let timeout = self.options.synthesis_timeout;
        tokio::time::timeout(timeout, self.llm.complete(&request))
            .await
            .map_err(|_| LlmError::Timeout(timeout.as_secs()))?
    }

    fn provider_names(&self) -> String {
        self.providers
            .iter()
            .map(|p| p.kind().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Concurrent fan-out over `providers`, each under its own deadline. Waits for all of them.
pub async fn search_providers(
    providers: &[Arc<dyn LiteratureProvider>],
    query: &str,
    per_provider: usize,
    only: Option<SourceKind>,
    options: &PipelineOptions,
) -> Vec<ResearchSource> {
    let selected: Vec<&dyn LiteratureProvider> = providers
        .iter()
        .map(|p| &**p)
        .filter(|p| only.is_none_or(|kind| p.kind() == kind))
        .collect();
    let searches = selected
        .iter()
        .map(|&p| search_with_timeout(p, query, per_provider, options.search_timeout));
    let outcomes = join_all(searches).await;

    for (provider, found) in selected.iter().zip(&outcomes) {
        info!(provider = %provider.kind(), found = found.len(), "provider search complete");
    }

    merge_sources(outcomes, options.max_sources)
}

/// Flattens per-provider results in provider order, keeps the first occurrence of each id,
/// and truncates to `cap`.
pub fn merge_sources(per_provider: Vec<Vec<ResearchSource>>, cap: usize) -> Vec<ResearchSource> {
    let mut seen = HashSet::new();
    per_provider
        .into_iter()
        .flatten()
        .filter(|s| !s.id.is_empty() && seen.insert(s.id.clone()))
        .take(cap)
        .collect()
}

/// Numbered context block handed to the synthesis model; `[Source N]` matches citation `[N]`.
pub fn build_context(sources: &[ResearchSource]) -> String {
    let mut out = String::new();
    for (i, source) in sources.iter().enumerate() {
        let abstract_text = excerpt(&source.abstract_text, MAX_ABSTRACT_BYTES);
        out.push_str(&format!(
            "[Source {n}]\nTitle: {title}\nDate: {date}\nAuthors: {authors}\nAbstract: {abstract_text}\nID: {id}\nURL: {url}\n\n",
            n = i + 1,
            title = source.title,
            date = source.date,
            authors = source.authors.join(", "),
            id = source.id,
            url = source.url,
        ));
    }
    out
}

/// Numbered markdown list; entry `N` corresponds to citation `[N]`.
pub fn format_source_list(sources: &[ResearchSource]) -> String {
    let mut output = String::new();
    for (i, source) in sources.iter().enumerate() {
        let mut meta = Vec::new();
        let authors = author_list(&source.authors, REPORT_AUTHORS);
        if !authors.is_empty() {
            meta.push(authors);
        }
        meta.push(source.date.clone());
        meta.push(format!("{} {}", source.source, source.id));
        output.push_str(&format!(
            "{}. [{}]({})\n   {}\n",
            i + 1,
            escape_md_link(&source.title),
            escape_md_link(&source.url),
            meta.join(" | ")
        ));
    }
    output
}

pub fn format_report(result: &ResearchResult, query: &str) -> String {
    let mut output = format!("# Research: {}\n\n", sanitize_heading(query));
    output.push_str(&result.answer);
    output.push_str("\n\n");

    if !result.sources.is_empty() {
        output.push_str("---\n\n## Sources\n\n");
        output.push_str(&format_source_list(&result.sources));
        output.push('\n');
    }

    let intent = &result.intent;
    output.push_str("## Search strategy\n\n");
    output.push_str(&format!("- Type: {}\n", intent.intent_type));
    if !intent.mesh_terms.is_empty() {
        output.push_str(&format!(
            "- MeSH: {}\n",
            intent.mesh_terms.iter().cloned().collect::<Vec<_>>().join(", ")
        ));
    }
    if !intent.exclude_terms.is_empty() {
        output.push_str(&format!(
            "- Excluded: {}\n",
            intent.exclude_terms.iter().cloned().collect::<Vec<_>>().join(", ")
        ));
    }
    output.push_str(&format!("- Strict query: `{}`\n", intent.search_queries.strict));

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing::{StaticProvider, source};
    use crate::research::IntentType;
    use crate::research::classifier::testing::ScriptedChat;
    use std::sync::Mutex;

    const INTENT_JSON: &str = r#"{"type":"treatment","keywords":["heart failure","treatment"],"mesh_terms":["Heart Failure"],"include_terms":["heart failure"],"exclude_terms":["beta-blockers"],"search_queries":{"strict":"heart failure AND therapy NOT beta-blockers","relaxed":"heart failure AND therapy","semantic":"How is heart failure treated without beta-blockers?"}}"#;

    fn providers(sets: Vec<StaticProvider>) -> Vec<Arc<dyn LiteratureProvider>> {
        sets.into_iter()
            .map(|p| Arc::new(p) as Arc<dyn LiteratureProvider>)
            .collect()
    }

    fn orchestrator(
        llm: ScriptedChat,
        sets: Vec<StaticProvider>,
    ) -> Orchestrator<ScriptedChat> {
        Orchestrator::new(llm, providers(sets), PipelineOptions::default())
    }

    #[test]
    fn merge_dedups_keeping_first_and_caps() {
        let a = vec![
            source(SourceKind::PubMed, "1"),
            source(SourceKind::PubMed, "2"),
        ];
        let mut dup = source(SourceKind::OpenAlex, "2");
        dup.title = "duplicate".into();
        let b = vec![dup, source(SourceKind::OpenAlex, "3")];

        let merged = merge_sources(vec![a, b], 10);
        let ids: Vec<_> = merged.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(merged[1].source, SourceKind::PubMed);

        let pubmed = (0..8)
            .map(|i| source(SourceKind::PubMed, &i.to_string()))
            .collect();
        let openalex = (8..16)
            .map(|i| source(SourceKind::OpenAlex, &i.to_string()))
            .collect();
        let capped = merge_sources(vec![pubmed, openalex], 10);
        assert_eq!(capped.len(), 10);
        assert_eq!(capped[9].id, "9");
    }

    #[test]
    fn context_numbers_sources_from_one() {
        let ctx = build_context(&[
            source(SourceKind::PubMed, "111"),
            source(SourceKind::OpenAlex, "W2"),
        ]);
        assert!(ctx.starts_with("[Source 1]\nTitle: Title 111\n"));
        assert!(ctx.contains("[Source 2]\nTitle: Title W2\nDate: 2023\nAuthors: Ana Souza\n"));
        assert!(ctx.contains("ID: W2\nURL: https://example.org/W2\n"));
    }

    #[test]
    fn context_truncates_long_abstracts() {
        let mut long = source(SourceKind::PubMed, "1");
        long.abstract_text = "é".repeat(4000);
        let ctx = build_context(&[long]);
        assert!(ctx.contains("..."));
        assert!(ctx.len() < 4000 * 2);
    }

    #[tokio::test]
    async fn end_to_end_returns_cited_answer() {
        let llm = ScriptedChat::replies(&[
            INTENT_JSON,
            "## Answer\nSGLT2 inhibitors reduce hospitalization [1], as do MRAs [2].",
        ]);
        let orch = orchestrator(
            llm,
            vec![
                StaticProvider::new(SourceKind::PubMed, &["38012345"]),
                StaticProvider::new(SourceKind::OpenAlex, &["W42"]),
            ],
        );

        let result = orch
            .research("heart failure treatment without beta-blockers", None)
            .await
            .unwrap();

        assert_eq!(result.intent.intent_type, IntentType::Treatment);
        assert!(result.intent.exclude_terms.contains("beta-blockers"));
        assert!(result.intent.search_queries.strict.contains("NOT"));
        assert_eq!(result.sources.len(), 2);
        assert_eq!(result.sources[0].id, "38012345");
        assert!(result.answer.contains("[1]"));

        let requests = orch.llm().requests();
        assert_eq!(requests.len(), 2);
        let synthesis = &requests[1];
        assert!(synthesis.system.contains("English"));
        assert!(synthesis.system.contains("[1] through [2]"));
        assert!(synthesis.messages[0].content.contains("[Source 2]"));
    }

    #[tokio::test]
    async fn no_sources_short_circuits_without_synthesis() {
        let llm = ScriptedChat::replies(&[INTENT_JSON]);
        let orch = orchestrator(
            llm,
            vec![
                StaticProvider::new(SourceKind::PubMed, &[]),
                StaticProvider::new(SourceKind::OpenAlex, &[]),
            ],
        );

        let result = orch
            .research_in("tratamento de asma sem corticoide", Lang::Auto, None)
            .await
            .unwrap();

        assert!(result.sources.is_empty());
        assert_eq!(result.answer, Lang::Pt.no_results_message("PubMed, OpenAlex"));
        assert_eq!(orch.llm().requests().len(), 1);
    }

    #[tokio::test]
    async fn classifier_failure_still_searches_with_raw_query() {
        let llm = ScriptedChat::new(vec![
            Ok("not json at all".into()),
            Ok("Answer [1].".into()),
        ]);
        let orch = orchestrator(llm, vec![StaticProvider::new(SourceKind::PubMed, &["1"])]);

        let result = orch.research("sepsis fluids", None).await.unwrap();
        assert_eq!(result.intent, ResearchIntent::fallback("sepsis fluids"));
        assert_eq!(result.sources.len(), 1);
    }

    #[tokio::test]
    async fn synthesis_failure_propagates_and_reports_failed() {
        let llm = ScriptedChat::new(vec![
            Ok(INTENT_JSON.into()),
            Err(LlmError::Api {
                code: 401,
                message: "bad key".into(),
            }),
        ]);
        let orch = orchestrator(llm, vec![StaticProvider::new(SourceKind::PubMed, &["1"])]);

        let statuses = Mutex::new(Vec::new());
        let cb = |s: &str| statuses.lock().unwrap().push(s.to_string());
        let err = orch
            .research_in("heart failure", Lang::En, Some(&cb))
            .await
            .unwrap_err();

        assert!(matches!(err, ResearchError::Synthesis(LlmError::Api { code: 401, .. })));
        let statuses = statuses.into_inner().unwrap();
        assert_eq!(statuses.last().map(String::as_str), Some("Failed to generate the answer."));
    }

    #[tokio::test]
    async fn progress_walks_through_every_stage() {
        let llm = ScriptedChat::replies(&[INTENT_JSON, "Answer [1]."]);
        let orch = orchestrator(llm, vec![StaticProvider::new(SourceKind::PubMed, &["1"])]);

        let statuses = Mutex::new(Vec::new());
        let cb = |s: &str| statuses.lock().unwrap().push(s.to_string());
        orch.research_in("heart failure", Lang::En, Some(&cb)).await.unwrap();

        let statuses = statuses.into_inner().unwrap();
        assert_eq!(
            statuses,
            vec![
                "Analyzing the clinical question...",
                "Searching PubMed for evidence...",
                "Synthesizing an answer from 1 sources...",
                "Research complete.",
            ]
        );
    }

    #[tokio::test]
    async fn merged_sources_respect_cap_and_uniqueness() {
        let llm = ScriptedChat::replies(&[INTENT_JSON, "Answer [1]."]);
        let shared: Vec<String> = (0..5).map(|i| i.to_string()).collect();
        let shared_refs: Vec<&str> = shared.iter().map(String::as_str).collect();
        let other: Vec<String> = (3..12).map(|i| i.to_string()).collect();
        let other_refs: Vec<&str> = other.iter().map(String::as_str).collect();
        let mut orch = orchestrator(
            llm,
            vec![
                StaticProvider::new(SourceKind::PubMed, &shared_refs),
                StaticProvider::new(SourceKind::OpenAlex, &other_refs),
            ],
        );
        orch.options.per_provider_limit = 20;

        let result = orch.research("q", None).await.unwrap();
        assert!(result.sources.len() <= DEFAULT_MAX_SOURCES);
        let ids: HashSet<_> = result.sources.iter().map(|s| &s.id).collect();
        assert_eq!(ids.len(), result.sources.len());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_provider_times_out_without_blocking_siblings() {
        let llm = ScriptedChat::replies(&[INTENT_JSON, "Answer [1]."]);
        let mut hung = StaticProvider::new(SourceKind::OpenAlex, &["W1"]);
        hung.delay = Some(Duration::from_secs(3600));
        let orch = orchestrator(
            llm,
            vec![StaticProvider::new(SourceKind::PubMed, &["1"]), hung],
        );

        let result = orch.research("q", None).await.unwrap();
        assert_eq!(result.sources.len(), 1);
        assert_eq!(result.sources[0].source, SourceKind::PubMed);
    }

    #[tokio::test]
    async fn gather_can_target_one_provider() {
        let orch = orchestrator(
            ScriptedChat::replies(&[]),
            vec![
                StaticProvider::new(SourceKind::PubMed, &["1"]),
                StaticProvider::new(SourceKind::OpenAlex, &["W1"]),
            ],
        );
        let only = orch.gather("q", 5, Some(SourceKind::OpenAlex)).await;
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].id, "W1");
    }

    #[test]
    fn report_lists_sources_and_strategy() {
        let mut intent = ResearchIntent::fallback("hf");
        intent.intent_type = IntentType::Treatment;
        intent.mesh_terms.insert("Heart Failure".into());
        intent.exclude_terms.insert("beta-blockers".into());
        let mut s = source(SourceKind::PubMed, "38012345");
        s.title = "Trial [phase 3]".into();
        s.authors = vec!["A".into(), "B".into(), "C".into(), "D".into()];
        let result = ResearchResult {
            answer: "Use SGLT2i [1].".into(),
            sources: vec![s],
            intent,
        };

        let text = format_report(&result, "hf\ntreatment");
        assert!(text.starts_with("# Research: hf treatment\n"));
        assert!(text.contains("Use SGLT2i [1]."));
        assert!(text.contains(r"1. [Trial \[phase 3\]](https://example.org/38012345)"));
        assert!(text.contains("   A, B, C et al | 2023 | PubMed 38012345\n"));
        assert!(text.contains("- Type: treatment"));
        assert!(text.contains("- MeSH: Heart Failure"));
        assert!(text.contains("- Excluded: beta-blockers"));
    }
}
