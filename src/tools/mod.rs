mod errors;
mod params;

pub use params::{ClassifyParams, LiteratureSearchParams, NormalizeDrugParams, ResearchParams};

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use tracing::{info, warn};

use errors::{llm_to_mcp_error, require_text, research_to_mcp_error};

use crate::config::Config;
use crate::llm::{LlmClient, LlmError};
use crate::markdown::sanitize_heading;
use crate::normalizer::DrugNormalizer;
use crate::providers::{LiteratureProvider, OpenAlexClient, PubMedClient};
use crate::research::engine::{self, Orchestrator, PipelineOptions};

/// TCP connection establishment timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Global HTTP client timeout covering DNS + connect + response body.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_REDIRECTS: usize = 5;
const DEFAULT_SEARCH_LIMIT: u8 = 5;
const MAX_SEARCH_LIMIT: u8 = 20;

pub fn http_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(HTTP_TIMEOUT)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .user_agent(crate::USER_AGENT)
        .build()
}

/// PubMed first: merge order decides which copy of a duplicate survives.
pub fn default_providers(http: &Client, config: &Config) -> Vec<Arc<dyn LiteratureProvider>> {
    vec![
        Arc::new(PubMedClient::new(http.clone(), config.ncbi_api_key.clone())),
        Arc::new(OpenAlexClient::new(
            http.clone(),
            config.openalex_mailto.clone(),
        )),
    ]
}

/// MCP server handler providing clinical research, classification, literature search,
/// and drug-name normalization tools.
///
/// Configuration via environment variables (see `Config`):
/// - `OPENROUTER_API_KEY` / `GEMINI_API_KEY`: enables the LLM-backed tools
/// - `NCBI_API_KEY`, `OPENALEX_MAILTO`: higher provider rate limits (optional)
#[derive(Clone)]
pub struct MedScout {
    providers: Vec<Arc<dyn LiteratureProvider>>,
    pipeline: PipelineOptions,
    orchestrator: Option<Arc<Orchestrator<LlmClient>>>,
    normalizer: Arc<DrugNormalizer<LlmClient>>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl MedScout {
    pub fn new(config: Config) -> Result<Self, reqwest::Error> {
        let http = http_client()?;
        let llm = LlmClient::from_env(http.clone())
            .inspect(|c| info!(backend = c.name(), "LLM client ready"))
            .inspect_err(|e| warn!("LLM client not available: {e}"))
            .ok();
        let providers = default_providers(&http, &config);
        Ok(Self::from_parts(http, llm, providers, config))
    }

    pub(crate) fn from_parts(
        http: Client,
        llm: Option<LlmClient>,
        providers: Vec<Arc<dyn LiteratureProvider>>,
        config: Config,
    ) -> Self {
        let orchestrator = llm.clone().map(|llm| {
            Arc::new(Orchestrator::new(
                llm,
                providers.clone(),
                config.pipeline.clone(),
            ))
        });
        let normalizer = Arc::new(DrugNormalizer::new(
            http,
            llm,
            config.translation_model.clone(),
        ));
        Self {
            providers,
            pipeline: config.pipeline,
            orchestrator,
            normalizer,
            tool_router: Self::tool_router(),
        }
    }

    fn orchestrator(&self) -> Result<&Orchestrator<LlmClient>, McpError> {
        self.orchestrator
            .as_deref()
            .ok_or_else(|| llm_to_mcp_error(LlmError::ApiKeyNotSet))
    }

    #[tool(
        name = "research",
        description = "Answer a clinical question with evidence: classifies the question, searches PubMed and OpenAlex concurrently, and synthesizes a markdown answer with inline [N] citations into a numbered source list. Accepts Portuguese or English. Use for treatment, diagnosis, pharmacology, and guideline questions."
    )]
    async fn research(
        &self,
        Parameters(params): Parameters<ResearchParams>,
    ) -> Result<CallToolResult, McpError> {
        let query = require_text(&params.query, "query")?;
        let orchestrator = self.orchestrator()?;
        let lang = params.lang.unwrap_or(self.pipeline.lang);

        info!(query, ?lang, "tool:research");

        let result = orchestrator
            .research_in(query, lang, None)
            .await
            .map_err(research_to_mcp_error)?;

        info!(
            sources = result.sources.len(),
            intent = %result.intent.intent_type,
            "research complete"
        );

        let output = engine::format_report(&result, query);
        Ok(CallToolResult::success(vec![Content::text(output)]))
    }

    #[tool(
        name = "classify",
        description = "Turn a clinical question into a structured search plan (JSON): intent type, English keywords, MeSH terms, excluded concepts, and strict/relaxed/semantic boolean queries. Never fails; unparseable model output yields a plan that reuses the question verbatim."
    )]
    async fn classify(
        &self,
        Parameters(params): Parameters<ClassifyParams>,
    ) -> Result<CallToolResult, McpError> {
        let query = require_text(&params.query, "query")?;
        let orchestrator = self.orchestrator()?;

        info!(query, has_context = params.context.is_some(), "tool:classify");

        let intent = orchestrator
            .classify(query, params.context.as_deref())
            .await;
        let output = serde_json::to_string_pretty(&intent)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        Ok(CallToolResult::success(vec![Content::text(output)]))
    }

    #[tool(
        name = "literature_search",
        description = "Search PubMed and/or OpenAlex directly and return a numbered list of articles with authors, dates, and links. No AI/LLM round-trip; read the titles yourself or pass the query on to research."
    )]
    async fn literature_search(
        &self,
        Parameters(params): Parameters<LiteratureSearchParams>,
    ) -> Result<CallToolResult, McpError> {
        let query = require_text(&params.query, "query")?;
        let limit = params
            .limit
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .clamp(1, MAX_SEARCH_LIMIT) as usize;
        let only = params.provider.map(Into::into);

        info!(query, limit, provider = ?params.provider, "tool:literature_search");

        let mut options = self.pipeline.clone();
        options.max_sources = options.max_sources.max(limit * self.providers.len());
        let sources = engine::search_providers(&self.providers, query, limit, only, &options).await;

        info!(sources = sources.len(), "literature_search complete");

        let output = if sources.is_empty() {
            format!("No articles found for \"{}\".", sanitize_heading(query))
        } else {
            format!(
                "# Literature: {}\n\n{}",
                sanitize_heading(query),
                engine::format_source_list(&sources)
            )
        };
        Ok(CallToolResult::success(vec![Content::text(output)]))
    }

    #[tool(
        name = "normalize_drug",
        description = "Map a brand, colloquial, or Portuguese drug name to its RxNorm concept (RxCUI and generic name) plus up to 3 MeSH headings. Returns JSON, or a note when nothing matches."
    )]
    async fn normalize_drug(
        &self,
        Parameters(params): Parameters<NormalizeDrugParams>,
    ) -> Result<CallToolResult, McpError> {
        let term = require_text(&params.term, "term")?;
        info!(term, "tool:normalize_drug");

        let output = match self.normalizer.normalize(term).await {
            Some(drug) => serde_json::to_string_pretty(&drug)
                .map_err(|e| McpError::internal_error(e.to_string(), None))?,
            None => format!("No RxNorm match for \"{term}\"."),
        };
        Ok(CallToolResult::success(vec![Content::text(output)]))
    }
}

#[tool_handler]
impl ServerHandler for MedScout {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "medscout".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            instructions: Some(
                "medscout answers clinical questions from the biomedical literature. research runs the full pipeline (classify, PubMed/OpenAlex search, cited synthesis); classify, literature_search, and normalize_drug expose the individual steps."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
