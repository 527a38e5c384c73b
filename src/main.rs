mod config;
mod llm;
mod markdown;
mod normalizer;
mod providers;
mod research;
mod tools;

pub const USER_AGENT: &str = concat!("medscout/", env!("CARGO_PKG_VERSION"), " (MCP Server)");

use clap::{Parser, Subcommand};
use rmcp::{ServiceExt, transport::stdio};
use tracing::info;

use config::Config;
use llm::LlmClient;
use normalizer::DrugNormalizer;
use research::engine::{self, Orchestrator};
use tools::MedScout;

#[derive(Parser)]
#[command(name = "medscout", version, about = "Clinical literature research over MCP")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the MCP tools over stdio (default)
    Serve,
    /// Run the research pipeline once and print the markdown report
    Research {
        /// Clinical question
        query: String,
        /// Response language: pt, en, or auto
        #[arg(long)]
        lang: Option<String>,
    },
    /// Normalize a drug name against RxNorm and MeSH
    Normalize {
        /// Drug name, brand, or Portuguese term
        term: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("medscout=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Research { query, lang } => {
            let http = tools::http_client()?;
            let providers = tools::default_providers(&http, &config);
            let llm = LlmClient::from_env(http)?;
            let orchestrator = Orchestrator::new(llm, providers, config.pipeline);
            let progress = |status: &str| eprintln!("{status}");
            let result = match lang.as_deref() {
                Some(raw) => {
                    let lang = research::Lang::parse(raw).ok_or_else(|| {
                        format!("invalid --lang '{raw}': expected pt, en, or auto")
                    })?;
                    orchestrator.research_in(&query, lang, Some(&progress)).await?
                }
                None => orchestrator.research(&query, Some(&progress)).await?,
            };
            println!("{}", engine::format_report(&result, &query));
            Ok(())
        }
        Command::Normalize { term } => {
            let http = tools::http_client()?;
            let llm = LlmClient::from_env(http.clone())
                .inspect_err(|e| tracing::warn!("translation fallback disabled: {e}"))
                .ok();
            let normalizer = DrugNormalizer::new(http, llm, config.translation_model);
            match normalizer.normalize(&term).await {
                Some(drug) => println!("{}", serde_json::to_string_pretty(&drug)?),
                None => println!("No RxNorm match for \"{term}\"."),
            }
            Ok(())
        }
    }
}

async fn serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!("starting medscout MCP server");

    let service = MedScout::new(config)?
        .serve(stdio())
        .await
        .inspect_err(|e| tracing::error!("failed to start server: {e}"))?;

    service.waiting().await?;
    info!("server stopped");
    Ok(())
}
