use schemars::JsonSchema;
use serde::Deserialize;

use crate::providers::SourceKind;
use crate::research::Lang;

#[derive(Deserialize, JsonSchema)]
pub struct ResearchParams {
    /// Clinical question, in Portuguese or English
    pub query: String,
    /// Response language: "pt", "en", or "auto" (default: detect from the question)
    pub lang: Option<Lang>,
}

#[derive(Deserialize, JsonSchema)]
pub struct ClassifyParams {
    /// Clinical question to classify
    pub query: String,
    /// Prior conversation turns that give the question context (optional)
    pub context: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
pub struct LiteratureSearchParams {
    /// Keyword or boolean query (e.g., "heart failure AND SGLT2")
    pub query: String,
    /// Results per database (1-20, default: 5)
    pub limit: Option<u8>,
    /// Restrict to one database: "pubmed" or "openalex" (default: both)
    pub provider: Option<ProviderChoice>,
}

#[derive(Deserialize, JsonSchema)]
pub struct NormalizeDrugParams {
    /// Drug name as written by the user: brand, generic, or Portuguese (e.g., "dipirona")
    pub term: String,
}

#[derive(Deserialize, JsonSchema, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderChoice {
    PubMed,
    OpenAlex,
}

impl From<ProviderChoice> for SourceKind {
    fn from(choice: ProviderChoice) -> Self {
        match choice {
            ProviderChoice::PubMed => SourceKind::PubMed,
            ProviderChoice::OpenAlex => SourceKind::OpenAlex,
        }
    }
}
