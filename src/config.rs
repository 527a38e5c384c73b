//! Environment configuration, read once at startup.

use std::str::FromStr;

use tracing::warn;

use crate::llm::env_nonempty;
use crate::research::Lang;
use crate::research::engine::{DEFAULT_MAX_SOURCES, DEFAULT_PER_PROVIDER_LIMIT, PipelineOptions};

/// Upper bound for both source caps; larger values only inflate the synthesis prompt.
const MAX_CAP: usize = 50;

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub pipeline: PipelineOptions,
    pub translation_model: Option<String>,
    pub ncbi_api_key: Option<String>,
    pub openalex_mailto: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(env_nonempty)
    }

    /// Builds the config from any name → value lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let lang = match lookup("MEDSCOUT_LANG") {
            Some(raw) => Lang::parse(&raw).unwrap_or_else(|| {
                warn!(value = %raw, "invalid MEDSCOUT_LANG, using auto");
                Lang::Auto
            }),
            None => Lang::Auto,
        };

        let pipeline = PipelineOptions {
            per_provider_limit: cap(
                &lookup,
                "MEDSCOUT_PER_PROVIDER_LIMIT",
                DEFAULT_PER_PROVIDER_LIMIT,
            ),
            max_sources: cap(&lookup, "MEDSCOUT_MAX_SOURCES", DEFAULT_MAX_SOURCES),
            classifier_model: lookup("MEDSCOUT_CLASSIFIER_MODEL"),
            synthesis_model: lookup("MEDSCOUT_SYNTHESIS_MODEL"),
            lang,
            ..PipelineOptions::default()
        };

        Self {
            pipeline,
            translation_model: lookup("MEDSCOUT_TRANSLATION_MODEL"),
            ncbi_api_key: lookup("NCBI_API_KEY"),
            openalex_mailto: lookup("OPENALEX_MAILTO"),
        }
    }
}

fn cap(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: usize) -> usize {
    match parse_or_default(lookup(name), default) {
        Ok(n) if (1..=MAX_CAP).contains(&n) => n,
        Ok(n) => {
            warn!(var = name, value = n, default, "out of range, using default");
            default
        }
        Err(raw) => {
            warn!(var = name, value = %raw, default, "not a number, using default");
            default
        }
    }
}

fn parse_or_default<T: FromStr>(raw: Option<String>, default: T) -> Result<T, String> {
    match raw {
        None => Ok(default),
        Some(s) => s.trim().parse().map_err(|_| s),
    }
}
