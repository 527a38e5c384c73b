use schemars::JsonSchema;
use serde::Deserialize;

/// Response language for status messages, the "no results" answer, and synthesis.
#[derive(Deserialize, JsonSchema, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Pt,
    En,
    #[default]
    Auto,
}

const PORTUGUESE_WORDS: &[&str] = &[
    "de", "da", "do", "das", "dos", "em", "para", "com", "sem", "qual", "quais", "como",
    "não", "nao", "uma", "um", "exceto", "tratamento", "paciente", "pacientes", "doença",
    "doenca", "diagnóstico", "diagnostico",
];

impl Lang {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pt" | "pt-br" | "portuguese" => Some(Self::Pt),
            "en" | "english" => Some(Self::En),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }

    /// Resolves `Auto` against the question text.
    pub fn resolve(self, query: &str) -> Self {
        match self {
            Self::Auto if looks_portuguese(query) => Self::Pt,
            Self::Auto => Self::En,
            other => other,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Pt => "Brazilian Portuguese",
            Self::En | Self::Auto => "English",
        }
    }

    /// Answer returned when no provider found anything; `providers` names the databases searched.
    pub fn no_results_message(self, providers: &str) -> String {
        match self {
            Self::Pt => format!(
                "Não encontrei artigos relevantes nas bases consultadas ({providers}) para esta pergunta. \
                 Tente reformular com termos mais gerais ou em inglês."
            ),
            Self::En | Self::Auto => format!(
                "No relevant articles were found in the searched databases ({providers}) for this question. \
                 Try rephrasing with broader or English terms."
            ),
        }
    }
}

fn looks_portuguese(text: &str) -> bool {
    if text.chars().any(|c| matches!(c, 'ã' | 'õ' | 'ç' | 'Ã' | 'Õ' | 'Ç')) {
        return true;
    }
    let lower = text.to_lowercase();
    let hits = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| PORTUGUESE_WORDS.contains(w))
        .count();
    hits >= 2
}
