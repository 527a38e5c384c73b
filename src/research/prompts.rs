use super::Lang;

pub(super) const CLASSIFIER_SYSTEM: &str = r#"You are a biomedical search strategist. You receive a clinical question, often written in Portuguese, and turn it into a literature search plan.

Steps:
1. Translate the question to English.
2. Classify it as one of: "diagnosis", "treatment", "pharmacology", "guideline", "general".
3. Extract the key clinical concepts in English as "keywords" (most important first).
4. Map the concepts to formal MeSH descriptors ("mesh_terms").
5. Put concepts that must be present in "include_terms".
6. Negation cues ("sem", "exceto", "não", "without", "except", "excluding") mark concepts the user wants excluded: put them in "exclude_terms".
7. Build three boolean PubMed queries:
   - "strict": include terms joined with AND, MeSH tags where possible, and every excluded concept as a NOT clause.
   - "relaxed": the same concepts with OR synonyms and no NOT clauses.
   - "semantic": a natural-language English question.

Respond with raw JSON only. No markdown fences, no commentary. Use exactly this shape:
{"type":"treatment","keywords":["..."],"mesh_terms":["..."],"include_terms":["..."],"exclude_terms":["..."],"search_queries":{"strict":"...","relaxed":"...","semantic":"..."}}"#;

pub(super) fn synthesis_system(lang: Lang, source_count: usize) -> String {
    format!(
        "You are a clinical evidence assistant for physicians. Answer the question using ONLY the numbered sources provided.

Rules:
- Write the entire answer in {lang}.
- Structure the answer with markdown sections: a short direct answer, the supporting evidence, and practical considerations or limitations.
- Cite every factual claim inline with the source number in square brackets, e.g. [1] or [2][3]. Valid citations are [1] through [{source_count}]. Never cite a number outside that range and never invent sources.
- If the sources do not contain enough evidence to answer, say so explicitly instead of guessing.
- Do not add a reference list at the end; it is rendered separately.",
        lang = lang.name(),
    )
}

pub(super) fn status_classifying(lang: Lang) -> &'static str {
    match lang {
        Lang::Pt => "Analisando a pergunta clínica...",
        Lang::En | Lang::Auto => "Analyzing the clinical question...",
    }
}

pub(super) fn status_searching(lang: Lang, providers: &str) -> String {
    match lang {
        Lang::Pt => format!("Buscando evidências em {providers}..."),
        Lang::En | Lang::Auto => format!("Searching {providers} for evidence..."),
    }
}

pub(super) fn status_synthesizing(lang: Lang, sources: usize) -> String {
    match lang {
        Lang::Pt => format!("Sintetizando resposta a partir de {sources} fontes..."),
        Lang::En | Lang::Auto => format!("Synthesizing an answer from {sources} sources..."),
    }
}

pub(super) fn status_done(lang: Lang) -> &'static str {
    match lang {
        Lang::Pt => "Pesquisa concluída.",
        Lang::En | Lang::Auto => "Research complete.",
    }
}

pub(super) fn status_failed(lang: Lang) -> &'static str {
    match lang {
        Lang::Pt => "Falha ao gerar a resposta.",
        Lang::En | Lang::Auto => "Failed to generate the answer.",
    }
}
