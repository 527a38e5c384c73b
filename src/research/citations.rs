//! Inline `[N]` citation inspection for synthesized answers.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

static CITATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d{1,3})\]").expect("static regex"));

/// Distinct citation numbers appearing in `answer`, ascending.
pub fn cited_indices(answer: &str) -> BTreeSet<usize> {
    CITATION
        .captures_iter(answer)
        .filter_map(|c| c.get(1)?.as_str().parse().ok())
        .collect()
}

/// Citations outside `1..=source_count`. The synthesis prompt forbids these but cannot enforce it.
pub fn out_of_range(answer: &str, source_count: usize) -> Vec<usize> {
    cited_indices(answer)
        .into_iter()
        .filter(|&n| n == 0 || n > source_count)
        .collect()
}
