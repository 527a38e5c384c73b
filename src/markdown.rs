//! Small helpers for rendering untrusted text (article titles, user questions) into markdown.

/// Backslash-escapes `[`, `]`, `(`, `)` so titles and URLs cannot break link syntax.
pub(crate) fn escape_md_link(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '[' | ']' | '(' | ')') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Collapses a question onto one line for use in a `#` heading.
pub(crate) fn sanitize_heading(s: &str) -> String {
    s.split(['\n', '\r'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// First `max_bytes` of `s` on a char boundary, with `...` appended when cut.
pub(crate) fn excerpt(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let end = s.floor_char_boundary(max_bytes);
    format!("{}...", s[..end].trim_end())
}

/// `a, b, c` for the first `shown` names, then `et al`.
pub(crate) fn author_list(authors: &[String], shown: usize) -> String {
    if authors.len() > shown {
        format!("{} et al", authors[..shown].join(", "))
    } else {
        authors.join(", ")
    }
}
