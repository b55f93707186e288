//! Pure text helpers shared by indexing and result presentation.

use regex::{NoExpand, Regex, RegexBuilder};

const ELLIPSIS: &str = "...";

/// Lowercased alphanumeric runs, in document order.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Query terms without duplicates, first occurrence order kept.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for term in tokenize(query) {
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}

fn terms_regex(query: &str) -> Option<Regex> {
    let terms = query_terms(query);
    if terms.is_empty() {
        return None;
    }
    let alternation = terms
        .iter()
        .map(|t| regex::escape(t))
        .collect::<Vec<_>>()
        .join("|");
    RegexBuilder::new(&format!(r"\b(?:{})\b", alternation))
        .case_insensitive(true)
        .build()
        .ok()
}

/// Wraps each whole-word occurrence of a query term in `<tag>...</tag>`.
pub fn highlight_content(content: &str, query: &str, tag: &str) -> String {
    let Some(re) = terms_regex(query) else {
        return content.to_string();
    };
    let mut out = String::with_capacity(content.len());
    let mut last = 0;
    for m in re.find_iter(content) {
        out.push_str(&content[last..m.start()]);
        out.push('<');
        out.push_str(tag);
        out.push('>');
        out.push_str(m.as_str());
        out.push_str("</");
        out.push_str(tag);
        out.push('>');
        last = m.end();
    }
    out.push_str(&content[last..]);
    out
}

/// Strips highlight markup produced by [`highlight_content`].
pub fn strip_highlight(content: &str, tag: &str) -> String {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let re = Regex::new(&format!("{}|{}", regex::escape(&open), regex::escape(&close)));
    match re {
        Ok(re) => re.replace_all(content, NoExpand("")).into_owned(),
        Err(_) => content.to_string(),
    }
}

fn floor_boundary(s: &str, mut idx: usize) -> usize {
    idx = idx.min(s.len());
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// An excerpt of roughly `length` bytes around the first query match.
///
/// The cap is soft: both ends move outward to the nearest word boundary so no
/// word is cut, and `...` marks trimmed ends.
pub fn generate_snippet(content: &str, query: &str, length: usize) -> String {
    let content = content.trim();
    if content.len() <= length {
        return content.to_string();
    }

    let anchor = terms_regex(query)
        .and_then(|re| re.find(content))
        .map(|m| m.start())
        .unwrap_or(0);

    let mut start = floor_boundary(content, anchor.saturating_sub(length / 4));
    if start > 0 {
        start = content[..start]
            .rfind(char::is_whitespace)
            .map(|i| i + 1)
            .unwrap_or(0);
    }

    let mut end = floor_boundary(content, start + length);
    if end < content.len() {
        end = content[end..]
            .find(char::is_whitespace)
            .map(|i| end + i)
            .unwrap_or(content.len());
    }

    let mut snippet = String::with_capacity(end - start + 2 * ELLIPSIS.len());
    if start > 0 {
        snippet.push_str(ELLIPSIS);
    }
    snippet.push_str(content[start..end].trim());
    if end < content.len() {
        snippet.push_str(ELLIPSIS);
    }
    snippet
}
