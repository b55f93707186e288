//! Helpers for sanitizing data before it enters tracing span attributes.
//!
//! Spans carry enough to correlate events without exposing directory
//! layouts or full document identities.

use std::path::Path;

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// First 12 hex characters of a document hash, enough to correlate log
/// lines for one document.
pub fn short_hash(hash: &str) -> &str {
    let end = hash
        .char_indices()
        .nth(12)
        .map(|(i, _)| i)
        .unwrap_or(hash.len());
    &hash[..end]
}

/// Caps error text destined for span fields and progress events.
pub fn truncate_message(message: &str, max_chars: usize) -> String {
    if message.chars().count() <= max_chars {
        return message.to_string();
    }
    let mut out: String = message.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_path_returns_filename() {
        assert_eq!(
            redact_path(Path::new("/home/user/Documents/manual.pdf")),
            "manual.pdf"
        );
        assert_eq!(redact_path(Path::new("/")), "<unknown>");
    }

    #[test]
    fn test_short_hash() {
        let hash = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";
        assert_eq!(short_hash(hash), "9f86d081884c");
        assert_eq!(short_hash("abc"), "abc");
    }

    #[test]
    fn test_truncate_message() {
        assert_eq!(truncate_message("short", 10), "short");
        assert_eq!(truncate_message("abcdefghij", 4), "abcd...");
    }
}
