//! Small text helpers shared by the job ledger and the document store.

/// Truncate a string to at most `max_chars` characters.
///
/// Counts characters, not bytes, so multi-byte subjects are never split
/// inside a code point.
pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}

/// Reduce a free-form label to something safe to use in a file name.
///
/// Keeps alphanumerics, `-`, `_` and spaces, then caps the result at
/// `max_chars` characters. Returns `fallback` when nothing survives.
pub fn sanitize_label(label: &str, max_chars: usize, fallback: &str) -> String {
    let cleaned: String = label
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | ' '))
        .take(max_chars)
        .collect();

    if cleaned.trim().is_empty() {
        fallback.to_string()
    } else {
        cleaned
    }
}

/// Escape the three characters that matter when embedding plain text in HTML.
pub fn escape_html_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
