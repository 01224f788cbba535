//! Utility modules.

pub mod text;

pub use text::{escape_html_text, sanitize_label, truncate_chars};
