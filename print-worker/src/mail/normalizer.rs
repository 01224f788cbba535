//! RFC 5322 message normalization using mailparse.
//!
//! Turns a raw fetched message into a [`NormalizedMessage`]: a decoded,
//! trimmed subject plus the best printable HTML body.

use mailparse::{parse_mail, DispositionType, MailHeaderMap, ParsedMail};
use thiserror::Error;
use tracing::{debug, warn};

use crate::util::escape_html_text;

/// Body used when a message carries neither HTML nor plain text.
pub const EMPTY_BODY_HTML: &str = "<html><body>(No body content)</body></html>";

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("cannot parse message {id}: {source}")]
    Parse {
        id: String,
        #[source]
        source: mailparse::MailParseError,
    },
}

/// A message reduced to what the print pipeline needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedMessage {
    /// Mailbox identifier (IMAP UID)
    pub id: String,
    /// Decoded subject, whitespace-trimmed
    pub subject: String,
    /// HTML document to print
    pub html_body: String,
}

/// Parse and normalize a raw message.
pub fn normalize_message(id: &str, raw: &[u8]) -> Result<NormalizedMessage, NormalizeError> {
    let mail = parse_mail(raw).map_err(|source| NormalizeError::Parse {
        id: id.to_string(),
        source,
    })?;

    let subject = decode_subject(&mail);
    let html_body = select_body(&mail);

    debug!(
        message_id = id,
        subject = %subject,
        html_length = html_body.len(),
        "message_normalized"
    );

    Ok(NormalizedMessage {
        id: id.to_string(),
        subject,
        html_body,
    })
}

/// Decode the Subject header.
///
/// mailparse decodes each RFC 2047 encoded word with its declared charset,
/// falling back to lossy UTF-8.
pub fn decode_subject(mail: &ParsedMail) -> String {
    mail.headers
        .get_first_value("Subject")
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

/// Pick the body to print: first HTML part, else first plain-text part
/// wrapped in a minimal document, else a placeholder.
pub fn select_body(mail: &ParsedMail) -> String {
    let mut html: Option<String> = None;
    let mut text: Option<String> = None;

    collect_bodies(mail, &mut html, &mut text);

    if let Some(html) = html {
        return html;
    }
    if let Some(text) = text {
        return wrap_plain_text(&text);
    }

    warn!(content_type = %mail.ctype.mimetype, "message_no_body_found");
    EMPTY_BODY_HTML.to_string()
}

/// Escape plain text and wrap it in a minimal HTML document.
pub fn wrap_plain_text(text: &str) -> String {
    format!(
        "<html><body><pre>{}</pre></body></html>",
        escape_html_text(text)
    )
}

/// Depth-first walk over the MIME tree, keeping the first usable part of
/// each type.
fn collect_bodies(part: &ParsedMail, html: &mut Option<String>, text: &mut Option<String>) {
    if html.is_some() && text.is_some() {
        return;
    }

    let mimetype = part.ctype.mimetype.to_lowercase();

    if mimetype.starts_with("multipart/") {
        for sub in &part.subparts {
            collect_bodies(sub, html, text);
        }
        return;
    }

    if part.get_content_disposition().disposition == DispositionType::Attachment {
        debug!(content_type = %mimetype, "message_part_attachment_skipped");
        return;
    }

    let slot = match mimetype.as_str() {
        "text/html" => html,
        "text/plain" => text,
        _ => return,
    };
    if slot.is_some() {
        return;
    }

    match part.get_body() {
        Ok(body) => *slot = Some(body),
        Err(e) => {
            warn!(content_type = %mimetype, error = %e, "message_part_decode_failed");
        }
    }
}
