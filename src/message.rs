use base64::Engine;
use chrono::{DateTime, Utc};

/// Subject marker for bounce notifications; such messages are never evaluated.
pub const UNDELIVERABLE_MARKER: &str = "undeliverable";

#[derive(Debug, Clone)]
pub struct Attachment {
    pub name: String,
    pub content: Vec<u8>,
}

/// A message body as returned by the provider.
#[derive(Debug, Clone, Default)]
pub struct Body {
    pub content_type: String,
    pub content: String,
    /// The provider marked `content` as base64 (a `base64` member or
    /// `contentEncoding: base64` on the body object).
    pub base64: bool,
}

impl Body {
    /// Plain text for matching: base64 payloads are decoded and HTML is
    /// flattened to text. Graph normally returns text or html, so decoding
    /// only happens for an explicit marker or a content type naming base64.
    pub fn plain_text(&self) -> String {
        let content_type = self.content_type.to_lowercase();
        let mut text = self.content.clone();

        if self.base64 || content_type.contains("base64") {
            match base64::engine::general_purpose::STANDARD.decode(text.trim()) {
                Ok(bytes) => text = String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => log_warn!("[Message] Body claims base64 but failed to decode: {}", e),
            }
        }

        if content_type.contains("html") {
            match html2text::from_read(text.as_bytes(), 10_000) {
                Ok(flat) => text = flat,
                Err(e) => log_warn!("[Message] Failed to flatten HTML body: {}", e),
            }
        }

        text
    }
}

/// An unread message, hydrated with body and attachments by the runner.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub subject: String,
    pub from_address: String,
    pub to_addresses: Vec<String>,
    pub received_at: Option<DateTime<Utc>>,
    pub body: String,
    pub has_attachments: bool,
    pub attachments: Vec<Attachment>,
}

impl Message {
    pub fn is_undeliverable_notice(&self) -> bool {
        self.subject.to_lowercase().contains(UNDELIVERABLE_MARKER)
    }
}

/// Parse a provider timestamp such as `2024-03-01T10:15:00Z`.
pub fn parse_received(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
pub(crate) fn test_message(id: &str, from: &str, subject: &str, body: &str) -> Message {
    Message {
        id: id.to_string(),
        subject: subject.to_string(),
        from_address: from.to_string(),
        to_addresses: vec!["inbox@contoso.com".to_string()],
        received_at: parse_received("2024-03-01T10:15:00Z"),
        body: body.to_string(),
        has_attachments: false,
        attachments: Vec::new(),
    }
}
