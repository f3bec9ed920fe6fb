use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CourierError, Result};

/// Transport ceiling on a single message body, in characters.
/// Longer producer output is split by [`split_transport_chunks`].
pub const MAX_CHUNK_CHARS: usize = 4000;

/// Origin of an outbound message.
///
/// The core does not reorder or otherwise treat the kinds differently;
/// the tag exists for observability and for producers to correlate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Reply generated after inbound user text.
    Reactive,
    /// Scheduled outbound message.
    Proactive,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::Reactive => write!(f, "reactive"),
            MessageKind::Proactive => write!(f, "proactive"),
        }
    }
}

/// The unit of work: one outbound message waiting in `queue:{recipient}`.
///
/// The JSON field names are the wire format; changing them breaks
/// compatibility with queues written by other workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub recipient_id: String,

    /// Chat endpoint identifier. The core does not distinguish between
    /// "user" and "chat": this always mirrors `recipient_id`.
    pub chat_id: String,

    /// Opaque body, transmitted verbatim.
    pub text: String,

    #[serde(rename = "message_type")]
    pub kind: MessageKind,

    #[serde(rename = "timestamp")]
    pub enqueued_at: DateTime<Utc>,

    /// Incremented only on transient delivery failure.
    pub retry_count: u32,

    /// Producer-supplied correlation data, opaque to the core.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl QueuedMessage {
    pub fn new(
        recipient_id: impl Into<String>,
        text: impl Into<String>,
        kind: MessageKind,
        metadata: HashMap<String, String>,
    ) -> Self {
        let recipient_id = recipient_id.into();
        Self {
            chat_id: recipient_id.clone(),
            recipient_id,
            text: text.into(),
            kind,
            enqueued_at: Utc::now(),
            retry_count: 0,
            metadata,
        }
    }

    /// Enqueue-time invariants: non-empty recipient, non-empty body.
    pub fn validate(&self) -> Result<()> {
        if self.recipient_id.trim().is_empty() {
            return Err(CourierError::invalid_message("recipient_id is empty"));
        }
        if self.text.is_empty() {
            return Err(CourierError::invalid_message("text is empty"));
        }
        Ok(())
    }

    pub fn to_wire(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_wire(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}

/// Normalizes producer output before it is enqueued: trims the ends,
/// strips per-line whitespace and collapses runs of blank lines down to
/// a single paragraph break.
pub fn normalize_outbound_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0usize;
    for line in text.trim().lines() {
        let line = line.trim();
        if line.is_empty() {
            blank_run += 1;
            continue;
        }
        if !out.is_empty() {
            out.push_str(if blank_run > 0 { "\n\n" } else { "\n" });
        }
        blank_run = 0;
        out.push_str(line);
    }
    out
}

/// Splits normalized text into transport-safe parts: paragraphs first,
/// then greedy word-wrapping of any paragraph longer than `limit`
/// characters. Words longer than the limit are kept whole; the
/// transport decides their fate.
pub fn split_transport_chunks(text: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    for paragraph in text.split("\n\n") {
        if paragraph.is_empty() {
            continue;
        }
        if paragraph.chars().count() <= limit {
            chunks.push(paragraph.to_string());
            continue;
        }
        let mut current = String::new();
        let mut current_chars = 0usize;
        for word in paragraph.split_whitespace() {
            let word_chars = word.chars().count();
            if current_chars > 0 && current_chars + 1 + word_chars > limit {
                chunks.push(std::mem::take(&mut current));
                current_chars = 0;
            }
            if current_chars > 0 {
                current.push(' ');
                current_chars += 1;
            }
            current.push_str(word);
            current_chars += word_chars;
        }
        if !current.is_empty() {
            chunks.push(current);
        }
    }
    chunks
}
