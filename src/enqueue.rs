//! Producer entry point.
//!
//! `Enqueuer` is the single operation producers use in place of a
//! direct transport call. It appends to the recipient's durable queue
//! and registers the recipient in the active set; it never touches the
//! recipient's lease.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::Result;
use crate::message::{
    normalize_outbound_text, split_transport_chunks, MessageKind, QueuedMessage, MAX_CHUNK_CHARS,
};
use crate::store::QueueStore;
use crate::utils::log_safe_id;

pub struct Enqueuer {
    store: Arc<dyn QueueStore>,
    log_salt: String,
}

impl Enqueuer {
    pub fn new(store: Arc<dyn QueueStore>, log_salt: impl Into<String>) -> Self {
        Self {
            store,
            log_salt: log_salt.into(),
        }
    }

    /// Append one message to `queue:{recipient}` and add the recipient
    /// to the active set.
    ///
    /// On success exactly one message with `retry_count = 0` has been
    /// appended before the membership write: a recipient with a
    /// non-empty queue is always (eventually) a member of the active
    /// set, while the converse may transiently not hold.
    pub async fn enqueue(
        &self,
        recipient_id: &str,
        text: &str,
        kind: MessageKind,
        metadata: HashMap<String, String>,
    ) -> Result<()> {
        let msg = QueuedMessage::new(recipient_id, text, kind, metadata);
        msg.validate()?;

        let payload = msg.to_wire()?;
        self.store.push_back(recipient_id, &payload).await?;
        self.store.add_active(recipient_id).await?;

        debug!(
            recipient_hash = %log_safe_id(recipient_id, &self.log_salt),
            kind = %kind,
            chars = text.chars().count(),
            "message enqueued"
        );
        Ok(())
    }

    /// Normalize producer output and enqueue it as one or more
    /// transport-safe chunks, in order. Long replies arrive as a paced
    /// sequence of messages rather than a single oversized send.
    pub async fn enqueue_chunked(
        &self,
        recipient_id: &str,
        text: &str,
        kind: MessageKind,
        metadata: HashMap<String, String>,
    ) -> Result<usize> {
        let normalized = normalize_outbound_text(text);
        let chunks = split_transport_chunks(&normalized, MAX_CHUNK_CHARS);
        for chunk in &chunks {
            self.enqueue(recipient_id, chunk, kind, metadata.clone())
                .await?;
        }
        if chunks.len() > 1 {
            info!(
                recipient_hash = %log_safe_id(recipient_id, &self.log_salt),
                parts = chunks.len(),
                "long message split before enqueue"
            );
        }
        Ok(chunks.len())
    }
}
