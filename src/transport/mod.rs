//! Chat transport abstraction.
//!
//! The core needs exactly two operations from the outside world: send
//! a text to a recipient, and signal that a message is being composed.
//! The transport classifies its own failures; the dispatcher decides
//! retry versus dead-letter from that classification alone.

pub mod telegram;

pub use telegram::TelegramTransport;

use async_trait::async_trait;
use thiserror::Error;

/// Transport failure classes.
#[derive(Error, Debug)]
pub enum SendError {
    /// Retryable: timeouts, rate-limiting signals, 5xx-equivalents.
    #[error("transient transport failure: {0}")]
    Transient(String),

    /// Not retryable: malformed recipient, forbidden, content rejected.
    #[error("permanent transport failure: {0}")]
    Permanent(String),
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Deliver `text` to `recipient_id` verbatim.
    async fn send(&self, recipient_id: &str, text: &str) -> Result<(), SendError>;

    /// Signal that a message is being composed. Callers treat this as
    /// fire-and-forget; failures are ignored.
    async fn typing(&self, recipient_id: &str) -> Result<(), SendError>;
}
