//! Queue state storage.
//!
//! For each recipient the backing store holds a coherent group of
//! objects, addressed by a fixed key layout:
//!
//! | key | type | content |
//! |---|---|---|
//! | `queue:{rid}` | list | serialized [`QueuedMessage`](crate::message::QueuedMessage), head = left |
//! | `active_recipients` | set | recipient ids with (believed) non-empty queue |
//! | `lease:{rid}` | string + TTL | owner id of the current lease holder |
//! | `dlq:{rid}` | list | messages that exhausted retries |
//!
//! The key names are the wire format shared by every worker; they are
//! deliberately constants, not configuration.

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

pub const QUEUE_KEY_PREFIX: &str = "queue:";
pub const ACTIVE_RECIPIENTS_KEY: &str = "active_recipients";
pub const LEASE_KEY_PREFIX: &str = "lease:";
pub const DLQ_KEY_PREFIX: &str = "dlq:";

pub fn queue_key(recipient_id: &str) -> String {
    format!("{QUEUE_KEY_PREFIX}{recipient_id}")
}

pub fn lease_key(recipient_id: &str) -> String {
    format!("{LEASE_KEY_PREFIX}{recipient_id}")
}

pub fn dlq_key(recipient_id: &str) -> String {
    format!("{DLQ_KEY_PREFIX}{recipient_id}")
}

/// Recipient id encoded in a `queue:{rid}` key, if it is one.
pub fn recipient_of_queue_key(key: &str) -> Option<&str> {
    key.strip_prefix(QUEUE_KEY_PREFIX).filter(|r| !r.is_empty())
}

/// Storage operations the core needs from the backing key-value store.
///
/// Concurrency contract: `push_back` and `add_active` may be called by
/// any number of producers at once; all other queue and DLQ mutations
/// are only issued by the worker currently holding the recipient's
/// lease. FIFO order of concurrent appends is whatever order the
/// backend's atomic append observed.
#[async_trait]
pub trait QueueStore: Send + Sync + 'static {
    /// Append a payload to the tail of the recipient's queue.
    async fn push_back(&self, recipient_id: &str, payload: &str) -> Result<(), StoreError>;

    /// Reinsert a payload at the head of the recipient's queue,
    /// preserving head-of-line for a retried message.
    async fn push_front(&self, recipient_id: &str, payload: &str) -> Result<(), StoreError>;

    /// Read the head of the queue without removing it.
    async fn peek_front(&self, recipient_id: &str) -> Result<Option<String>, StoreError>;

    /// Remove and return the head of the queue.
    async fn pop_front(&self, recipient_id: &str) -> Result<Option<String>, StoreError>;

    async fn queue_len(&self, recipient_id: &str) -> Result<u64, StoreError>;

    async fn add_active(&self, recipient_id: &str) -> Result<(), StoreError>;

    async fn remove_active(&self, recipient_id: &str) -> Result<(), StoreError>;

    async fn active_recipients(&self) -> Result<Vec<String>, StoreError>;

    /// Recipients whose `queue:{rid}` currently has entries, discovered
    /// by scanning persistent state. Used to rebuild the active set on
    /// startup.
    async fn scan_queued_recipients(&self) -> Result<Vec<String>, StoreError>;

    async fn push_dead_letter(&self, recipient_id: &str, payload: &str) -> Result<(), StoreError>;

    async fn dead_letter_len(&self, recipient_id: &str) -> Result<u64, StoreError>;

    /// Read up to `limit` dead letters without removing them.
    async fn peek_dead_letters(
        &self,
        recipient_id: &str,
        limit: usize,
    ) -> Result<Vec<String>, StoreError>;

    /// Atomically set `lease:{rid} = owner_id` with expiry `ttl`, only
    /// if the key does not exist. Returns true on acquisition.
    async fn acquire_lease(
        &self,
        recipient_id: &str,
        owner_id: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Extend the lease expiry to `ttl`, only if the current value
    /// equals `owner_id`. Returns false when the lease expired or is
    /// held by another owner.
    async fn renew_lease(
        &self,
        recipient_id: &str,
        owner_id: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Delete the lease, only if the current value equals `owner_id`.
    async fn release_lease(&self, recipient_id: &str, owner_id: &str)
        -> Result<bool, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
