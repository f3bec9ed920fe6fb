//! In-process store implementation for tests and local development.
//!
//! Mirrors the Redis semantics the dispatcher relies on, including
//! lease TTL expiry (checked lazily on access).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::QueueStore;
use crate::error::StoreError;

#[derive(Default)]
struct Inner {
    queues: HashMap<String, VecDeque<String>>,
    active: HashSet<String>,
    dead_letters: HashMap<String, VecDeque<String>>,
    leases: HashMap<String, LeaseEntry>,
}

struct LeaseEntry {
    owner: String,
    expires_at: Instant,
}

impl Inner {
    /// Drops an expired lease so the calling operation observes the
    /// same "key is gone" state a Redis TTL would produce.
    fn prune_lease(&mut self, recipient_id: &str) {
        let expired = self
            .leases
            .get(recipient_id)
            .map(|entry| entry.expires_at <= Instant::now())
            .unwrap_or(false);
        if expired {
            self.leases.remove(recipient_id);
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Mutex poisoning only happens if a test panicked mid-operation.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current lease owner, if any. Test helper.
    pub fn lease_owner(&self, recipient_id: &str) -> Option<String> {
        let mut inner = self.lock();
        inner.prune_lease(recipient_id);
        inner.leases.get(recipient_id).map(|e| e.owner.clone())
    }

    /// Synchronous view of the active set. Test helper.
    pub fn active_snapshot(&self) -> Vec<String> {
        self.lock().active.iter().cloned().collect()
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn push_back(&self, recipient_id: &str, payload: &str) -> Result<(), StoreError> {
        self.lock()
            .queues
            .entry(recipient_id.to_string())
            .or_default()
            .push_back(payload.to_string());
        Ok(())
    }

    async fn push_front(&self, recipient_id: &str, payload: &str) -> Result<(), StoreError> {
        self.lock()
            .queues
            .entry(recipient_id.to_string())
            .or_default()
            .push_front(payload.to_string());
        Ok(())
    }

    async fn peek_front(&self, recipient_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .lock()
            .queues
            .get(recipient_id)
            .and_then(|q| q.front().cloned()))
    }

    async fn pop_front(&self, recipient_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .lock()
            .queues
            .get_mut(recipient_id)
            .and_then(|q| q.pop_front()))
    }

    async fn queue_len(&self, recipient_id: &str) -> Result<u64, StoreError> {
        Ok(self
            .lock()
            .queues
            .get(recipient_id)
            .map(|q| q.len() as u64)
            .unwrap_or(0))
    }

    async fn add_active(&self, recipient_id: &str) -> Result<(), StoreError> {
        self.lock().active.insert(recipient_id.to_string());
        Ok(())
    }

    async fn remove_active(&self, recipient_id: &str) -> Result<(), StoreError> {
        self.lock().active.remove(recipient_id);
        Ok(())
    }

    async fn active_recipients(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.lock().active.iter().cloned().collect())
    }

    async fn scan_queued_recipients(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .lock()
            .queues
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(r, _)| r.clone())
            .collect())
    }

    async fn push_dead_letter(&self, recipient_id: &str, payload: &str) -> Result<(), StoreError> {
        self.lock()
            .dead_letters
            .entry(recipient_id.to_string())
            .or_default()
            .push_back(payload.to_string());
        Ok(())
    }

    async fn dead_letter_len(&self, recipient_id: &str) -> Result<u64, StoreError> {
        Ok(self
            .lock()
            .dead_letters
            .get(recipient_id)
            .map(|q| q.len() as u64)
            .unwrap_or(0))
    }

    async fn peek_dead_letters(
        &self,
        recipient_id: &str,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        Ok(self
            .lock()
            .dead_letters
            .get(recipient_id)
            .map(|q| q.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn acquire_lease(
        &self,
        recipient_id: &str,
        owner_id: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        inner.prune_lease(recipient_id);
        if inner.leases.contains_key(recipient_id) {
            return Ok(false);
        }
        inner.leases.insert(
            recipient_id.to_string(),
            LeaseEntry {
                owner: owner_id.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(true)
    }

    async fn renew_lease(
        &self,
        recipient_id: &str,
        owner_id: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        inner.prune_lease(recipient_id);
        match inner.leases.get_mut(recipient_id) {
            Some(entry) if entry.owner == owner_id => {
                entry.expires_at = Instant::now() + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_lease(
        &self,
        recipient_id: &str,
        owner_id: &str,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        inner.prune_lease(recipient_id);
        let owned = inner
            .leases
            .get(recipient_id)
            .map(|entry| entry.owner == owner_id)
            .unwrap_or(false);
        if owned {
            inner.leases.remove(recipient_id);
        }
        Ok(owned)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
