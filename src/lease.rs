//! Distributed mutual exclusion per recipient.
//!
//! A lease is a TTL-bounded claim on a recipient's delivery
//! serialization. TTL expiry is the only mechanism that recovers
//! mutual exclusion after a holder crashes, so the TTL must strictly
//! exceed the longest uninterrupted stretch a holder works without
//! renewing. The dispatcher renews before every delivery and across
//! any wait longer than half the TTL.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{CourierError, Result};
use crate::store::QueueStore;

/// One worker's claim on one recipient.
///
/// Renew and release are owner-checked in the store: the lease may
/// have expired and been re-acquired by another worker since our last
/// renewal, and an unchecked release would silently steal that
/// worker's mutual exclusion.
pub struct LeaseHandle {
    store: Arc<dyn QueueStore>,
    recipient_id: String,
    owner_id: String,
    ttl: Duration,
}

impl LeaseHandle {
    /// Try to claim the recipient. Returns `None` when another worker
    /// already holds the lease.
    pub async fn acquire(
        store: Arc<dyn QueueStore>,
        recipient_id: &str,
        owner_id: &str,
        ttl: Duration,
    ) -> Result<Option<Self>> {
        let acquired = store.acquire_lease(recipient_id, owner_id, ttl).await?;
        if !acquired {
            return Ok(None);
        }
        Ok(Some(Self {
            store,
            recipient_id: recipient_id.to_string(),
            owner_id: owner_id.to_string(),
            ttl,
        }))
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Extend the claim by a full TTL. Errors with `LeaseLost` when
    /// the lease expired or now belongs to another worker.
    pub async fn renew(&self) -> Result<()> {
        let renewed = self
            .store
            .renew_lease(&self.recipient_id, &self.owner_id, self.ttl)
            .await?;
        if !renewed {
            return Err(CourierError::lease_lost(&self.recipient_id, &self.owner_id));
        }
        Ok(())
    }

    /// Sleep for `total`, renewing whenever the uninterrupted wait
    /// would otherwise exceed half the TTL.
    pub async fn sleep_renewing(&self, total: Duration) -> Result<()> {
        let chunk = self.ttl / 2;
        let mut remaining = total;
        while remaining > chunk {
            tokio::time::sleep(chunk).await;
            remaining -= chunk;
            self.renew().await?;
        }
        tokio::time::sleep(remaining).await;
        Ok(())
    }

    /// Give the recipient back. Returns false when the lease had
    /// already expired or been taken over; that is not an error for a
    /// releasing worker, merely worth logging.
    pub async fn release(self) -> Result<bool> {
        Ok(self
            .store
            .release_lease(&self.recipient_id, &self.owner_id)
            .await?)
    }
}
