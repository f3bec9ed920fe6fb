//! Redis-backed store implementation.
//!
//! Queue appends ride on Redis list atomicity (RPUSH/LPUSH); leases use
//! `SET NX PX` for acquisition and Lua scripts for the owner-checked
//! compare-and-extend / compare-and-delete, since GET-then-mutate from
//! the client would race with TTL expiry and re-acquisition.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{
    dlq_key, lease_key, queue_key, recipient_of_queue_key, QueueStore, ACTIVE_RECIPIENTS_KEY,
    QUEUE_KEY_PREFIX,
};
use crate::error::StoreError;

const SCAN_BATCH: usize = 100;

const RENEW_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
    return 1
end
return 0
";

const RELEASE_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

pub struct RedisStore {
    conn: ConnectionManager,
    renew_script: redis::Script,
    release_script: redis::Script,
}

impl RedisStore {
    /// Connect to Redis. Supports both redis:// and rediss:// (TLS)
    /// URLs; the connection manager reconnects on its own after
    /// transient failures.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            renew_script: redis::Script::new(RENEW_SCRIPT),
            release_script: redis::Script::new(RELEASE_SCRIPT),
        })
    }

    // ConnectionManager is a cheap clonable handle over one
    // multiplexed connection; each operation takes its own copy.
    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

#[async_trait]
impl QueueStore for RedisStore {
    async fn push_back(&self, recipient_id: &str, payload: &str) -> Result<(), StoreError> {
        let _: i64 = self.conn().rpush(queue_key(recipient_id), payload).await?;
        Ok(())
    }

    async fn push_front(&self, recipient_id: &str, payload: &str) -> Result<(), StoreError> {
        let _: i64 = self.conn().lpush(queue_key(recipient_id), payload).await?;
        Ok(())
    }

    async fn peek_front(&self, recipient_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.conn().lindex(queue_key(recipient_id), 0).await?)
    }

    async fn pop_front(&self, recipient_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.conn().lpop(queue_key(recipient_id), None).await?)
    }

    async fn queue_len(&self, recipient_id: &str) -> Result<u64, StoreError> {
        let len: i64 = self.conn().llen(queue_key(recipient_id)).await?;
        Ok(len.max(0) as u64)
    }

    async fn add_active(&self, recipient_id: &str) -> Result<(), StoreError> {
        let _: i64 = self
            .conn()
            .sadd(ACTIVE_RECIPIENTS_KEY, recipient_id)
            .await?;
        Ok(())
    }

    async fn remove_active(&self, recipient_id: &str) -> Result<(), StoreError> {
        let _: i64 = self
            .conn()
            .srem(ACTIVE_RECIPIENTS_KEY, recipient_id)
            .await?;
        Ok(())
    }

    async fn active_recipients(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.conn().smembers(ACTIVE_RECIPIENTS_KEY).await?)
    }

    async fn scan_queued_recipients(&self) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn();
        let pattern = format!("{QUEUE_KEY_PREFIX}*");
        let mut recipients = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            for key in keys {
                let Some(recipient) = recipient_of_queue_key(&key) else {
                    continue;
                };
                let len: i64 = conn.llen(&key).await?;
                if len > 0 {
                    recipients.push(recipient.to_string());
                }
            }
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(recipients)
    }

    async fn push_dead_letter(&self, recipient_id: &str, payload: &str) -> Result<(), StoreError> {
        let _: i64 = self.conn().rpush(dlq_key(recipient_id), payload).await?;
        Ok(())
    }

    async fn dead_letter_len(&self, recipient_id: &str) -> Result<u64, StoreError> {
        let len: i64 = self.conn().llen(dlq_key(recipient_id)).await?;
        Ok(len.max(0) as u64)
    }

    async fn peek_dead_letters(
        &self,
        recipient_id: &str,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        Ok(self
            .conn()
            .lrange(dlq_key(recipient_id), 0, limit as isize - 1)
            .await?)
    }

    async fn acquire_lease(
        &self,
        recipient_id: &str,
        owner_id: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let reply: Option<String> = redis::cmd("SET")
            .arg(lease_key(recipient_id))
            .arg(owner_id)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn renew_lease(
        &self,
        recipient_id: &str,
        owner_id: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let renewed: i64 = self
            .renew_script
            .key(lease_key(recipient_id))
            .arg(owner_id)
            .arg(ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;
        Ok(renewed == 1)
    }

    async fn release_lease(
        &self,
        recipient_id: &str,
        owner_id: &str,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let released: i64 = self
            .release_script
            .key(lease_key(recipient_id))
            .arg(owner_id)
            .invoke_async(&mut conn)
            .await?;
        Ok(released == 1)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: () = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
