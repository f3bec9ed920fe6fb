//! The dispatcher: turns active-set membership into serialized
//! per-recipient delivery.
//!
//! One supervisor loop scans `active_recipients` and spawns a task per
//! recipient not already served by this worker. Each task claims the
//! recipient's lease and drains the queue one message at a time:
//! peek, deliver, pop on success. Across worker processes the lease
//! guarantees at most one concurrent sender per recipient; within a
//! process the one-task-per-recipient map does.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::delivery::{Deliverer, DeliveryOutcome};
use crate::error::{CourierError, Result};
use crate::lease::LeaseHandle;
use crate::message::QueuedMessage;
use crate::store::QueueStore;
use crate::transport::Transport;
use crate::utils::log_safe_id;

const METRICS_LOG_INTERVAL: Duration = Duration::from_secs(30);
const STARTUP_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Cumulative delivery counters for one worker process.
#[derive(Default)]
pub struct DispatcherMetrics {
    delivered: AtomicU64,
    transient_retries: AtomicU64,
    dead_lettered: AtomicU64,
}

impl DispatcherMetrics {
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn transient_retries(&self) -> u64 {
        self.transient_retries.load(Ordering::Relaxed)
    }

    pub fn dead_lettered(&self) -> u64 {
        self.dead_lettered.load(Ordering::Relaxed)
    }
}

pub struct Dispatcher {
    store: Arc<dyn QueueStore>,
    deliverer: Deliverer,
    worker_id: String,
    max_retries: u32,
    lease_ttl: Duration,
    scan_interval: Duration,
    base_backoff: Duration,
    max_backoff: Duration,
    log_salt: String,
    shutdown: Arc<AtomicBool>,
    metrics: Arc<DispatcherMetrics>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn QueueStore>,
        transport: Arc<dyn Transport>,
        config: &Config,
    ) -> Self {
        let deliverer = Deliverer::new(
            transport,
            config.timing.clone(),
            config.transport_timeout,
            config.logging.hash_salt.clone(),
        );
        Self {
            store,
            deliverer,
            worker_id: format!("courier-{}", uuid::Uuid::new_v4()),
            max_retries: config.max_retries,
            lease_ttl: config.lease_ttl,
            scan_interval: config.scan_interval,
            base_backoff: config.base_backoff,
            max_backoff: config.max_backoff,
            log_salt: config.logging.hash_salt.clone(),
            shutdown: Arc::new(AtomicBool::new(false)),
            metrics: Arc::new(DispatcherMetrics::default()),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn metrics(&self) -> Arc<DispatcherMetrics> {
        self.metrics.clone()
    }

    /// Flag observed by the supervisor and every per-recipient task.
    /// Setting it stops new work; in-flight deliveries run to a
    /// terminal state.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Rebuild `active_recipients` from the queues that survived a
    /// restart. Messages enqueued while no worker was running are
    /// replayed because their queue keys are rediscovered here.
    pub async fn recover_active_set(&self) -> Result<usize> {
        let recipients = self.store.scan_queued_recipients().await?;
        for recipient_id in &recipients {
            self.store.add_active(recipient_id).await?;
        }
        Ok(recipients.len())
    }

    /// Run until shutdown: recovery scan first, then the supervisor
    /// loop. Returns after all in-flight recipient tasks have drained.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        // Startup must complete before any delivery work begins.
        let recovered = loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return Ok(());
            }
            match self.recover_active_set().await {
                Ok(count) => break count,
                Err(e) => {
                    warn!(error = %e, "startup queue scan failed, retrying");
                    tokio::time::sleep(STARTUP_RETRY_DELAY).await;
                }
            }
        };
        info!(
            worker_id = %self.worker_id,
            recovered_recipients = recovered,
            "dispatcher started"
        );

        let mut serving: HashMap<String, JoinHandle<()>> = HashMap::new();
        let mut last_metrics_log = Instant::now();

        while !self.shutdown.load(Ordering::SeqCst) {
            serving.retain(|_, handle| !handle.is_finished());

            match self.store.active_recipients().await {
                Ok(mut recipients) => {
                    // Set order is arbitrary; a stable order keeps the
                    // scan fair across recipients.
                    recipients.sort();
                    for recipient_id in recipients {
                        if serving.contains_key(&recipient_id) {
                            continue;
                        }
                        let task = tokio::spawn(
                            Arc::clone(&self).serve_recipient(recipient_id.clone()),
                        );
                        serving.insert(recipient_id, task);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "active-recipient scan failed, retrying on next interval");
                }
            }

            if last_metrics_log.elapsed() >= METRICS_LOG_INTERVAL {
                info!(
                    worker_id = %self.worker_id,
                    delivered = self.metrics.delivered(),
                    transient_retries = self.metrics.transient_retries(),
                    dead_lettered = self.metrics.dead_lettered(),
                    serving = serving.len(),
                    "dispatcher metrics"
                );
                last_metrics_log = Instant::now();
            }

            tokio::time::sleep(self.scan_interval).await;
        }

        info!(
            worker_id = %self.worker_id,
            in_flight = serving.len(),
            "shutdown requested, draining recipient tasks"
        );
        for (recipient_id, handle) in serving {
            if let Err(e) = handle.await {
                warn!(
                    recipient_hash = %log_safe_id(&recipient_id, &self.log_salt),
                    error = %e,
                    "recipient task panicked during drain"
                );
            }
        }
        info!(worker_id = %self.worker_id, "dispatcher stopped");
        Ok(())
    }

    /// One per-recipient session: claim the lease, drain the queue,
    /// give the lease back.
    async fn serve_recipient(self: Arc<Self>, recipient_id: String) {
        let recipient_hash = log_safe_id(&recipient_id, &self.log_salt);

        let lease = match LeaseHandle::acquire(
            self.store.clone(),
            &recipient_id,
            &self.worker_id,
            self.lease_ttl,
        )
        .await
        {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                // Another worker owns this recipient; the next scan
                // will try again if the queue still has contents.
                debug!(recipient_hash = %recipient_hash, "lease held elsewhere");
                return;
            }
            Err(e) => {
                warn!(recipient_hash = %recipient_hash, error = %e, "lease acquisition failed");
                return;
            }
        };

        debug!(recipient_hash = %recipient_hash, "serving recipient");

        match self.drain_queue(&recipient_id, &lease).await {
            Ok(()) => {}
            Err(CourierError::LeaseLost { .. }) => {
                // The queue now belongs to another worker. Abandon
                // without releasing: the lease key is no longer ours.
                warn!(recipient_hash = %recipient_hash, "lease lost mid-session, abandoning");
                return;
            }
            Err(e) => {
                warn!(
                    recipient_hash = %recipient_hash,
                    error = %e,
                    "recipient session terminated on error"
                );
            }
        }

        match lease.release().await {
            Ok(true) => {}
            Ok(false) => {
                debug!(recipient_hash = %recipient_hash, "lease already expired at release")
            }
            Err(e) => {
                warn!(recipient_hash = %recipient_hash, error = %e, "lease release failed")
            }
        }
    }

    /// Deliver queued messages in order while the lease is held.
    /// Returns when the queue is observed empty (after the membership
    /// double-check) or on shutdown.
    async fn drain_queue(&self, recipient_id: &str, lease: &LeaseHandle) -> Result<()> {
        let recipient_hash = log_safe_id(recipient_id, &self.log_salt);
        let mut first_in_session = true;

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                // Remaining work stays queued and active for the next
                // worker.
                return Ok(());
            }

            let payload = match self.store.peek_front(recipient_id).await? {
                Some(payload) => payload,
                None => {
                    // Only the dispatcher gardens the active set, and
                    // only while holding the lease. Re-check after the
                    // removal: a producer may have appended between our
                    // peek and the SREM.
                    self.store.remove_active(recipient_id).await?;
                    if self.store.queue_len(recipient_id).await? > 0 {
                        self.store.add_active(recipient_id).await?;
                        continue;
                    }
                    return Ok(());
                }
            };

            let msg = match QueuedMessage::from_wire(&payload) {
                Ok(msg) => msg,
                Err(e) => {
                    // Undeliverable by construction: dead-letter the raw
                    // payload without a send attempt.
                    warn!(
                        recipient_hash = %recipient_hash,
                        error = %e,
                        "malformed payload moved to dead letters"
                    );
                    self.store.pop_front(recipient_id).await?;
                    self.store.push_dead_letter(recipient_id, &payload).await?;
                    self.metrics.dead_lettered.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };

            if msg.retry_count > self.max_retries {
                self.store.pop_front(recipient_id).await?;
                self.store.push_dead_letter(recipient_id, &payload).await?;
                self.metrics.dead_lettered.fetch_add(1, Ordering::Relaxed);
                warn!(
                    recipient_hash = %recipient_hash,
                    retry_count = msg.retry_count,
                    "over-retried message moved to dead letters"
                );
                continue;
            }

            // Renew before every delivery so the TTL only ever has to
            // cover a single message's delivery time.
            lease.renew().await?;

            let outcome = self.deliverer.deliver(&msg, first_in_session).await;
            first_in_session = false;

            match outcome {
                DeliveryOutcome::Success => {
                    // Pop after the send: a crash in between means
                    // redelivery, never loss.
                    self.store.pop_front(recipient_id).await?;
                    self.metrics.delivered.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        recipient_hash = %recipient_hash,
                        kind = %msg.kind,
                        "message delivered"
                    );
                }
                DeliveryOutcome::TransientFail if msg.retry_count < self.max_retries => {
                    self.store.pop_front(recipient_id).await?;
                    let mut retried = msg;
                    retried.retry_count += 1;
                    self.store
                        .push_front(recipient_id, &retried.to_wire()?)
                        .await?;
                    self.metrics
                        .transient_retries
                        .fetch_add(1, Ordering::Relaxed);

                    let backoff = self.backoff_delay(retried.retry_count);
                    debug!(
                        recipient_hash = %recipient_hash,
                        retry_count = retried.retry_count,
                        backoff_secs = backoff.as_secs_f64(),
                        "message re-headed for retry"
                    );
                    lease.sleep_renewing(backoff).await?;
                }
                DeliveryOutcome::TransientFail | DeliveryOutcome::PermanentFail => {
                    self.store.pop_front(recipient_id).await?;
                    self.store.push_dead_letter(recipient_id, &payload).await?;
                    self.metrics.dead_lettered.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        recipient_hash = %recipient_hash,
                        retry_count = msg.retry_count,
                        outcome = ?outcome,
                        "message moved to dead letters"
                    );
                }
            }
        }
    }

    fn backoff_delay(&self, retry_count: u32) -> Duration {
        let factor = 2f64.powi(retry_count.min(16) as i32);
        let secs = (self.base_backoff.as_secs_f64() * factor).min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}
