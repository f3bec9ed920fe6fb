//! Single-message delivery: human-paced delay, typing pulses, the
//! transport send, and failure classification.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::TimingConfig;
use crate::message::QueuedMessage;
use crate::transport::{SendError, Transport};
use crate::utils::log_safe_id;

/// Terminal classification of one delivery attempt. Everything that
/// happens inside delivery collapses into these three outcomes; the
/// dispatcher never sees transport internals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Success,
    TransientFail,
    PermanentFail,
}

/// Draw the inter-message delay for a body of `text_chars` characters:
/// `min(len / speed + offset, max_delay)` with speed and offset drawn
/// uniformly from the configured bounds.
pub fn compute_delay<R: Rng>(text_chars: usize, timing: &TimingConfig, rng: &mut R) -> Duration {
    let speed = if timing.max_typing_speed > timing.min_typing_speed {
        rng.gen_range(timing.min_typing_speed..=timing.max_typing_speed)
    } else {
        timing.min_typing_speed
    };
    let offset = if timing.random_offset_max > timing.random_offset_min {
        rng.gen_range(timing.random_offset_min..=timing.random_offset_max)
    } else {
        timing.random_offset_min
    };
    let delay = (text_chars as f64 / speed + offset).min(timing.max_delay);
    Duration::from_secs_f64(delay.max(0.0))
}

pub struct Deliverer {
    transport: Arc<dyn Transport>,
    timing: TimingConfig,
    transport_timeout: Duration,
    log_salt: String,
}

impl Deliverer {
    pub fn new(
        transport: Arc<dyn Transport>,
        timing: TimingConfig,
        transport_timeout: Duration,
        log_salt: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            timing,
            transport_timeout,
            log_salt: log_salt.into(),
        }
    }

    /// Deliver one message. The first message of a per-recipient
    /// session skips the delay; every later one is paced.
    pub async fn deliver(&self, msg: &QueuedMessage, first_in_session: bool) -> DeliveryOutcome {
        let delay = if first_in_session {
            Duration::ZERO
        } else {
            let chars = msg.text.chars().count();
            compute_delay(chars, &self.timing, &mut rand::thread_rng())
        };

        self.pace(&msg.recipient_id, delay).await;

        let send = self.transport.send(&msg.recipient_id, &msg.text);
        match tokio::time::timeout(self.transport_timeout, send).await {
            Ok(Ok(())) => DeliveryOutcome::Success,
            Ok(Err(SendError::Transient(reason))) => {
                warn!(
                    recipient_hash = %log_safe_id(&msg.recipient_id, &self.log_salt),
                    retry_count = msg.retry_count,
                    reason = %reason,
                    "transient transport failure"
                );
                DeliveryOutcome::TransientFail
            }
            Ok(Err(SendError::Permanent(reason))) => {
                warn!(
                    recipient_hash = %log_safe_id(&msg.recipient_id, &self.log_salt),
                    reason = %reason,
                    "permanent transport failure"
                );
                DeliveryOutcome::PermanentFail
            }
            Err(_elapsed) => {
                warn!(
                    recipient_hash = %log_safe_id(&msg.recipient_id, &self.log_salt),
                    timeout_secs = self.transport_timeout.as_secs_f64(),
                    "transport send timed out"
                );
                DeliveryOutcome::TransientFail
            }
        }
    }

    /// Wait out `delay`, masking it with typing pulses when it is long
    /// enough to be visible: one pulse immediately, then one every
    /// `typing_interval` until the delay elapses. Pulse failures never
    /// abort delivery.
    async fn pace(&self, recipient_id: &str, delay: Duration) {
        if delay.is_zero() {
            return;
        }
        if delay.as_secs_f64() <= self.timing.typing_pulse_threshold {
            tokio::time::sleep(delay).await;
            return;
        }

        let interval = Duration::from_secs_f64(self.timing.typing_interval.max(0.001));
        let deadline = Instant::now() + delay;
        loop {
            if let Err(e) = self
                .transport
                .typing(recipient_id)
                .await
            {
                debug!(
                    recipient_hash = %log_safe_id(recipient_id, &self.log_salt),
                    error = %e,
                    "typing pulse failed (ignored)"
                );
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(interval.min(deadline - now)).await;
            if Instant::now() >= deadline {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::message::MessageKind;

    #[test]
    fn delay_stays_within_bounds() {
        let timing = TimingConfig::default();
        let mut rng = StdRng::seed_from_u64(7);

        for len in [1usize, 40, 500, 10_000] {
            let delay = compute_delay(len, &timing, &mut rng).as_secs_f64();
            let floor = (len as f64 / timing.max_typing_speed + timing.random_offset_min)
                .min(timing.max_delay);
            assert!(delay >= floor - 1e-9, "len={len}: {delay} < {floor}");
            assert!(delay <= timing.max_delay + 1e-9, "len={len}: {delay}");
        }
    }

    #[test]
    fn long_text_is_capped_at_max_delay() {
        let timing = TimingConfig::default();
        let mut rng = StdRng::seed_from_u64(7);
        let delay = compute_delay(100_000, &timing, &mut rng);
        assert_eq!(delay.as_secs_f64(), timing.max_delay);
    }

    #[test]
    fn degenerate_bounds_are_deterministic() {
        let timing = TimingConfig {
            min_typing_speed: 20.0,
            max_typing_speed: 20.0,
            random_offset_min: 0.5,
            random_offset_max: 0.5,
            max_delay: 60.0,
            ..TimingConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(1);
        let delay = compute_delay(100, &timing, &mut rng).as_secs_f64();
        assert!((delay - 5.5).abs() < 1e-9);
    }

    /// Transport that fails sends a scripted number of times, and
    /// counts everything.
    struct FlakyTransport {
        send_failures: Mutex<u32>,
        permanent: bool,
        sends: Mutex<Vec<String>>,
        typings: Mutex<u32>,
    }

    impl FlakyTransport {
        fn failing(times: u32, permanent: bool) -> Self {
            Self {
                send_failures: Mutex::new(times),
                permanent,
                sends: Mutex::new(Vec::new()),
                typings: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        async fn send(&self, _recipient_id: &str, text: &str) -> Result<(), SendError> {
            let mut left = self.send_failures.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return if self.permanent {
                    Err(SendError::Permanent("rejected".into()))
                } else {
                    Err(SendError::Transient("rate limited".into()))
                };
            }
            self.sends.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn typing(&self, _recipient_id: &str) -> Result<(), SendError> {
            *self.typings.lock().unwrap() += 1;
            // Pulse failures must be ignored by the deliverer.
            Err(SendError::Transient("typing endpoint down".into()))
        }
    }

    fn instant_timing() -> TimingConfig {
        TimingConfig {
            min_typing_speed: 1e6,
            max_typing_speed: 1e6,
            random_offset_min: 0.0,
            random_offset_max: 0.0,
            max_delay: 0.01,
            typing_interval: 0.005,
            typing_pulse_threshold: 0.5,
        }
    }

    fn msg(text: &str) -> QueuedMessage {
        QueuedMessage::new("r1", text, MessageKind::Reactive, HashMap::new())
    }

    #[tokio::test]
    async fn outcome_classification() {
        let timing = instant_timing();

        let ok = Arc::new(FlakyTransport::failing(0, false));
        let deliverer = Deliverer::new(ok.clone(), timing.clone(), Duration::from_secs(1), "s");
        assert_eq!(
            deliverer.deliver(&msg("hi"), true).await,
            DeliveryOutcome::Success
        );
        assert_eq!(ok.sends.lock().unwrap().as_slice(), ["hi"]);

        let transient = Arc::new(FlakyTransport::failing(1, false));
        let deliverer =
            Deliverer::new(transient, timing.clone(), Duration::from_secs(1), "s");
        assert_eq!(
            deliverer.deliver(&msg("hi"), true).await,
            DeliveryOutcome::TransientFail
        );

        let permanent = Arc::new(FlakyTransport::failing(1, true));
        let deliverer = Deliverer::new(permanent, timing, Duration::from_secs(1), "s");
        assert_eq!(
            deliverer.deliver(&msg("hi"), true).await,
            DeliveryOutcome::PermanentFail
        );
    }

    #[tokio::test]
    async fn typing_pulse_failures_do_not_abort_delivery() {
        // Delay above the threshold so pulses are emitted; the typing
        // endpoint always errors, the send must still go through.
        let timing = TimingConfig {
            min_typing_speed: 100.0,
            max_typing_speed: 100.0,
            random_offset_min: 0.0,
            random_offset_max: 0.0,
            max_delay: 0.2,
            typing_interval: 0.05,
            typing_pulse_threshold: 0.01,
        };
        let transport = Arc::new(FlakyTransport::failing(0, false));
        let deliverer =
            Deliverer::new(transport.clone(), timing, Duration::from_secs(1), "s");

        let outcome = deliverer.deliver(&msg("twenty chars of text"), false).await;
        assert_eq!(outcome, DeliveryOutcome::Success);
        assert!(*transport.typings.lock().unwrap() >= 1);
    }

    /// Transport whose send never resolves; delivery must classify the
    /// timeout as transient.
    struct StuckTransport;

    #[async_trait]
    impl Transport for StuckTransport {
        async fn send(&self, _r: &str, _t: &str) -> Result<(), SendError> {
            std::future::pending().await
        }
        async fn typing(&self, _r: &str) -> Result<(), SendError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn send_timeout_is_transient() {
        let deliverer = Deliverer::new(
            Arc::new(StuckTransport),
            instant_timing(),
            Duration::from_millis(20),
            "s",
        );
        assert_eq!(
            deliverer.deliver(&msg("hi"), true).await,
            DeliveryOutcome::TransientFail
        );
    }
}
