//! Shared harness for the integration tests: an in-memory store, a
//! recording transport with scriptable failures, and a configuration
//! tuned so the human-paced delays shrink to milliseconds.

// Each integration test binary compiles its own copy of this module
// and uses a different subset of it.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use courier::config::{Config, LoggingConfig, TelegramConfig, TimingConfig};
use courier::transport::{SendError, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scripted {
    Transient,
    Permanent,
}

#[derive(Debug, Clone)]
pub enum TransportEvent {
    Typing {
        recipient: String,
        at: Instant,
    },
    Send {
        recipient: String,
        text: String,
        at: Instant,
    },
}

/// Transport double that records every call and can be scripted to
/// fail specific message texts a given number of times.
#[derive(Default)]
pub struct MockTransport {
    events: Mutex<Vec<TransportEvent>>,
    scripted: Mutex<HashMap<String, VecDeque<Scripted>>>,
    attempts: Mutex<HashMap<String, u32>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue failures for a message text; once drained, sends succeed.
    pub fn script_failures(&self, text: &str, failures: &[Scripted]) {
        self.scripted
            .lock()
            .unwrap()
            .entry(text.to_string())
            .or_default()
            .extend(failures.iter().copied());
    }

    /// Successful sends, in wall-clock order, as (recipient, text).
    pub fn sends(&self) -> Vec<(String, String)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                TransportEvent::Send {
                    recipient, text, ..
                } => Some((recipient.clone(), text.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn send_instants(&self) -> Vec<Instant> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                TransportEvent::Send { at, .. } => Some(*at),
                _ => None,
            })
            .collect()
    }

    pub fn typing_events(&self) -> Vec<(String, Instant)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                TransportEvent::Typing { recipient, at } => Some((recipient.clone(), *at)),
                _ => None,
            })
            .collect()
    }

    /// Total send attempts for a text, failed ones included.
    pub fn attempts(&self, text: &str) -> u32 {
        self.attempts.lock().unwrap().get(text).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, recipient_id: &str, text: &str) -> Result<(), SendError> {
        *self
            .attempts
            .lock()
            .unwrap()
            .entry(text.to_string())
            .or_insert(0) += 1;

        let scripted = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(text)
            .and_then(|queue| queue.pop_front());
        match scripted {
            Some(Scripted::Transient) => {
                return Err(SendError::Transient("scripted transient".into()))
            }
            Some(Scripted::Permanent) => {
                return Err(SendError::Permanent("scripted permanent".into()))
            }
            None => {}
        }

        self.events.lock().unwrap().push(TransportEvent::Send {
            recipient: recipient_id.to_string(),
            text: text.to_string(),
            at: Instant::now(),
        });
        Ok(())
    }

    async fn typing(&self, recipient_id: &str) -> Result<(), SendError> {
        self.events.lock().unwrap().push(TransportEvent::Typing {
            recipient: recipient_id.to_string(),
            at: Instant::now(),
        });
        Ok(())
    }
}

/// Configuration with delays collapsed to near-zero: delivery order and
/// state transitions stay observable while tests finish in tens of
/// milliseconds.
pub fn fast_config() -> Config {
    Config {
        queue_backend_url: "redis://unused-in-tests".to_string(),
        max_retries: 3,
        lease_ttl: Duration::from_secs(10),
        scan_interval: Duration::from_millis(10),
        transport_timeout: Duration::from_secs(1),
        base_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(8),
        timing: TimingConfig {
            min_typing_speed: 1_000_000.0,
            max_typing_speed: 1_000_000.0,
            random_offset_min: 0.0,
            random_offset_max: 0.0,
            max_delay: 0.05,
            typing_interval: 3.0,
            typing_pulse_threshold: 0.5,
        },
        logging: LoggingConfig {
            hash_salt: "test-salt".to_string(),
        },
        telegram: TelegramConfig {
            bot_token: None,
            api_base: "https://api.telegram.org".to_string(),
        },
        rust_log: "info".to_string(),
    }
}

/// Poll until `predicate` holds or `timeout` elapses; panics on timeout.
pub async fn wait_until<F: Fn() -> bool>(timeout: Duration, what: &str, predicate: F) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for: {what}");
}
