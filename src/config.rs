use std::time::Duration;

use crate::error::{CourierError, Result};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_LEASE_TTL_SECONDS: u64 = 30;
pub const DEFAULT_SCAN_INTERVAL_SECONDS: f64 = 0.1;
pub const DEFAULT_TRANSPORT_TIMEOUT_SECONDS: f64 = 10.0;
pub const DEFAULT_BASE_BACKOFF_SECONDS: f64 = 1.0;
pub const DEFAULT_MAX_BACKOFF_SECONDS: f64 = 30.0;

/// Parameters of the human-paced delay applied between messages.
#[derive(Clone, Debug)]
pub struct TimingConfig {
    /// Lower bound of the sampled typing speed, characters per second.
    pub min_typing_speed: f64,
    /// Upper bound of the sampled typing speed, characters per second.
    pub max_typing_speed: f64,
    /// Bounds of the extra random offset, seconds.
    pub random_offset_min: f64,
    pub random_offset_max: f64,
    /// Hard ceiling on a single inter-message delay, seconds.
    pub max_delay: f64,
    /// Period of typing pulses while a delay elapses, seconds.
    pub typing_interval: f64,
    /// Minimum delay for which any typing pulse is emitted, seconds.
    pub typing_pulse_threshold: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            min_typing_speed: 10.0,
            max_typing_speed: 30.0,
            random_offset_min: 0.1,
            random_offset_max: 0.5,
            max_delay: 5.0,
            typing_interval: 3.0,
            typing_pulse_threshold: 0.7,
        }
    }
}

impl TimingConfig {
    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            min_typing_speed: env_parse("MIN_TYPING_SPEED", defaults.min_typing_speed),
            max_typing_speed: env_parse("MAX_TYPING_SPEED", defaults.max_typing_speed),
            random_offset_min: env_parse("RANDOM_OFFSET_MIN", defaults.random_offset_min),
            random_offset_max: env_parse("RANDOM_OFFSET_MAX", defaults.random_offset_max),
            max_delay: env_parse("MAX_DELAY", defaults.max_delay),
            typing_interval: env_parse("TYPING_INTERVAL", defaults.typing_interval),
            typing_pulse_threshold: env_parse(
                "TYPING_PULSE_THRESHOLD",
                defaults.typing_pulse_threshold,
            ),
        }
    }
}

/// Logging configuration. Recipient identifiers are only logged as
/// salted truncated hashes (see [`crate::utils::log_safe_id`]).
#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub hash_salt: String,
}

impl LoggingConfig {
    fn from_env() -> Self {
        Self {
            hash_salt: std::env::var("LOG_HASH_SALT").unwrap_or_else(|_| "courier".to_string()),
        }
    }
}

/// Settings for the bundled Telegram-style chat transport.
///
/// `bot_token` is optional at load time: processes that never talk to
/// the transport (the enqueue CLI) run without one.
#[derive(Clone, Debug)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    pub api_base: String,
}

impl TelegramConfig {
    fn from_env() -> Self {
        Self {
            bot_token: std::env::var("BOT_TOKEN").ok().filter(|t| !t.is_empty()),
            api_base: std::env::var("TELEGRAM_API_BASE")
                .unwrap_or_else(|_| "https://api.telegram.org".to_string()),
        }
    }
}

/// Process-wide configuration, read once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    /// Location of the key-value store backing the queues.
    pub queue_backend_url: String,

    /// Retry attempts before a message is dead-lettered.
    pub max_retries: u32,

    /// Lease expiration. Must strictly exceed the worst-case
    /// single-message delivery time (max delay + transport timeout);
    /// the dispatcher also renews before every delivery and across any
    /// wait longer than half of this value.
    pub lease_ttl: Duration,

    /// Supervisor poll period over the active-recipient set.
    pub scan_interval: Duration,

    /// Upper bound on a single transport send.
    pub transport_timeout: Duration,

    /// Exponential backoff after a transient delivery failure:
    /// min(base * 2^(retry_count - 1), max).
    pub base_backoff: Duration,
    pub max_backoff: Duration,

    pub timing: TimingConfig,
    pub logging: LoggingConfig,
    pub telegram: TelegramConfig,
    pub rust_log: String,
}

impl Config {
    /// Load configuration from environment variables, reading a
    /// `.env` file first when present.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let queue_backend_url = std::env::var("QUEUE_BACKEND_URL")
            .map_err(|_| CourierError::config("QUEUE_BACKEND_URL must be set"))?;

        let config = Self {
            queue_backend_url,
            max_retries: env_parse("MAX_RETRIES", DEFAULT_MAX_RETRIES),
            lease_ttl: Duration::from_secs(env_parse(
                "LEASE_TTL_SECONDS",
                DEFAULT_LEASE_TTL_SECONDS,
            )),
            scan_interval: Duration::from_secs_f64(env_parse(
                "DISPATCHER_SCAN_INTERVAL",
                DEFAULT_SCAN_INTERVAL_SECONDS,
            )),
            transport_timeout: Duration::from_secs_f64(env_parse(
                "TRANSPORT_TIMEOUT",
                DEFAULT_TRANSPORT_TIMEOUT_SECONDS,
            )),
            base_backoff: Duration::from_secs_f64(env_parse(
                "BASE_BACKOFF_SECONDS",
                DEFAULT_BASE_BACKOFF_SECONDS,
            )),
            max_backoff: Duration::from_secs_f64(env_parse(
                "MAX_BACKOFF_SECONDS",
                DEFAULT_MAX_BACKOFF_SECONDS,
            )),
            timing: TimingConfig::from_env(),
            logging: LoggingConfig::from_env(),
            telegram: TelegramConfig::from_env(),
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.timing.min_typing_speed <= 0.0
            || self.timing.max_typing_speed < self.timing.min_typing_speed
        {
            return Err(CourierError::config(
                "typing speed bounds must satisfy 0 < MIN_TYPING_SPEED <= MAX_TYPING_SPEED",
            ));
        }
        if self.timing.random_offset_max < self.timing.random_offset_min {
            return Err(CourierError::config(
                "RANDOM_OFFSET_MAX must be >= RANDOM_OFFSET_MIN",
            ));
        }
        if self.lease_ttl.as_secs_f64() <= self.timing.max_delay {
            return Err(CourierError::config(
                "LEASE_TTL_SECONDS must exceed MAX_DELAY",
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
