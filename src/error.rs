use thiserror::Error;

pub type Result<T> = std::result::Result<T, CourierError>;

/// Error raised by queue-store operations.
///
/// Every backend failure collapses into `Unavailable`: callers never
/// branch on *why* Redis refused an operation, only on the fact that
/// the backing store is currently unusable.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("queue backend unavailable: {0}")]
    Unavailable(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Core error taxonomy.
///
/// Producers only ever observe `StorageUnavailable`; the remaining
/// variants are internal to the dispatcher and its per-recipient tasks.
#[derive(Error, Debug)]
pub enum CourierError {
    /// The backing store refused an operation. The enqueuer surfaces
    /// this to producers; the dispatcher logs it and retries on the
    /// next scan.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] StoreError),

    /// An owner-checked renew or release observed a different owner.
    /// The recipient's queue now belongs to another worker; the current
    /// per-recipient task must terminate without touching the queue.
    #[error("lease for recipient {recipient} lost by worker {owner}")]
    LeaseLost { recipient: String, owner: String },

    /// A payload read from the queue failed to deserialize. Treated as
    /// a permanent failure without a send attempt: the raw payload is
    /// routed to the recipient's dead-letter queue.
    #[error("malformed queue payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    /// Producer handed the enqueuer an invalid message.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl CourierError {
    pub fn invalid_message(msg: impl Into<String>) -> Self {
        CourierError::InvalidMessage(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        CourierError::Config(msg.into())
    }

    pub fn lease_lost(recipient: impl Into<String>, owner: impl Into<String>) -> Self {
        CourierError::LeaseLost {
            recipient: recipient.into(),
            owner: owner.into(),
        }
    }
}
