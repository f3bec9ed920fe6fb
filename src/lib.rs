//! courier — the per-recipient serialized delivery core of a
//! conversational chat service.
//!
//! Producers hand outbound messages to the [`enqueue::Enqueuer`];
//! worker processes run the [`dispatch::Dispatcher`], which claims a
//! per-recipient lease, drains the recipient's durable queue in FIFO
//! order and paces each send with a human-like typing delay.
//!
//! Guarantees, in one breath: per-recipient FIFO for successful sends,
//! at most one concurrent send per recipient across the whole worker
//! fleet, at-least-once delivery (peek, send, pop), retries with
//! exponential backoff, and dead-lettering once retries are exhausted.

pub mod config;
pub mod delivery;
pub mod dispatch;
pub mod enqueue;
pub mod error;
pub mod lease;
pub mod message;
pub mod store;
pub mod transport;
pub mod utils;

pub use config::Config;
pub use delivery::{Deliverer, DeliveryOutcome};
pub use dispatch::Dispatcher;
pub use enqueue::Enqueuer;
pub use error::{CourierError, Result, StoreError};
pub use message::{MessageKind, QueuedMessage};
pub use store::{MemoryStore, QueueStore, RedisStore};
pub use transport::{SendError, Transport};
