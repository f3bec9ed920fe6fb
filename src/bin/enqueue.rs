//! courier-enqueue — operator CLI that enqueues a single message.
//!
//! Usage: courier-enqueue <recipient_id> <text> [--proactive] [--chunked]

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use courier::config::Config;
use courier::enqueue::Enqueuer;
use courier::message::MessageKind;
use courier::store::RedisStore;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.rust_log.clone()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let Some(recipient_id) = args.next() else {
        bail!("usage: courier-enqueue <recipient_id> <text> [--proactive] [--chunked]");
    };
    let Some(text) = args.next() else {
        bail!("usage: courier-enqueue <recipient_id> <text> [--proactive] [--chunked]");
    };

    let mut kind = MessageKind::Reactive;
    let mut chunked = false;
    for flag in args {
        match flag.as_str() {
            "--proactive" => kind = MessageKind::Proactive,
            "--chunked" => chunked = true,
            other => bail!("unknown flag: {other}"),
        }
    }

    let store = RedisStore::connect(&config.queue_backend_url)
        .await
        .context("failed to connect to queue backend")?;
    let enqueuer = Enqueuer::new(Arc::new(store), config.logging.hash_salt.clone());

    if chunked {
        let parts = enqueuer
            .enqueue_chunked(&recipient_id, &text, kind, HashMap::new())
            .await?;
        println!("enqueued {parts} message(s) for delivery");
    } else {
        enqueuer
            .enqueue(&recipient_id, &text, kind, HashMap::new())
            .await?;
        println!("enqueued 1 message for delivery");
    }
    Ok(())
}
