//! Telegram Bot API transport.
//!
//! Talks to `{api_base}/bot{token}/sendMessage` and
//! `{api_base}/bot{token}/sendChatAction`. Status mapping:
//! 429 and 5xx are transient (retry later), other 4xx are permanent
//! (bad chat id, bot blocked, content rejected), connection-level
//! errors are transient.

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use super::{SendError, Transport};
use crate::config::TelegramConfig;
use crate::error::CourierError;

#[derive(Serialize)]
struct SendMessageBody<'a> {
    chat_id: &'a str,
    text: &'a str,
}

#[derive(Serialize)]
struct ChatActionBody<'a> {
    chat_id: &'a str,
    action: &'a str,
}

pub struct TelegramTransport {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
}

impl TelegramTransport {
    pub fn new(config: &TelegramConfig) -> Result<Self, CourierError> {
        let bot_token = config
            .bot_token
            .clone()
            .ok_or_else(|| CourierError::config("BOT_TOKEN must be set for the worker"))?;
        Ok(Self {
            http: reqwest::Client::new(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            bot_token,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }

    async fn call<B: Serialize>(&self, method: &str, body: &B) -> Result<(), SendError> {
        let response = self
            .http
            .post(self.method_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| SendError::Transient(format!("{method}: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let detail = response.text().await.unwrap_or_default();
        if status.as_u16() == 429 || status.is_server_error() {
            Err(SendError::Transient(format!("{method}: {status} {detail}")))
        } else {
            Err(SendError::Permanent(format!("{method}: {status} {detail}")))
        }
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send(&self, recipient_id: &str, text: &str) -> Result<(), SendError> {
        self.call(
            "sendMessage",
            &SendMessageBody {
                chat_id: recipient_id,
                text,
            },
        )
        .await
    }

    async fn typing(&self, recipient_id: &str) -> Result<(), SendError> {
        debug!(method = "sendChatAction", "emitting typing action");
        self.call(
            "sendChatAction",
            &ChatActionBody {
                chat_id: recipient_id,
                action: "typing",
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_urls_embed_token_and_trim_base() {
        let transport = TelegramTransport::new(&TelegramConfig {
            bot_token: Some("123:abc".to_string()),
            api_base: "https://api.telegram.org/".to_string(),
        })
        .unwrap();

        assert_eq!(
            transport.method_url("sendMessage"),
            "https://api.telegram.org/bot123:abc/sendMessage"
        );
    }

    #[test]
    fn construction_requires_a_token() {
        let err = TelegramTransport::new(&TelegramConfig {
            bot_token: None,
            api_base: "https://api.telegram.org".to_string(),
        });
        assert!(err.is_err());
    }
}
