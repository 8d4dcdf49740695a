//! Messaging relays for admin notifications.
//!
//! Each configured channel is an independent best-effort delivery; an
//! unconfigured channel simply never exists as a relay.

use crate::EffectError;
use async_trait::async_trait;

/// One configured messaging channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Channel name for log lines.
    fn channel(&self) -> &'static str;
    async fn send(&self, message: &str) -> Result<(), EffectError>;
}

/// Slack incoming-webhook relay.
pub struct SlackWebhook {
    http: reqwest::Client,
    webhook_url: String,
}

impl SlackWebhook {
    pub fn new(http: reqwest::Client, webhook_url: String) -> Self {
        Self { http, webhook_url }
    }
}

#[async_trait]
impl Notifier for SlackWebhook {
    fn channel(&self) -> &'static str {
        "slack"
    }

    async fn send(&self, message: &str) -> Result<(), EffectError> {
        let response = self
            .http
            .post(&self.webhook_url)
            .json(&serde_json::json!({ "text": message }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(EffectError::Api {
                service: "slack",
                status: response.status(),
            });
        }
        Ok(())
    }
}

/// Telegram bot relay (`sendMessage` to a fixed chat).
pub struct TelegramBot {
    http: reqwest::Client,
    api_token: String,
    chat_id: String,
}

impl TelegramBot {
    pub fn new(http: reqwest::Client, api_token: String, chat_id: String) -> Self {
        Self { http, api_token, chat_id }
    }
}

#[async_trait]
impl Notifier for TelegramBot {
    fn channel(&self) -> &'static str {
        "telegram"
    }

    async fn send(&self, message: &str) -> Result<(), EffectError> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.api_token);
        let response = self
            .http
            .post(url)
            .json(&serde_json::json!({ "chat_id": self.chat_id, "text": message }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(EffectError::Api {
                service: "telegram",
                status: response.status(),
            });
        }
        Ok(())
    }
}
