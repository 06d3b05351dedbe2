// src/services/telegram.rs

//! Telegram Bot API notifier sink.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::error::{AppError, Result};
use crate::services::NotifierSink;

/// Envelope returned by every Bot API method.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Sends messages through a Telegram bot.
pub struct TelegramSink {
    client: Client,
    api_base: String,
    bot_token: String,
}

impl TelegramSink {
    pub fn new(client: Client, api_base: impl Into<String>, bot_token: impl Into<String>) -> Self {
        Self {
            client,
            api_base: api_base.into(),
            bot_token: bot_token.into(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.api_base.trim_end_matches('/'),
            self.bot_token,
            method
        )
    }

    async fn call(&self, method: &str, body: serde_json::Value) -> Result<()> {
        let response = self
            .client
            .post(self.method_url(method))
            .json(&body)
            .send()
            .await
            // The request URL embeds the bot token.
            .map_err(|e| {
                AppError::notification(format!("{method} request failed: {}", e.without_url()))
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let parsed: Option<ApiResponse> = serde_json::from_str(&text).ok();

        match parsed {
            Some(api) if status.is_success() && api.ok => Ok(()),
            Some(api) => Err(AppError::notification(format!(
                "{method} rejected ({status}): {}",
                api.description.unwrap_or_default()
            ))),
            None => Err(AppError::notification(format!(
                "{method} returned {status}: {text}"
            ))),
        }
    }
}

#[async_trait]
impl NotifierSink for TelegramSink {
    async fn send_text(&self, message: &str, destination: &str) -> Result<()> {
        self.call(
            "sendMessage",
            json!({
                "chat_id": destination,
                "text": message,
                "parse_mode": "HTML"
            }),
        )
        .await
    }

    async fn send_photo(&self, photo_url: &str, caption: &str, destination: &str) -> Result<()> {
        self.call(
            "sendPhoto",
            json!({
                "chat_id": destination,
                "photo": photo_url,
                "caption": caption,
                "parse_mode": "HTML"
            }),
        )
        .await
    }
}
