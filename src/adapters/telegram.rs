//! Telegram Bot API sink.
//!
//! Items with an image go out as `sendPhoto` with a caption, everything
//! else as `sendMessage`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{delivery_error, DeliveryResult, Sink};
use crate::domain::formatted::truncate_chars;
use crate::domain::FormattedItem;

/// Telegram caps photo captions at 1024 chars and messages at 4096
const MAX_CAPTION_CHARS: usize = 1024;
const MAX_MESSAGE_CHARS: usize = 4096;

/// Response from Telegram API
#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    description: Option<String>,
    error_code: Option<u16>,
}

/// Telegram Bot API sink
pub struct TelegramSink {
    name: String,
    /// Bot token
    bot_token: String,
    /// Target chat ID
    chat_id: String,
    api_base: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl TelegramSink {
    pub fn new(
        name: impl Into<String>,
        bot_token: impl Into<String>,
        chat_id: impl Into<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            name: name.into(),
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
            api_base: "https://api.telegram.org".to_string(),
            timeout: Duration::from_secs(10),
            client,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Point at a Bot API server other than api.telegram.org
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    /// Build API URL
    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }

    fn request(&self, item: &FormattedItem) -> (String, serde_json::Value) {
        let text = item.to_text();
        match &item.image_url {
            Some(photo) => (
                self.api_url("sendPhoto"),
                serde_json::json!({
                    "chat_id": self.chat_id,
                    "photo": photo,
                    "caption": truncate_chars(&text, MAX_CAPTION_CHARS),
                }),
            ),
            None => (
                self.api_url("sendMessage"),
                serde_json::json!({
                    "chat_id": self.chat_id,
                    "text": truncate_chars(&text, MAX_MESSAGE_CHARS),
                }),
            ),
        }
    }
}

#[async_trait]
impl Sink for TelegramSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, item: &FormattedItem) -> DeliveryResult {
        let (url, body) = self.request(item);

        let response = match self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
        {
            Ok(rsp) => rsp,
            // URL carries the bot token
            Err(e) => return delivery_error(e.without_url()),
        };

        let status = response.status().as_u16();
        match response.json::<TelegramResponse>().await {
            Ok(result) if result.ok => DeliveryResult::Success,
            Ok(result) => DeliveryResult::from_status(
                result.error_code.unwrap_or(status),
                &format!(
                    "Telegram API error: {}",
                    result.description.unwrap_or_default()
                ),
            ),
            Err(_) => DeliveryResult::from_status(status, "unparseable Telegram response"),
        }
    }
}
