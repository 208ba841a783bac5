//! Discord webhook sink.
//!
//! Posts one embed per item. Retrying is left to the dispatcher; this sink
//! only classifies each attempt.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::{delivery_error, DeliveryResult, Sink};
use crate::domain::formatted::truncate_chars;
use crate::domain::FormattedItem;

/// Discord caps embed titles at 256 chars
const MAX_TITLE_CHARS: usize = 256;

/// Embed accent color used when none is configured
pub const DEFAULT_COLOR: u32 = 0x3498db;

#[derive(Debug, Serialize)]
struct WebhookPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    avatar_url: Option<String>,
    embeds: Vec<Embed>,
}

#[derive(Debug, Serialize)]
struct Embed {
    title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    description: String,
    color: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<EmbedImage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbedImage {
    url: String,
}

#[derive(Debug, Serialize)]
struct EmbedFooter {
    text: String,
}

/// Sends items to a Discord channel webhook
#[derive(Clone)]
pub struct DiscordSink {
    name: String,
    webhook: String,
    username: Option<String>,
    avatar_url: Option<String>,
    color: u32,
    timeout: Duration,
    client: reqwest::Client,
}

impl DiscordSink {
    pub fn new(name: impl Into<String>, webhook: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            name: name.into(),
            webhook: webhook.into(),
            username: None,
            avatar_url: None,
            color: DEFAULT_COLOR,
            timeout: Duration::from_secs(10),
            client,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_avatar(mut self, url: impl Into<String>) -> Self {
        self.avatar_url = Some(url.into());
        self
    }

    pub fn with_color(mut self, color: u32) -> Self {
        self.color = color;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn payload(&self, item: &FormattedItem) -> WebhookPayload {
        let title = if item.title.is_empty() {
            item.source_id.clone()
        } else {
            truncate_chars(&item.title, MAX_TITLE_CHARS)
        };

        WebhookPayload {
            username: self.username.clone(),
            avatar_url: self.avatar_url.clone(),
            embeds: vec![Embed {
                title,
                url: item.url.clone(),
                description: item.body.clone(),
                color: self.color,
                image: item.image_url.clone().map(|url| EmbedImage { url }),
                footer: item.footer.clone().map(|text| EmbedFooter { text }),
                timestamp: item.timestamp.map(|ts| ts.to_rfc3339()),
            }],
        }
    }
}

#[async_trait]
impl Sink for DiscordSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, item: &FormattedItem) -> DeliveryResult {
        let payload = self.payload(item);

        let response = match self
            .client
            .post(&self.webhook)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
        {
            Ok(rsp) => rsp,
            Err(e) => return delivery_error(e.without_url()),
        };

        let status = response.status().as_u16();
        if response.status().is_success() {
            return DeliveryResult::Success;
        }
        let body = response.text().await.unwrap_or_default();
        DeliveryResult::from_status(status, &body)
    }
}
