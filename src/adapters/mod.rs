//! Interfaces to external systems.
//!
//! Three seams, each an async trait so runners can hold them as trait
//! objects and tests can substitute in-process fakes:
//! - [`SourceAdapter`]: pulls raw records from one upstream
//! - [`Sink`]: pushes a formatted item to one channel
//! - [`Generator`]: produces text from text (article generation)

pub mod discord;
pub mod json_api;
pub mod openai;
pub mod rss;
pub mod telegram;

use std::fmt;

use async_trait::async_trait;

use crate::core::error::{FetchError, GenerationError};
use crate::domain::{FormattedItem, RawItem};

pub use discord::DiscordSink;
pub use json_api::JsonApiSource;
pub use openai::OpenAiGenerator;
pub use rss::RssSource;
pub use telegram::TelegramSink;

/// Result of one fetch
#[derive(Debug, Clone, Default)]
pub struct FetchBatch {
    /// Raw records, in the order the upstream listed them
    pub items: Vec<RawItem>,

    /// Opaque cursor handed back on the next fetch
    pub cursor: Option<String>,
}

impl FetchBatch {
    pub fn new(items: Vec<RawItem>) -> Self {
        Self {
            items,
            cursor: None,
        }
    }

    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }
}

/// Pulls raw items from one upstream
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Human-readable adapter name
    fn name(&self) -> &str;

    /// Fetch the current listing. `cursor` is whatever the previous
    /// successful fetch returned, if anything.
    async fn fetch(&self, cursor: Option<&str>) -> Result<FetchBatch, FetchError>;
}

/// Outcome of a single delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
    Success,
    Failure { reason: String, retryable: bool },
}

impl DeliveryResult {
    pub fn retryable(reason: impl Into<String>) -> Self {
        Self::Failure {
            reason: reason.into(),
            retryable: true,
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Failure {
            reason: reason.into(),
            retryable: false,
        }
    }

    /// Classify an HTTP status from a chat API
    ///
    /// 429 and 5xx are retryable, any other non-success is permanent.
    pub fn from_status(status: u16, body: &str) -> Self {
        if (200..300).contains(&status) {
            return Self::Success;
        }
        let reason = format!("HTTP {}: {}", status, body.chars().take(200).collect::<String>());
        if status == 429 || status >= 500 {
            Self::retryable(reason)
        } else {
            Self::permanent(reason)
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for DeliveryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "delivered"),
            Self::Failure { reason, retryable } => {
                let class = if *retryable { "retryable" } else { "permanent" };
                write!(f, "{} failure: {}", class, reason)
            }
        }
    }
}

/// Network-level send errors: timeouts and connection failures are retryable
pub(crate) fn delivery_error(e: reqwest::Error) -> DeliveryResult {
    match e.status() {
        Some(status) => DeliveryResult::from_status(status.as_u16(), &e.to_string()),
        None if e.is_builder() => DeliveryResult::permanent(e.to_string()),
        None => DeliveryResult::retryable(e.to_string()),
    }
}

/// Pushes a formatted item to an external channel
#[async_trait]
pub trait Sink: Send + Sync {
    /// Human-readable sink name, used in logs
    fn name(&self) -> &str;

    async fn deliver(&self, item: &FormattedItem) -> DeliveryResult;
}

/// External text generation capability
#[async_trait]
pub trait Generator: Send + Sync {
    fn name(&self) -> &str;

    /// Generate text from `text`; `context` carries hints such as the source name
    async fn generate(&self, text: &str, context: &str) -> Result<String, GenerationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_status_classification() {
        assert!(DeliveryResult::from_status(204, "").is_success());
        assert_eq!(
            DeliveryResult::from_status(429, "slow down"),
            DeliveryResult::retryable("HTTP 429: slow down")
        );
        assert!(matches!(
            DeliveryResult::from_status(502, ""),
            DeliveryResult::Failure { retryable: true, .. }
        ));
        assert!(matches!(
            DeliveryResult::from_status(404, "Unknown Webhook"),
            DeliveryResult::Failure { retryable: false, .. }
        ));
    }
}
