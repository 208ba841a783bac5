//! Sink-ready rendering of an item.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::item::Item;

/// Longest description most chat embeds accept
pub const MAX_BODY_CHARS: usize = 2000;

/// An item rendered for delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormattedItem {
    pub source_id: String,
    pub identity: String,
    pub title: String,
    pub url: Option<String>,
    pub body: String,
    pub image_url: Option<String>,
    pub footer: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl FormattedItem {
    /// Render an item, truncating the body to [`MAX_BODY_CHARS`]
    pub fn from_item(item: &Item) -> Self {
        let payload = &item.payload;
        let footer = payload
            .published_at
            .map(|ts| ts.format("%B %d, %Y").to_string())
            .or_else(|| payload.published_text.clone());

        Self {
            source_id: item.source_id.clone(),
            identity: item.identity.clone(),
            title: payload.title.clone(),
            url: payload.link.clone(),
            body: truncate_chars(payload.body.as_deref().unwrap_or_default(), MAX_BODY_CHARS),
            image_url: payload.images.first().cloned(),
            footer,
            timestamp: payload.published_at,
        }
    }

    /// Plain-text rendering for text-only channels
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        if !self.title.is_empty() {
            out.push_str(&self.title);
        }
        if !self.body.is_empty() {
            if !out.is_empty() {
                out.push_str("\n\n");
            }
            out.push_str(&self.body);
        }
        if let Some(url) = &self.url {
            if !out.is_empty() {
                out.push_str("\n\n");
            }
            out.push_str(url);
        }
        out
    }
}

/// Truncate to at most `max` chars, ending in "..." when cut
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = s.chars().take(keep).collect();
    out.push_str("...");
    out
}
