//! Location/keyword content filter.

use async_trait::async_trait;
use tracing::debug;

use super::{Transform, TransformOutcome};
use crate::core::error::PipelineError;
use crate::domain::Item;

/// Keeps items that mention a keyword or carry a matching tag
///
/// Keywords are matched case-insensitively as substrings of title and body.
/// Tags are matched case-insensitively as substrings of the item's tags.
/// An item passes if either list matches; with both lists empty every item
/// passes.
#[derive(Debug, Clone, Default)]
pub struct KeywordFilter {
    keywords: Vec<String>,
    tags: Vec<String>,
}

impl KeywordFilter {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: lowered(keywords),
            tags: Vec::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags = lowered(tags);
        self
    }

    pub fn matches(&self, item: &Item) -> bool {
        if self.keywords.is_empty() && self.tags.is_empty() {
            return true;
        }

        let payload = &item.payload;
        let content = format!(
            "{} {}",
            payload.title,
            payload.body.as_deref().unwrap_or_default()
        )
        .to_lowercase();

        let keyword_hit = self.keywords.iter().any(|k| content.contains(k.as_str()));
        let tag_hit = payload.tags.iter().any(|tag| {
            let tag = tag.to_lowercase();
            self.tags.iter().any(|t| tag.contains(t.as_str()))
        });

        keyword_hit || tag_hit
    }
}

fn lowered<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    values
        .into_iter()
        .map(|v| v.as_ref().trim().to_lowercase())
        .filter(|v| !v.is_empty())
        .collect()
}

#[async_trait]
impl Transform for KeywordFilter {
    fn name(&self) -> &str {
        "keyword_filter"
    }

    async fn apply(&self, item: Item) -> Result<TransformOutcome, PipelineError> {
        if self.matches(&item) {
            Ok(TransformOutcome::Keep(item))
        } else {
            debug!(source = %item.source_id, identity = %item.identity, "No keyword match");
            Ok(TransformOutcome::dropped("no keyword or tag match"))
        }
    }
}
