//! Article generation: rewrite a press release into a news article.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Transform, TransformOutcome};
use crate::adapters::Generator;
use crate::core::error::{GenerationError, PipelineError};
use crate::domain::Item;

/// Inputs shorter than this are passed through unchanged
pub const MIN_INPUT_CHARS: usize = 50;

/// Lines longer than this are never taken as the headline
const MAX_TITLE_CHARS: usize = 200;

pub const DEFAULT_INSTRUCTION: &str = "Summarize the following press release into a news \
article with a title and article. Keep the title short and professional. If a bulleted list \
is included, keep its structure for a clean looking article. Do not use em dashes or special \
characters. Use simple hyphens (-) only.\n\nPress Release:";

/// What to do with an item when generation fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationFailurePolicy {
    /// Deliver the item with its original text
    #[default]
    DeliverRaw,
    /// Skip the item this cycle; it stays unseen and is retried next cycle,
    /// even when the source marks dropped items seen
    Drop,
}

/// Replaces an item's body (and headline, if one is produced) with generated text
pub struct ArticleTransform {
    generator: Arc<dyn Generator>,
    instruction: String,
    on_failure: GenerationFailurePolicy,
}

impl ArticleTransform {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self {
            generator,
            instruction: DEFAULT_INSTRUCTION.to_string(),
            on_failure: GenerationFailurePolicy::default(),
        }
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    pub fn on_failure(mut self, policy: GenerationFailurePolicy) -> Self {
        self.on_failure = policy;
        self
    }
}

#[async_trait]
impl Transform for ArticleTransform {
    fn name(&self) -> &str {
        "article"
    }

    async fn apply(&self, mut item: Item) -> Result<TransformOutcome, PipelineError> {
        let input = match item.payload.body.as_deref() {
            Some(body) if !item.payload.title.is_empty() => {
                format!("{}\n\n{}", item.payload.title, body)
            }
            Some(body) => body.to_string(),
            None => item.payload.title.clone(),
        };

        let len = input.chars().count();
        if len < MIN_INPUT_CHARS {
            debug!(
                source = %item.source_id,
                identity = %item.identity,
                error = %GenerationError::InputTooShort(len),
                "Skipping generation"
            );
            return Ok(TransformOutcome::Keep(item));
        }

        match self.generator.generate(&input, &self.instruction).await {
            Ok(text) => {
                let (title, body) = split_headline(&text);
                if let Some(title) = title {
                    item.payload.title = title;
                }
                item.payload.body = Some(body);
                Ok(TransformOutcome::Keep(item))
            }
            Err(e) => {
                warn!(
                    source = %item.source_id,
                    identity = %item.identity,
                    generator = self.generator.name(),
                    policy = ?self.on_failure,
                    error = %e,
                    "Article generation failed"
                );
                match self.on_failure {
                    GenerationFailurePolicy::DeliverRaw => Ok(TransformOutcome::Keep(item)),
                    GenerationFailurePolicy::Drop => Err(PipelineError::Transform {
                        transform: self.name().to_string(),
                        message: format!("generation failed: {}", e),
                    }),
                }
            }
        }
    }
}

/// Split a generated article into an optional headline and the rest
///
/// The first non-empty line counts as a headline when it is short and more
/// text follows. Markdown heading marks, bold markers and a `Title:` label
/// are stripped from it.
pub fn split_headline(text: &str) -> (Option<String>, String) {
    let text = text.trim();
    let Some((first, rest)) = text.split_once('\n') else {
        return (None, text.to_string());
    };

    let rest = rest.trim();
    let headline = first
        .trim()
        .trim_start_matches('#')
        .trim()
        .trim_matches('*')
        .trim();
    let headline = headline
        .strip_prefix("Title:")
        .or_else(|| headline.strip_prefix("TITLE:"))
        .unwrap_or(headline)
        .trim()
        .trim_matches('*')
        .trim();

    if headline.is_empty() || rest.is_empty() || headline.chars().count() > MAX_TITLE_CHARS {
        return (None, text.to_string());
    }
    (Some(headline.to_string()), rest.to_string())
}
