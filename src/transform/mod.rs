//! Per-item transforms: filtering, enrichment, formatting.
//!
//! Transforms run in configured order. The first one to drop an item stops
//! the chain; an error aborts only that item.

pub mod article;
pub mod image;
pub mod keyword;

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::error::PipelineError;
use crate::domain::Item;

pub use article::{ArticleTransform, GenerationFailurePolicy};
pub use image::ImageSelector;
pub use keyword::KeywordFilter;

/// Result of applying a transform
#[derive(Debug, Clone, PartialEq)]
pub enum TransformOutcome {
    Keep(Item),
    Dropped { reason: String },
}

impl TransformOutcome {
    pub fn dropped(reason: impl Into<String>) -> Self {
        Self::Dropped {
            reason: reason.into(),
        }
    }
}

/// One step of a transform pipeline
#[async_trait]
pub trait Transform: Send + Sync {
    fn name(&self) -> &str;

    async fn apply(&self, item: Item) -> Result<TransformOutcome, PipelineError>;
}

/// Ordered transforms for one source
#[derive(Clone, Default)]
pub struct TransformPipeline {
    transforms: Vec<Arc<dyn Transform>>,
}

impl std::fmt::Debug for TransformPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.transforms.iter().map(|t| t.name().to_string()))
            .finish()
    }
}

impl TransformPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, transform: Arc<dyn Transform>) {
        self.transforms.push(transform);
    }

    pub fn with(mut self, transform: Arc<dyn Transform>) -> Self {
        self.push(transform);
        self
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Run every transform in order
    pub async fn apply(&self, item: Item) -> Result<TransformOutcome, PipelineError> {
        let mut current = item;
        for transform in &self.transforms {
            match transform.apply(current).await? {
                TransformOutcome::Keep(next) => current = next,
                TransformOutcome::Dropped { reason } => {
                    return Ok(TransformOutcome::dropped(format!(
                        "{}: {}",
                        transform.name(),
                        reason
                    )))
                }
            }
        }
        Ok(TransformOutcome::Keep(current))
    }
}
