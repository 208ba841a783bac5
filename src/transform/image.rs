//! Image selection and URL rewriting.

use async_trait::async_trait;

use super::{Transform, TransformOutcome};
use crate::core::error::PipelineError;
use crate::domain::Item;

/// Makes image and link references absolute and picks the display image
///
/// Scrapers and feeds often hand back `/uploads/x.jpg` or `//cdn/x.jpg`.
/// Relative references are resolved against `base_url`; the first usable
/// image becomes the one sinks show.
#[derive(Debug, Clone)]
pub struct ImageSelector {
    base_url: Option<String>,
    require_image: bool,
}

impl ImageSelector {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            base_url,
            require_image: false,
        }
    }

    /// Drop items that end up without any image
    pub fn require_image(mut self, required: bool) -> Self {
        self.require_image = required;
        self
    }

    fn resolve(&self, href: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty() || href.starts_with("data:") {
            return None;
        }
        match &self.base_url {
            Some(base) => absolutize(base, href),
            None if has_scheme(href) => Some(href.to_string()),
            None => None,
        }
    }
}

#[async_trait]
impl Transform for ImageSelector {
    fn name(&self) -> &str {
        "image"
    }

    async fn apply(&self, mut item: Item) -> Result<TransformOutcome, PipelineError> {
        let mut images: Vec<String> = item
            .payload
            .images
            .iter()
            .filter_map(|href| self.resolve(href))
            .collect();
        images.dedup();
        item.payload.images = images;

        if let (Some(base), Some(link)) = (&self.base_url, &item.payload.link) {
            if let Some(resolved) = absolutize(base, link) {
                item.payload.link = Some(resolved);
            }
        }

        if self.require_image && item.payload.images.is_empty() {
            return Ok(TransformOutcome::dropped("no image"));
        }
        Ok(TransformOutcome::Keep(item))
    }
}

fn has_scheme(href: &str) -> bool {
    href.starts_with("http://") || href.starts_with("https://")
}

/// Resolve `href` against `base` (scheme-relative, root-relative, or path-relative)
pub fn absolutize(base: &str, href: &str) -> Option<String> {
    if has_scheme(href) {
        return Some(href.to_string());
    }

    let (scheme, rest) = base.split_once("://")?;
    let host_end = rest.find('/').unwrap_or(rest.len());
    let host = &rest[..host_end];
    if host.is_empty() {
        return None;
    }

    if let Some(stripped) = href.strip_prefix("//") {
        return Some(format!("{}://{}", scheme, stripped));
    }
    if href.starts_with('/') {
        return Some(format!("{}://{}{}", scheme, host, href));
    }

    // Path-relative: resolve against the base's directory
    let path = &rest[host_end..];
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let dir = match path.rfind('/') {
        Some(i) => &path[..=i],
        None => "/",
    };
    let relative = href.strip_prefix("./").unwrap_or(href);
    Some(format!("{}://{}{}{}", scheme, host, dir, relative))
}
