//! Error taxonomy for the change-detection pipeline.
//!
//! Per-item errors (`MalformedItem`, `Transform`, `Delivery`) are isolated to
//! the item that raised them. Per-cycle errors (`Fetch`) abort one cycle and
//! put the source into backoff. `StoreUnavailable` is fatal.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pipeline errors, one variant per failure class
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("Malformed item from '{source_id}': {reason}")]
    MalformedItem { source_id: String, reason: String },

    #[error("Fetch failed for '{source_id}' ({kind}): {message}")]
    Fetch {
        source_id: String,
        kind: FetchErrorKind,
        message: String,
    },

    #[error("Transform '{transform}' failed: {message}")]
    Transform { transform: String, message: String },

    #[error("Delivery to '{sink}' failed (retryable: {retryable}): {reason}")]
    Delivery {
        sink: String,
        reason: String,
        retryable: bool,
    },

    #[error("Dedup store unavailable at {}: {reason}", .path.display())]
    StoreUnavailable { path: PathBuf, reason: String },
}

impl PipelineError {
    /// Build a `StoreUnavailable` error for a path
    pub fn store(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Self::StoreUnavailable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Fatal errors stop the runner instead of aborting a single cycle
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }
}

/// Whether a fetch failure is expected to clear up on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    /// Network hiccup, timeout, 5xx, rate limit
    Transient,

    /// Bad credentials, gone resource, unparseable document
    Permanent,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
        }
    }
}

/// Error returned by a source adapter
#[derive(Debug, Clone, Error)]
#[error("{kind} fetch error: {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Permanent,
            message: message.into(),
        }
    }

    /// Classify an HTTP status: 408, 429 and 5xx are worth retrying later
    pub fn from_status(status: u16, context: &str) -> Self {
        let message = format!("{} returned HTTP {}", context, status);
        if status == 408 || status == 429 || status >= 500 {
            Self::transient(message)
        } else {
            Self::permanent(message)
        }
    }

    /// Attach the source id, turning this into a pipeline error
    pub fn for_source(self, source_id: &str) -> PipelineError {
        PipelineError::Fetch {
            source_id: source_id.to_string(),
            kind: self.kind,
            message: self.message,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => Self::from_status(status.as_u16(), "source"),
            None if e.is_decode() => Self::permanent(e.to_string()),
            None => Self::transient(e.to_string()),
        }
    }
}

/// Error from an identity function: the raw record lacks identity fields
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct IdentityError(pub String);

/// Error from a text generation backend
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("Generation request failed: {0}")]
    Request(String),

    #[error("Generation backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Generated text too short ({0} chars)")]
    TooShort(usize),

    #[error("Input too short for generation ({0} chars)")]
    InputTooShort(usize),
}
