//! Normalized items and identity computation.
//!
//! A source adapter hands back loosely-structured JSON records ([`RawItem`]).
//! [`Normalizer`] turns each one into an [`Item`] with a stable identity. The
//! identity function is injected per source, so an RSS source can key on the
//! link while a camera source keys on camera id plus a time bucket.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::core::error::{IdentityError, PipelineError};

/// A raw record as returned by a source adapter
pub type RawItem = Value;

/// Identity function: pure mapping from a raw record to its identity
pub type IdentityFn = Arc<dyn Fn(&RawItem) -> Result<String, IdentityError> + Send + Sync>;

/// A normalized unit of content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Which source produced it
    pub source_id: String,

    /// Stable identity within the source's identity space
    pub identity: String,

    /// Content
    pub payload: ItemPayload,
}

/// Semi-structured item content
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemPayload {
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,

    /// Parsed publication time, when the source gave a parseable one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,

    /// Publication time as the source wrote it (used for display)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_text: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Everything else the source provided (location, severity, ...)
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, Value>,
}

impl Item {
    /// Short digest of the payload, stored alongside seen records
    pub fn payload_digest(&self) -> String {
        let json = serde_json::to_string(&self.payload).unwrap_or_default();
        short_digest(&json)
    }
}

const TITLE_KEYS: &[&str] = &["title", "name", "headline"];
const BODY_KEYS: &[&str] = &["body", "summary", "description", "content"];
const LINK_KEYS: &[&str] = &["link", "url", "href"];
const TIME_KEYS: &[&str] = &["published", "pubDate", "date", "timestamp", "updated"];
const IMAGE_KEYS: &[&str] = &["image", "image_url", "thumbnail"];
const IMAGE_LIST_KEYS: &[&str] = &["images"];
const TAG_KEYS: &[&str] = &["tags", "categories", "category"];

/// How a source derives identities from raw records
///
/// ```yaml
/// identity:
///   fields: [camera_id]
///   time_bucket: { field: captured_at, seconds: 3600 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityScheme {
    /// Fields joined into a composite key. A leading `/` means a JSON pointer.
    pub fields: Vec<String>,

    /// Case-fold and whitespace-collapse each part (default: true)
    #[serde(default = "default_fold_case")]
    pub fold_case: bool,

    /// Replace the key by a 16-hex-char SHA256 prefix
    #[serde(default)]
    pub hash: bool,

    /// Append a time bucket, for sources whose ids recur over time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_bucket: Option<TimeBucket>,
}

fn default_fold_case() -> bool {
    true
}

/// Bucket a timestamp field into fixed windows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeBucket {
    pub field: String,
    pub seconds: u64,
}

impl IdentityScheme {
    /// Identity taken from a single field
    pub fn field(name: impl Into<String>) -> Self {
        Self::composite([name.into()])
    }

    /// Identity built from several fields
    pub fn composite<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            fold_case: true,
            hash: false,
            time_bucket: None,
        }
    }

    pub fn hashed(mut self) -> Self {
        self.hash = true;
        self
    }

    pub fn case_sensitive(mut self) -> Self {
        self.fold_case = false;
        self
    }

    pub fn with_time_bucket(mut self, field: impl Into<String>, seconds: u64) -> Self {
        self.time_bucket = Some(TimeBucket {
            field: field.into(),
            seconds,
        });
        self
    }

    /// Compute the identity of a raw record
    pub fn identity(&self, raw: &RawItem) -> Result<String, IdentityError> {
        let mut parts = Vec::with_capacity(self.fields.len() + 1);

        for field in &self.fields {
            let value = lookup(raw, field)
                .and_then(scalar_text)
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| IdentityError(format!("missing identity field '{}'", field)))?;
            parts.push(value);
        }

        if let Some(bucket) = &self.time_bucket {
            let ts = lookup(raw, &bucket.field)
                .and_then(parse_timestamp)
                .ok_or_else(|| {
                    IdentityError(format!("missing or unparseable time field '{}'", bucket.field))
                })?;
            let width = bucket.seconds.max(1) as i64;
            parts.push(ts.timestamp().div_euclid(width).to_string());
        }

        if parts.is_empty() {
            return Err(IdentityError("identity scheme has no fields".to_string()));
        }

        let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
        Ok(self.key_from_parts(&refs))
    }

    /// Canonicalize already-extracted parts into a key
    ///
    /// Used directly when importing identities recorded by older tooling.
    pub fn key_from_parts(&self, parts: &[&str]) -> String {
        let joined = parts
            .iter()
            .map(|p| {
                let cleaned = clean_text(p);
                if self.fold_case {
                    cleaned.to_lowercase()
                } else {
                    cleaned
                }
            })
            .collect::<Vec<_>>()
            .join("|");

        if self.hash {
            short_digest(&joined)
        } else {
            joined
        }
    }

    /// Wrap this scheme as an injectable identity function
    pub fn into_fn(self) -> IdentityFn {
        Arc::new(move |raw| self.identity(raw))
    }
}

/// Turns raw records into items for one source
#[derive(Clone)]
pub struct Normalizer {
    source_id: String,
    identity: IdentityFn,
}

impl fmt::Debug for Normalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Normalizer")
            .field("source_id", &self.source_id)
            .finish_non_exhaustive()
    }
}

impl Normalizer {
    /// Normalizer using a declarative identity scheme
    pub fn new(source_id: impl Into<String>, scheme: IdentityScheme) -> Self {
        Self::with_identity_fn(source_id, scheme.into_fn())
    }

    /// Normalizer using a caller-supplied identity function
    pub fn with_identity_fn(source_id: impl Into<String>, identity: IdentityFn) -> Self {
        Self {
            source_id: source_id.into(),
            identity,
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Normalize a raw record
    ///
    /// Fails only when the identity cannot be computed. Absent optional
    /// fields become `None`, empty strings or empty lists.
    pub fn normalize(&self, raw: &RawItem) -> Result<Item, PipelineError> {
        let obj = raw.as_object().ok_or_else(|| PipelineError::MalformedItem {
            source_id: self.source_id.clone(),
            reason: "raw item is not an object".to_string(),
        })?;

        let identity = (self.identity)(raw).map_err(|e| PipelineError::MalformedItem {
            source_id: self.source_id.clone(),
            reason: e.to_string(),
        })?;

        let mut fields = obj.clone();
        let title = take_text(&mut fields, TITLE_KEYS).unwrap_or_default();
        let body = take_text(&mut fields, BODY_KEYS);
        let link = take_text(&mut fields, LINK_KEYS);

        let (published_at, published_text) = match take_first(&mut fields, TIME_KEYS) {
            Some(v) => (parse_timestamp(&v), scalar_text(&v).map(|s| clean_text(&s))),
            None => (None, None),
        };

        let mut images: Vec<String> = take_text(&mut fields, IMAGE_KEYS).into_iter().collect();
        if let Some(list) = take_first(&mut fields, IMAGE_LIST_KEYS) {
            images.extend(string_list(&list));
        }
        images.dedup();

        let tags = take_first(&mut fields, TAG_KEYS)
            .map(|v| string_list(&v))
            .unwrap_or_default();

        Ok(Item {
            source_id: self.source_id.clone(),
            identity,
            payload: ItemPayload {
                title,
                body,
                link,
                published_at,
                published_text,
                images,
                tags,
                fields,
            },
        })
    }
}

/// Collapse runs of whitespace and trim
pub fn clean_text(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First 16 hex chars of the SHA256 of the input
pub fn short_digest(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8])
}

/// Parse a timestamp from RFC 3339, RFC 2822, or unix seconds
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        Value::String(s) => {
            let s = s.trim();
            DateTime::parse_from_rfc3339(s)
                .or_else(|_| DateTime::parse_from_rfc2822(s))
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    s.parse::<i64>()
                        .ok()
                        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
                })
        }
        _ => None,
    }
}

fn lookup<'a>(raw: &'a RawItem, field: &str) -> Option<&'a Value> {
    if field.starts_with('/') {
        raw.pointer(field)
    } else {
        raw.get(field)
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn take_first(fields: &mut Map<String, Value>, keys: &[&str]) -> Option<Value> {
    let mut found = None;
    for key in keys {
        if let Some(v) = fields.remove(*key) {
            if found.is_none() && !v.is_null() {
                found = Some(v);
            }
        }
    }
    found
}

fn take_text(fields: &mut Map<String, Value>, keys: &[&str]) -> Option<String> {
    take_first(fields, keys)
        .as_ref()
        .and_then(scalar_text)
        .map(|s| clean_text(&s))
        .filter(|s| !s.is_empty())
}

fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(scalar_text)
            .map(|s| clean_text(&s))
            .filter(|s| !s.is_empty())
            .collect(),
        other => scalar_text(other)
            .map(|s| clean_text(&s))
            .filter(|s| !s.is_empty())
            .into_iter()
            .collect(),
    }
}
