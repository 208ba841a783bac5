//! Seen records: the durable fact that an item was delivered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One line of a source's dedup log
///
/// Written only after every sink confirmed delivery, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenRecord {
    /// Source that produced the item
    pub source_id: String,

    /// Identity within that source
    pub identity: String,

    /// When delivery was confirmed
    pub delivered_at: DateTime<Utc>,

    /// Digest of the payload as delivered, for auditing drift
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_digest: Option<String>,
}

impl SeenRecord {
    pub fn new(
        source_id: impl Into<String>,
        identity: impl Into<String>,
        delivered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            identity: identity.into(),
            delivered_at,
            payload_digest: None,
        }
    }

    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.payload_digest = Some(digest.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_line_format() {
        let at = DateTime::parse_from_rfc3339("2025-10-28T14:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let record = SeenRecord::new("crime_watch", "https://example.org/a/1", at);

        let line = serde_json::to_string(&record).unwrap();
        assert_eq!(
            line,
            r#"{"source_id":"crime_watch","identity":"https://example.org/a/1","delivered_at":"2025-10-28T14:00:00Z"}"#
        );

        let parsed: SeenRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, record);
    }
}
