//! Reader for seen-item files written by the older single-purpose bots.
//!
//! Recognized layouts:
//! - `{"items": ["id", ...]}`
//! - `{"keys": ["source|link", ...]}` (the part after the first `|` is the identity)
//! - `{"posted": ["url", ...], "last_check": "..."}`
//! - a bare `["id", ...]` array

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde_json::Value;

/// Read identities from a legacy seen file, in file order
pub fn read_legacy_ids(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read legacy seen file: {}", path.display()))?;

    parse_legacy_ids(&content)
        .with_context(|| format!("Unrecognized legacy seen file: {}", path.display()))
}

/// Parse the contents of a legacy seen file
pub fn parse_legacy_ids(content: &str) -> Result<Vec<String>> {
    let data: Value = serde_json::from_str(content).context("Legacy seen file is not JSON")?;

    let ids = match &data {
        Value::Array(list) => strings(list),
        Value::Object(obj) => {
            if let Some(Value::Array(list)) = obj.get("items") {
                strings(list)
            } else if let Some(Value::Array(list)) = obj.get("keys") {
                strings(list)
                    .into_iter()
                    .filter_map(|key| key.split_once('|').map(|(_, id)| id.to_string()))
                    .collect()
            } else if let Some(Value::Array(list)) = obj.get("posted") {
                strings(list)
            } else {
                bail!("expected one of 'items', 'keys' or 'posted'");
            }
        }
        _ => bail!("expected a JSON object or array"),
    };

    Ok(ids.into_iter().filter(|id| !id.trim().is_empty()).collect())
}

fn strings(list: &[Value]) -> Vec<String> {
    list.iter()
        .filter_map(|v| v.as_str().map(String::from))
        .collect()
}
