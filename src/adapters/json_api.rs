//! JSON API source adapter.
//!
//! GETs a JSON document, optionally with HTTP basic auth and extra headers,
//! and returns the array found at a JSON pointer (`/features`, `/data/items`).
//! An empty pointer means the document itself is the array.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use super::{FetchBatch, SourceAdapter};
use crate::core::error::FetchError;

/// Basic-auth credentials
#[derive(Debug, Clone)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// Polls a JSON endpoint
pub struct JsonApiSource {
    name: String,
    url: String,
    items_pointer: String,
    item_pointer: Option<String>,
    auth: Option<BasicAuth>,
    headers: BTreeMap<String, String>,
    client: reqwest::Client,
}

impl JsonApiSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            items_pointer: String::new(),
            item_pointer: None,
            auth: None,
            headers: BTreeMap::new(),
            client,
        }
    }

    /// Pointer to the item array within the response
    pub fn with_items_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.items_pointer = pointer.into();
        self
    }

    /// Pointer applied to each element, e.g. `/properties` for GeoJSON features
    pub fn with_item_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.item_pointer = Some(pointer.into());
        self
    }

    pub fn with_basic_auth(mut self, auth: BasicAuth) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

#[async_trait]
impl SourceAdapter for JsonApiSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, _cursor: Option<&str>) -> Result<FetchBatch, FetchError> {
        let mut request = self.client.get(&self.url);
        if let Some(auth) = &self.auth {
            request = request.basic_auth(&auth.username, Some(&auth.password));
        }
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::from_status(status.as_u16(), &self.url));
        }

        let body = response.text().await?;
        let document: Value = serde_json::from_str(&body)
            .map_err(|e| FetchError::permanent(format!("invalid JSON from {}: {}", self.url, e)))?;

        let items = extract_items(document, &self.items_pointer, self.item_pointer.as_deref())?;
        Ok(FetchBatch::new(items))
    }
}

/// Pull the item array out of a response document
pub fn extract_items(
    document: Value,
    items_pointer: &str,
    item_pointer: Option<&str>,
) -> Result<Vec<Value>, FetchError> {
    let mut document = document;
    let list = match document.pointer_mut(items_pointer).map(Value::take) {
        Some(Value::Array(list)) => list,
        Some(Value::Null) | None => {
            return Err(FetchError::permanent(format!(
                "no item array at '{}'",
                items_pointer
            )))
        }
        Some(_) => {
            return Err(FetchError::permanent(format!(
                "value at '{}' is not an array",
                items_pointer
            )))
        }
    };

    Ok(match item_pointer {
        Some(pointer) => list
            .into_iter()
            .map(|mut v| v.pointer_mut(pointer).map(Value::take).unwrap_or(Value::Null))
            .collect(),
        None => list,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_nested_array() {
        let doc = json!({ "data": { "items": [{ "id": 1 }, { "id": 2 }] } });
        let items = extract_items(doc, "/data/items", None).unwrap();

        assert_eq!(items, vec![json!({ "id": 1 }), json!({ "id": 2 })]);
    }

    #[test]
    fn test_root_array() {
        let items = extract_items(json!([1, 2, 3]), "", None).unwrap();
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn test_geojson_properties() {
        let doc = json!({
            "features": [
                { "type": "Feature", "properties": { "camera": "I-70 @ Loma", "image": "a.jpg" } }
            ]
        });
        let items = extract_items(doc, "/features", Some("/properties")).unwrap();

        assert_eq!(items[0]["camera"], "I-70 @ Loma");
    }

    #[test]
    fn test_missing_array_is_permanent() {
        let err = extract_items(json!({ "other": [] }), "/features", None).unwrap_err();
        assert_eq!(err.kind, crate::core::error::FetchErrorKind::Permanent);

        let err = extract_items(json!({ "features": {} }), "/features", None).unwrap_err();
        assert!(err.message.contains("not an array"));
    }
}
