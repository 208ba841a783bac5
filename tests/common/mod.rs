//! In-process fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use feedwatch::adapters::{DeliveryResult, FetchBatch, Sink, SourceAdapter};
use feedwatch::core::{DedupStore, Dispatcher, FetchError, RetryPolicy, SourceRunner};
use feedwatch::domain::{FormattedItem, IdentityScheme, Normalizer};

/// Returns scripted fetch results in order, then repeats the last one
pub struct ScriptedSource {
    name: String,
    script: Mutex<VecDeque<Result<Vec<Value>, FetchError>>>,
    last: Mutex<Option<Result<Vec<Value>, FetchError>>>,
    fetches: Mutex<u32>,
}

impl ScriptedSource {
    pub fn new(name: &str, script: Vec<Result<Vec<Value>, FetchError>>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            fetches: Mutex::new(0),
        })
    }

    /// Always returns the same records
    pub fn fixed(name: &str, items: Vec<Value>) -> Arc<Self> {
        Self::new(name, vec![Ok(items)])
    }

    pub fn fetches(&self) -> u32 {
        *self.fetches.lock().unwrap()
    }
}

#[async_trait]
impl SourceAdapter for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, _cursor: Option<&str>) -> Result<FetchBatch, FetchError> {
        *self.fetches.lock().unwrap() += 1;
        let next = self.script.lock().unwrap().pop_front();
        let result = match next {
            Some(result) => {
                *self.last.lock().unwrap() = Some(result.clone());
                result
            }
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Ok(Vec::new())),
        };
        result.map(FetchBatch::new)
    }
}

/// Records every delivery; fails permanently for chosen identities
#[derive(Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<FormattedItem>>,
    reject: Mutex<HashSet<String>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn rejecting(identities: &[&str]) -> Arc<Self> {
        let sink = Self::default();
        *sink.reject.lock().unwrap() = identities.iter().map(|s| s.to_string()).collect();
        Arc::new(sink)
    }

    /// Stop rejecting an identity
    pub fn allow(&self, identity: &str) {
        self.reject.lock().unwrap().remove(identity);
    }

    pub fn identities(&self) -> Vec<String> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .map(|i| i.identity.clone())
            .collect()
    }

    pub fn titles(&self) -> Vec<String> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .map(|i| i.title.clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }
}

#[async_trait]
impl Sink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver(&self, item: &FormattedItem) -> DeliveryResult {
        if self.reject.lock().unwrap().contains(&item.identity) {
            return DeliveryResult::permanent("HTTP 400: rejected");
        }
        self.delivered.lock().unwrap().push(item.clone());
        DeliveryResult::Success
    }
}

pub fn item(id: &str, title: &str) -> Value {
    json!({ "id": id, "title": title, "link": format!("https://example.com/{}", id) })
}

pub fn dispatcher(sink: Arc<RecordingSink>) -> Dispatcher {
    Dispatcher::new(
        vec![sink as Arc<dyn Sink>],
        RetryPolicy::none(),
        Duration::from_secs(5),
    )
}

pub fn runner(
    source_id: &str,
    adapter: Arc<dyn SourceAdapter>,
    sink: Arc<RecordingSink>,
    store: Arc<DedupStore>,
) -> SourceRunner {
    SourceRunner::new(
        adapter,
        Normalizer::new(source_id, IdentityScheme::field("id")),
        dispatcher(sink),
        store,
    )
}

/// Conditional-GET style source: answers its own tag with an empty batch
pub struct TaggedSource {
    items: Vec<Value>,
    tag: String,
    cursors: Mutex<Vec<Option<String>>>,
}

impl TaggedSource {
    pub fn new(items: Vec<Value>, tag: &str) -> Arc<Self> {
        Arc::new(Self {
            items,
            tag: tag.to_string(),
            cursors: Mutex::new(Vec::new()),
        })
    }

    /// Cursor passed to each fetch, in order
    pub fn cursors(&self) -> Vec<Option<String>> {
        self.cursors.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceAdapter for TaggedSource {
    fn name(&self) -> &str {
        "tagged"
    }

    async fn fetch(&self, cursor: Option<&str>) -> Result<FetchBatch, FetchError> {
        self.cursors.lock().unwrap().push(cursor.map(String::from));
        if cursor == Some(self.tag.as_str()) {
            return Ok(FetchBatch::default().with_cursor(&self.tag));
        }
        Ok(FetchBatch::new(self.items.clone()).with_cursor(&self.tag))
    }
}
