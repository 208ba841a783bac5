//! Legacy Import Integration Tests
//!
//! Seen files from the older bots seed the dedup log so a migrated source
//! does not re-post its backlog.

mod common;

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tempfile::TempDir;

use common::{RecordingSink, ScriptedSource};
use feedwatch::core::legacy::read_legacy_ids;
use feedwatch::core::{DedupStore, SourceSettings};
use feedwatch::domain::{IdentityScheme, Normalizer};
use feedwatch::SourceRunner;

#[tokio::test]
async fn test_imported_links_are_not_redelivered() {
    let temp = TempDir::new().unwrap();
    let legacy = temp.path().join("seen_items.json");
    std::fs::write(
        &legacy,
        r#"{"keys": ["sheriff|https://Sheriff.example/news/1", "sheriff|https://sheriff.example/news/2"]}"#,
    )
    .unwrap();

    let scheme = IdentityScheme::field("link");
    let ids = read_legacy_ids(&legacy).unwrap();
    let keys: Vec<String> = ids.iter().map(|id| scheme.key_from_parts(&[id])).collect();

    let store = Arc::new(DedupStore::open(temp.path().join("seen")).await.unwrap());
    assert_eq!(store.import("sheriff", keys.clone(), Utc::now()).await.unwrap(), 2);
    // Re-import is a no-op
    assert_eq!(store.import("sheriff", keys, Utc::now()).await.unwrap(), 0);

    let source = ScriptedSource::fixed(
        "sheriff",
        vec![
            json!({ "title": "Old one", "link": "https://sheriff.example/news/1" }),
            json!({ "title": "Old two", "link": "https://sheriff.example/news/2" }),
            json!({ "title": "New", "link": "https://sheriff.example/news/3" }),
        ],
    );
    let sink = RecordingSink::new();
    let mut runner = SourceRunner::new(
        source,
        Normalizer::new("sheriff", scheme),
        common::dispatcher(sink.clone()),
        store.clone(),
    )
    .with_settings(SourceSettings::default());

    let cycle = runner.run_cycle().await.unwrap();

    assert_eq!(cycle.new_item_count, 1);
    assert_eq!(sink.titles(), vec!["New"]);
    assert_eq!(store.count("sheriff").await, 3);
}
