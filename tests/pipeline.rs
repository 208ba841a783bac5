//! Poll Cycle Integration Tests
//!
//! Dedup, ordering and filtering behavior of a single source runner.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

use common::{item, runner, RecordingSink, ScriptedSource, TaggedSource};
use feedwatch::adapters::Generator;
use feedwatch::core::{DedupStore, GenerationError, PipelineError, SourceSettings};
use feedwatch::domain::{IdentityScheme, Item, Normalizer};
use feedwatch::transform::{
    ArticleTransform, GenerationFailurePolicy, KeywordFilter, Transform, TransformOutcome,
    TransformPipeline,
};
use feedwatch::SourceRunner;

async fn open_store(temp: &TempDir) -> Arc<DedupStore> {
    Arc::new(DedupStore::open(temp.path()).await.unwrap())
}

fn settings() -> SourceSettings {
    SourceSettings {
        oldest_first: false,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_second_cycle_delivers_nothing_new() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp).await;
    let source = ScriptedSource::fixed("news", vec![item("1", "One"), item("2", "Two")]);
    let sink = RecordingSink::new();
    let mut runner = runner("news", source, sink.clone(), store.clone()).with_settings(settings());

    let first = runner.run_cycle().await.unwrap();
    assert!(first.is_success());
    assert_eq!(first.delivered, 2);

    let second = runner.run_cycle().await.unwrap();
    assert!(second.is_success());
    assert_eq!(second.new_item_count, 0);
    assert_eq!(second.delivered, 0);

    assert_eq!(sink.count(), 2);
    assert_eq!(store.count("news").await, 2);
}

#[tokio::test]
async fn test_seen_state_survives_restart() {
    let temp = TempDir::new().unwrap();
    let items = vec![item("a", "Alpha"), item("b", "Beta")];

    {
        let store = open_store(&temp).await;
        let sink = RecordingSink::new();
        let source = ScriptedSource::fixed("news", items.clone());
        let mut runner = runner("news", source, sink.clone(), store).with_settings(settings());
        runner.run_cycle().await.unwrap();
        assert_eq!(sink.count(), 2);
    }

    // Fresh process: new store handle over the same directory
    let store = open_store(&temp).await;
    let sink = RecordingSink::new();
    let source = ScriptedSource::fixed("news", items);
    let mut runner = runner("news", source, sink.clone(), store.clone()).with_settings(settings());

    let cycle = runner.run_cycle().await.unwrap();
    assert_eq!(cycle.delivered, 0);
    assert_eq!(sink.count(), 0);
    assert!(store.has_seen("news", "a").await);
    assert!(store.has_seen("news", "b").await);
}

#[tokio::test]
async fn test_permanent_failure_does_not_block_later_items() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp).await;
    let source = ScriptedSource::fixed(
        "news",
        vec![item("a", "A"), item("b", "B"), item("c", "C")],
    );
    let sink = RecordingSink::rejecting(&["b"]);
    let mut runner = runner("news", source, sink.clone(), store.clone()).with_settings(settings());

    let cycle = runner.run_cycle().await.unwrap();

    assert!(cycle.is_success());
    assert_eq!(cycle.delivered, 2);
    assert_eq!(cycle.failed, 1);
    assert_eq!(sink.identities(), vec!["a", "c"]);

    let seen: Vec<String> = store
        .records("news")
        .await
        .into_iter()
        .map(|r| r.identity)
        .collect();
    assert_eq!(seen, vec!["a", "c"]);
    assert!(!store.has_seen("news", "b").await);
}

#[tokio::test]
async fn test_case_folded_title_identity_delivers_once() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp).await;
    let source = ScriptedSource::fixed(
        "alerts",
        vec![
            json!({ "id": "1", "title": "Road Closed on I-70" }),
            json!({ "id": "2", "title": "road closed on  i-70" }),
        ],
    );
    let sink = RecordingSink::new();
    let mut runner = SourceRunner::new(
        source,
        Normalizer::new("alerts", IdentityScheme::field("title")),
        common::dispatcher(sink.clone()),
        store.clone(),
    )
    .with_settings(settings());

    let cycle = runner.run_cycle().await.unwrap();

    assert_eq!(cycle.new_item_count, 1);
    assert_eq!(sink.count(), 1);
    assert_eq!(store.count("alerts").await, 1);
    assert!(store.has_seen("alerts", "road closed on i-70").await);
}

#[tokio::test]
async fn test_empty_source_is_a_clean_cycle() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp).await;
    let source = ScriptedSource::fixed("quiet", vec![]);
    let sink = RecordingSink::new();
    let mut runner = runner("quiet", source, sink.clone(), store.clone());

    let cycle = runner.run_cycle().await.unwrap();

    assert!(cycle.is_success());
    assert_eq!(cycle.raw_item_count, 0);
    assert_eq!(sink.count(), 0);
    assert_eq!(store.count("quiet").await, 0);
}

#[tokio::test]
async fn test_malformed_items_are_skipped() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp).await;
    let source = ScriptedSource::fixed(
        "news",
        vec![
            item("1", "One"),
            json!({ "title": "no id here" }),
            json!("not an object"),
            item("2", "Two"),
        ],
    );
    let sink = RecordingSink::new();
    let mut runner = runner("news", source, sink.clone(), store).with_settings(settings());

    let cycle = runner.run_cycle().await.unwrap();

    assert!(cycle.is_success());
    assert_eq!(cycle.malformed, 2);
    assert_eq!(cycle.delivered, 2);
}

#[tokio::test]
async fn test_max_items_and_oldest_first() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp).await;
    // Upstream lists newest first
    let source = ScriptedSource::fixed(
        "news",
        vec![
            item("4", "Newest"),
            item("3", "Newer"),
            item("2", "Older"),
            item("1", "Oldest"),
        ],
    );
    let sink = RecordingSink::new();
    let mut runner = runner("news", source, sink.clone(), store).with_settings(SourceSettings {
        max_items: Some(3),
        oldest_first: true,
        ..Default::default()
    });

    let cycle = runner.run_cycle().await.unwrap();

    assert_eq!(cycle.raw_item_count, 3);
    assert_eq!(sink.identities(), vec!["2", "3", "4"]);
}

#[tokio::test]
async fn test_filtered_items_stay_unseen_by_default() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp).await;
    let source = ScriptedSource::fixed(
        "county",
        vec![item("1", "Crash in Fruita"), item("2", "Parade in Denver")],
    );
    let sink = RecordingSink::new();
    let transforms =
        TransformPipeline::new().with(Arc::new(KeywordFilter::new(["fruita", "palisade"])));
    let mut runner = runner("county", source, sink.clone(), store.clone())
        .with_transforms(transforms)
        .with_settings(settings());

    let cycle = runner.run_cycle().await.unwrap();

    assert_eq!(cycle.delivered, 1);
    assert_eq!(cycle.dropped, 1);
    assert_eq!(sink.titles(), vec!["Crash in Fruita"]);
    assert!(!store.has_seen("county", "2").await);
}

#[tokio::test]
async fn test_mark_seen_on_drop() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp).await;
    let source = ScriptedSource::fixed("county", vec![item("2", "Parade in Denver")]);
    let sink = RecordingSink::new();
    let transforms = TransformPipeline::new().with(Arc::new(KeywordFilter::new(["fruita"])));
    let mut runner = runner("county", source, sink.clone(), store.clone())
        .with_transforms(transforms)
        .with_settings(SourceSettings {
            mark_seen_on_drop: true,
            ..settings()
        });

    runner.run_cycle().await.unwrap();
    let second = runner.run_cycle().await.unwrap();

    assert_eq!(sink.count(), 0);
    assert!(store.has_seen("county", "2").await);
    assert_eq!(second.new_item_count, 0);
}

/// Fails on one identity, passes the rest
struct FailingTransform;

#[async_trait]
impl Transform for FailingTransform {
    fn name(&self) -> &str {
        "failing"
    }

    async fn apply(&self, item: Item) -> Result<TransformOutcome, PipelineError> {
        if item.identity == "bad" {
            return Err(PipelineError::Transform {
                transform: "failing".to_string(),
                message: "boom".to_string(),
            });
        }
        Ok(TransformOutcome::Keep(item))
    }
}

#[tokio::test]
async fn test_transform_error_skips_only_that_item() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp).await;
    let source = ScriptedSource::fixed("news", vec![item("bad", "Bad"), item("good", "Good")]);
    let sink = RecordingSink::new();
    let mut runner = runner("news", source, sink.clone(), store.clone())
        .with_transforms(TransformPipeline::new().with(Arc::new(FailingTransform)))
        .with_settings(settings());

    let cycle = runner.run_cycle().await.unwrap();

    assert!(cycle.is_success());
    assert_eq!(cycle.failed, 1);
    assert_eq!(sink.identities(), vec!["good"]);
    assert!(!store.has_seen("news", "bad").await);
}

#[tokio::test]
async fn test_spacing_between_deliveries() {
    tokio::time::pause();
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp).await;
    let source = ScriptedSource::fixed("news", vec![item("1", "One"), item("2", "Two"), item("3", "Three")]);
    let sink = RecordingSink::new();
    let mut runner = runner("news", source, sink.clone(), store).with_settings(SourceSettings {
        spacing: Duration::from_secs(2),
        ..settings()
    });

    let started = tokio::time::Instant::now();
    runner.run_cycle().await.unwrap();

    // Two pauses: none before the first delivery
    assert!(started.elapsed() >= Duration::from_secs(4));
    assert_eq!(sink.count(), 3);
}

#[tokio::test]
async fn test_failed_item_is_refetched_despite_cursor() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp).await;
    let source = TaggedSource::new(vec![item("a", "A"), item("b", "B")], "\"v1\"");
    let sink = RecordingSink::rejecting(&["b"]);
    let mut runner = runner("news", source.clone(), sink.clone(), store.clone())
        .with_settings(settings());

    let first = runner.run_cycle().await.unwrap();
    assert_eq!(first.delivered, 1);
    assert_eq!(first.failed, 1);

    // B failed, so the next fetch must not be conditional
    let second = runner.run_cycle().await.unwrap();
    assert_eq!(second.raw_item_count, 2);
    assert_eq!(second.new_item_count, 1);

    sink.allow("b");
    let third = runner.run_cycle().await.unwrap();
    assert_eq!(third.delivered, 1);
    assert!(store.has_seen("news", "b").await);

    // Everything settled: the tag is now sent and the upstream answers empty
    let fourth = runner.run_cycle().await.unwrap();
    assert_eq!(fourth.raw_item_count, 0);

    let tag = Some("\"v1\"".to_string());
    assert_eq!(source.cursors(), vec![None, None, None, tag]);
    assert_eq!(sink.identities(), vec!["a", "b"]);
}

struct DownGenerator;

#[async_trait]
impl Generator for DownGenerator {
    fn name(&self) -> &str {
        "down"
    }

    async fn generate(&self, _text: &str, _context: &str) -> Result<String, GenerationError> {
        Err(GenerationError::Status {
            status: 503,
            body: "overloaded".to_string(),
        })
    }
}

#[tokio::test]
async fn test_generation_failure_never_marks_seen() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp).await;
    let source = ScriptedSource::fixed(
        "releases",
        vec![json!({
            "id": "1",
            "title": "Sheriff's office announces arrest",
            "body": "Deputies arrested a suspect on Tuesday following a weeks-long investigation.",
        })],
    );
    let sink = RecordingSink::new();
    let article = ArticleTransform::new(Arc::new(DownGenerator))
        .on_failure(GenerationFailurePolicy::Drop);
    let mut runner = runner("releases", source, sink.clone(), store.clone())
        .with_transforms(TransformPipeline::new().with(Arc::new(article)))
        .with_settings(SourceSettings {
            mark_seen_on_drop: true,
            ..settings()
        });

    let first = runner.run_cycle().await.unwrap();
    assert_eq!(first.delivered, 0);
    assert_eq!(first.failed, 1);
    assert!(!store.has_seen("releases", "1").await);

    // Still eligible next cycle
    let second = runner.run_cycle().await.unwrap();
    assert_eq!(second.new_item_count, 1);
    assert_eq!(sink.count(), 0);
}
