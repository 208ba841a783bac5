//! Scheduler Integration Tests
//!
//! Source isolation, backoff and continuous mode.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use common::{item, runner, RecordingSink, ScriptedSource};
use feedwatch::core::{
    BackoffPolicy, DedupStore, FetchError, PollInterval, Scheduler, SchedulerError,
    SourceSettings,
};
use feedwatch::domain::RunnerState;

async fn open_store(temp: &TempDir) -> Arc<DedupStore> {
    Arc::new(DedupStore::open(temp.path()).await.unwrap())
}

#[tokio::test]
async fn test_failing_source_does_not_block_others() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp).await;

    let broken = ScriptedSource::new("broken", vec![Err(FetchError::transient("HTTP 503"))]);
    let healthy = ScriptedSource::fixed("healthy", vec![item("1", "One")]);
    let broken_sink = RecordingSink::new();
    let healthy_sink = RecordingSink::new();

    let mut scheduler = Scheduler::new(store.clone());
    scheduler
        .add(runner("broken", broken, broken_sink.clone(), store.clone()))
        .unwrap();
    scheduler
        .add(runner("healthy", healthy, healthy_sink.clone(), store.clone()))
        .unwrap();

    let results = scheduler.run_once_many(&[]).await.unwrap();

    assert_eq!(results.len(), 2);
    let (broken_id, broken_cycle) = &results[0];
    let (healthy_id, healthy_cycle) = &results[1];
    assert_eq!(broken_id, "broken");
    assert_eq!(healthy_id, "healthy");

    let broken_cycle = broken_cycle.as_ref().unwrap();
    assert!(!broken_cycle.is_success());
    assert!(broken_cycle.error.as_deref().unwrap().contains("503"));

    let healthy_cycle = healthy_cycle.as_ref().unwrap();
    assert!(healthy_cycle.is_success());
    assert_eq!(healthy_sink.count(), 1);
    assert_eq!(broken_sink.count(), 0);

    let status = scheduler.status();
    assert_eq!(status.len(), 2);
    assert_eq!(status[0].consecutive_failures, 1);
    assert!(matches!(status[0].state, RunnerState::Backoff { .. }));
    assert_eq!(status[1].consecutive_failures, 0);
}

#[tokio::test]
async fn test_backoff_grows_and_caps() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp).await;
    let source = ScriptedSource::new(
        "flaky",
        vec![
            Err(FetchError::transient("timeout")),
            Err(FetchError::transient("timeout")),
            Err(FetchError::transient("timeout")),
            Ok(vec![item("1", "Back")]),
        ],
    );
    let sink = RecordingSink::new();
    let mut runner = runner("flaky", source, sink.clone(), store).with_settings(SourceSettings {
        backoff: BackoffPolicy {
            initial_secs: 10,
            max_secs: 25,
            multiplier: 2.0,
        },
        ..Default::default()
    });

    let mut delays = Vec::new();
    for _ in 0..3 {
        let cycle = runner.run_cycle().await.unwrap();
        assert!(!cycle.is_success());
        delays.push(runner.backoff_delay().unwrap());
    }

    assert_eq!(
        delays,
        vec![
            Duration::from_secs(10),
            Duration::from_secs(20),
            Duration::from_secs(25)
        ]
    );
    assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(runner.consecutive_failures(), 3);

    // Recovery resets the streak
    let cycle = runner.run_cycle().await.unwrap();
    assert!(cycle.is_success());
    assert_eq!(runner.consecutive_failures(), 0);
    assert_eq!(runner.backoff_delay(), None);
    assert_eq!(sink.count(), 1);
}

#[tokio::test]
async fn test_backoff_does_not_shrink_after_permanent_error() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp).await;
    let source = ScriptedSource::new(
        "mixed",
        vec![
            Err(FetchError::permanent("HTTP 401")),
            Err(FetchError::transient("HTTP 503")),
            Err(FetchError::transient("HTTP 503")),
        ],
    );
    let mut runner = runner("mixed", source, RecordingSink::new(), store).with_settings(
        SourceSettings {
            backoff: BackoffPolicy {
                initial_secs: 30,
                max_secs: 1800,
                multiplier: 2.0,
            },
            ..Default::default()
        },
    );

    let mut delays = Vec::new();
    for _ in 0..3 {
        runner.run_cycle().await.unwrap();
        delays.push(runner.backoff_delay().unwrap());
    }

    assert!(delays.windows(2).all(|w| w[0] <= w[1]), "{:?}", delays);
    assert!(delays.iter().all(|d| *d <= Duration::from_secs(1800)));
    assert_eq!(delays[0], Duration::from_secs(1800));
}

#[tokio::test]
async fn test_backoff_never_polls_faster_than_interval() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp).await;
    let source = ScriptedSource::new("flaky", vec![Err(FetchError::transient("reset"))]);
    let mut runner = runner("flaky", source, RecordingSink::new(), store).with_settings(
        SourceSettings {
            backoff: BackoffPolicy {
                initial_secs: 5,
                max_secs: 60,
                multiplier: 2.0,
            },
            ..Default::default()
        },
    );

    let interval = PollInterval::fixed(Duration::from_secs(300));
    assert_eq!(runner.next_delay(&interval), Duration::from_secs(300));

    runner.run_cycle().await.unwrap();
    assert_eq!(runner.next_delay(&interval), Duration::from_secs(300));

    let short = PollInterval::fixed(Duration::from_secs(1));
    assert_eq!(runner.next_delay(&short), Duration::from_secs(5));
}

#[tokio::test]
async fn test_permanent_fetch_error_backs_off_to_max() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp).await;
    let source = ScriptedSource::new("gone", vec![Err(FetchError::permanent("HTTP 404"))]);
    let mut runner = runner("gone", source, RecordingSink::new(), store);

    runner.run_cycle().await.unwrap();

    assert_eq!(
        runner.backoff_delay(),
        Some(Duration::from_secs(BackoffPolicy::default().max_secs))
    );
}

#[tokio::test]
async fn test_duplicate_and_unknown_sources() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp).await;
    let mut scheduler = Scheduler::new(store.clone());

    let source = ScriptedSource::fixed("news", vec![]);
    scheduler
        .add(runner("news", source.clone(), RecordingSink::new(), store.clone()))
        .unwrap();
    let err = scheduler
        .add(runner("news", source, RecordingSink::new(), store))
        .unwrap_err();
    assert!(matches!(err, SchedulerError::DuplicateSource(_)));

    let err = scheduler.run_once("missing").await.unwrap_err();
    assert!(matches!(err, SchedulerError::UnknownSource(_)));
}

#[tokio::test]
async fn test_run_forever_stops_on_cancel() {
    tokio::time::pause();
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp).await;
    let source = ScriptedSource::fixed("news", vec![item("1", "One")]);
    let sink = RecordingSink::new();

    let mut scheduler = Scheduler::new(store.clone());
    scheduler
        .add(runner("news", source.clone(), sink.clone(), store))
        .unwrap();
    let scheduler = Arc::new(scheduler);

    let cancel = CancellationToken::new();
    let task = {
        let scheduler = Arc::clone(&scheduler);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            scheduler
                .run_forever("news", Some(PollInterval::fixed(Duration::from_secs(60))), cancel)
                .await
        })
    };

    // Three cycles: at t=0, 60 and 120
    tokio::time::sleep(Duration::from_secs(150)).await;
    cancel.cancel();
    task.await.unwrap().unwrap();

    assert_eq!(source.fetches(), 3);
    assert_eq!(sink.count(), 1);

    let status = scheduler.status();
    assert_eq!(status[0].state, RunnerState::Idle);
    assert!(status[0].last_cycle.as_ref().unwrap().is_success());
}
