//! Per-source poll cycle execution.
//!
//! A [`SourceRunner`] owns one source's adapter, identity scheme, transforms
//! and sinks, plus a handle to the shared dedup store. Each cycle walks
//! `Polling -> Filtering -> Transforming -> Delivering -> Idle`; a fetch
//! failure aborts the cycle and leaves the runner in `Backoff`.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::dedup_store::DedupStore;
use super::delivery::Dispatcher;
use super::error::{FetchError, PipelineError};
use super::policy::{BackoffPolicy, PollInterval};
use crate::adapters::SourceAdapter;
use crate::domain::{
    FormattedItem, Item, Normalizer, PollCycle, RunnerState, SeenRecord, SourceStatus,
};
use crate::transform::{TransformOutcome, TransformPipeline};

/// Per-source behavior knobs
#[derive(Debug, Clone)]
pub struct SourceSettings {
    /// Cap on raw records considered per cycle, applied before normalization
    pub max_items: Option<usize>,

    /// Reverse the upstream's newest-first listing before delivery
    pub oldest_first: bool,

    /// Pause between consecutive deliveries within a cycle
    pub spacing: Duration,

    /// Upper bound on one adapter fetch
    pub fetch_timeout: Duration,

    /// Record items a transform dropped, so they are not re-evaluated
    pub mark_seen_on_drop: bool,

    /// Wait between continuous cycles
    pub interval: PollInterval,

    /// Wait growth after consecutive fetch failures
    pub backoff: BackoffPolicy,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            max_items: None,
            oldest_first: true,
            spacing: Duration::ZERO,
            fetch_timeout: Duration::from_secs(30),
            mark_seen_on_drop: false,
            interval: PollInterval::fixed(Duration::from_secs(300)),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Shared, read-mostly view of every source's state
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    inner: Arc<RwLock<BTreeMap<String, SourceStatus>>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update<F>(&self, source_id: &str, f: F)
    where
        F: FnOnce(&mut SourceStatus),
    {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let status = map
            .entry(source_id.to_string())
            .or_insert_with(|| SourceStatus::new(source_id));
        f(status);
    }

    pub fn get(&self, source_id: &str) -> Option<SourceStatus> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.get(source_id).cloned()
    }

    /// All sources, sorted by id
    pub fn snapshot(&self) -> Vec<SourceStatus> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.values().cloned().collect()
    }
}

/// Drives poll cycles for one source
pub struct SourceRunner {
    source_id: String,
    adapter: Arc<dyn SourceAdapter>,
    normalizer: Normalizer,
    transforms: TransformPipeline,
    dispatcher: Dispatcher,
    store: Arc<DedupStore>,
    settings: SourceSettings,
    status: StatusBoard,
    cursor: Option<String>,
    consecutive_failures: u32,
    backoff_delay: Option<Duration>,
}

impl std::fmt::Debug for SourceRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRunner")
            .field("source_id", &self.source_id)
            .field("adapter", &self.adapter.name())
            .field("transforms", &self.transforms)
            .field("dispatcher", &self.dispatcher)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SourceRunner {
    pub fn new(
        adapter: Arc<dyn SourceAdapter>,
        normalizer: Normalizer,
        dispatcher: Dispatcher,
        store: Arc<DedupStore>,
    ) -> Self {
        let source_id = normalizer.source_id().to_string();
        let status = StatusBoard::new();
        status.update(&source_id, |_| {});
        Self {
            source_id,
            adapter,
            normalizer,
            transforms: TransformPipeline::new(),
            dispatcher,
            store,
            settings: SourceSettings::default(),
            status,
            cursor: None,
            consecutive_failures: 0,
            backoff_delay: None,
        }
    }

    pub fn with_transforms(mut self, transforms: TransformPipeline) -> Self {
        self.transforms = transforms;
        self
    }

    pub fn with_settings(mut self, settings: SourceSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Report into a shared board instead of a private one
    pub fn with_status_board(mut self, status: StatusBoard) -> Self {
        status.update(&self.source_id, |_| {});
        self.status = status;
        self
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    pub fn status(&self) -> Option<SourceStatus> {
        self.status.get(&self.source_id)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Wait imposed by the current failure streak, if any
    pub fn backoff_delay(&self) -> Option<Duration> {
        self.backoff_delay
    }

    fn set_state(&self, state: RunnerState) {
        self.status.update(&self.source_id, |s| s.state = state);
    }

    /// Run one poll cycle
    ///
    /// Returns the cycle record whether it completed or aborted on a fetch
    /// error. Only a dedup store failure is returned as `Err`.
    #[instrument(skip(self), fields(source = %self.source_id))]
    pub async fn run_cycle(&mut self) -> Result<PollCycle, PipelineError> {
        let mut cycle = PollCycle::start(&self.source_id);
        debug!(cycle_id = %cycle.id, "Starting cycle");

        self.set_state(RunnerState::Polling);
        let fetched = match tokio::time::timeout(
            self.settings.fetch_timeout,
            self.adapter.fetch(self.cursor.as_deref()),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(FetchError::transient(format!(
                "fetch timed out after {:?}",
                self.settings.fetch_timeout
            ))),
        };

        let batch = match fetched {
            Ok(batch) => batch,
            Err(e) => {
                self.enter_backoff(&e);
                let err = e.for_source(&self.source_id);
                warn!(
                    cycle_id = %cycle.id,
                    failures = self.consecutive_failures,
                    delay_ms = self.backoff_delay.map(|d| d.as_millis() as u64).unwrap_or(0),
                    error = %err,
                    "Fetch failed, backing off"
                );
                cycle.abort(&err);
                self.publish(&cycle);
                return Ok(cycle);
            }
        };

        let next_cursor = batch.cursor;
        let mut raw = batch.items;
        if let Some(max) = self.settings.max_items {
            raw.truncate(max);
        }
        if self.settings.oldest_first {
            raw.reverse();
        }
        cycle.raw_item_count = raw.len();

        self.set_state(RunnerState::Filtering);
        let mut items = Vec::with_capacity(raw.len());
        for record in &raw {
            match self.normalizer.normalize(record) {
                Ok(item) => items.push(item),
                Err(e) => {
                    cycle.malformed += 1;
                    warn!(cycle_id = %cycle.id, error = %e, "Skipping malformed item");
                }
            }
        }

        let fresh = self.store.filter_new(&self.source_id, items).await;
        cycle.new_item_count = fresh.len();

        let mut delivered_before = false;
        for item in fresh {
            if let Err(e) = self
                .process_item(item, &mut cycle, &mut delivered_before)
                .await
            {
                error!(cycle_id = %cycle.id, error = %e, "Dedup store failure, stopping");
                cycle.abort(&e);
                self.publish(&cycle);
                return Err(e);
            }
        }

        // A conditional fetch would hide items that failed this cycle
        if cycle.failed == 0 {
            if next_cursor.is_some() {
                self.cursor = next_cursor;
            }
        } else {
            self.cursor = None;
        }

        self.consecutive_failures = 0;
        self.backoff_delay = None;
        cycle.complete();

        info!(
            cycle_id = %cycle.id,
            raw = cycle.raw_item_count,
            new = cycle.new_item_count,
            delivered = cycle.delivered,
            dropped = cycle.dropped,
            malformed = cycle.malformed,
            failed = cycle.failed,
            duration_ms = cycle.duration_ms().unwrap_or(0),
            "Cycle completed"
        );
        self.publish(&cycle);
        Ok(cycle)
    }

    /// Transform, deliver and commit one new item; only store errors escape
    async fn process_item(
        &self,
        item: Item,
        cycle: &mut PollCycle,
        delivered_before: &mut bool,
    ) -> Result<(), PipelineError> {
        let identity = item.identity.clone();

        self.set_state(RunnerState::Transforming);
        let item = match self.transforms.apply(item).await {
            Ok(TransformOutcome::Keep(item)) => item,
            Ok(TransformOutcome::Dropped { reason }) => {
                cycle.dropped += 1;
                debug!(identity = %identity, reason = %reason, "Item dropped");
                if self.settings.mark_seen_on_drop {
                    self.store
                        .mark_seen(&self.source_id, &identity, Utc::now())
                        .await?;
                }
                return Ok(());
            }
            Err(e) => {
                cycle.failed += 1;
                warn!(identity = %identity, error = %e, "Transform failed, skipping item");
                return Ok(());
            }
        };

        self.set_state(RunnerState::Delivering);
        if *delivered_before && !self.settings.spacing.is_zero() {
            tokio::time::sleep(self.settings.spacing).await;
        }
        *delivered_before = true;

        let formatted = FormattedItem::from_item(&item);
        match self.dispatcher.dispatch(&formatted).await {
            Ok(()) => {
                let record = SeenRecord::new(&self.source_id, &identity, Utc::now())
                    .with_digest(item.payload_digest());
                self.store.commit(record).await?;
                cycle.delivered += 1;
            }
            Err(e) => {
                cycle.failed += 1;
                warn!(identity = %identity, error = %e, "Delivery failed, item stays unseen");
            }
        }
        Ok(())
    }

    fn enter_backoff(&mut self, error: &FetchError) {
        self.consecutive_failures += 1;
        let delay = self.settings.backoff.next_delay(
            self.backoff_delay,
            self.consecutive_failures,
            error.kind,
        );
        self.backoff_delay = Some(delay);
    }

    fn publish(&self, cycle: &PollCycle) {
        let failures = self.consecutive_failures;
        let state = match self.backoff_delay {
            Some(delay) if !cycle.is_success() => RunnerState::Backoff {
                until: Utc::now() + chrono_duration(delay),
            },
            _ => RunnerState::Idle,
        };
        self.status.update(&self.source_id, |s| {
            s.state = state;
            s.last_cycle = Some(cycle.clone());
            s.consecutive_failures = failures;
        });
    }

    /// Wait before the next continuous cycle
    ///
    /// After a failure this is the larger of the regular interval and the
    /// backoff delay, so backoff never polls a source faster than normal.
    pub fn next_delay(&self, interval: &PollInterval) -> Duration {
        let regular = interval.next_delay();
        match self.backoff_delay {
            Some(backoff) => regular.max(backoff),
            None => regular,
        }
    }

    /// Run cycles until cancelled, using the source's configured interval
    pub async fn run_forever(&mut self, cancel: CancellationToken) -> Result<(), PipelineError> {
        let interval = self.settings.interval.clone();
        self.run_with_interval(interval, cancel).await
    }

    /// Run cycles until cancelled
    ///
    /// Cancellation is only observed between cycles: an in-flight cycle
    /// always finishes and commits what it delivered.
    pub async fn run_with_interval(
        &mut self,
        interval: PollInterval,
        cancel: CancellationToken,
    ) -> Result<(), PipelineError> {
        info!(source = %self.source_id, interval_secs = interval.base.as_secs(), "Runner started");

        while !cancel.is_cancelled() {
            self.run_cycle().await?;

            let delay = self.next_delay(&interval);
            let next = Utc::now() + chrono_duration(delay);
            self.status.update(&self.source_id, |s| s.next_poll_at = Some(next));
            debug!(
                source = %self.source_id,
                delay_ms = delay.as_millis() as u64,
                "Sleeping until next cycle"
            );

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.status.update(&self.source_id, |s| {
            s.next_poll_at = None;
            if !matches!(s.state, RunnerState::Backoff { .. }) {
                s.state = RunnerState::Idle;
            }
        });
        info!(source = %self.source_id, "Runner stopped");
        Ok(())
    }
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(365))
}
