//! Poll cycles and per-source runner state.
//!
//! A [`PollCycle`] is the observability record of one fetch/filter/deliver
//! pass. It is logged and kept as the source's "last cycle" for `status()`,
//! never persisted.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One pass over a source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollCycle {
    /// Unique identifier for this cycle (for log correlation)
    pub id: Uuid,

    pub source_id: String,

    pub started_at: DateTime<Utc>,

    pub finished_at: Option<DateTime<Utc>>,

    /// Records returned by the adapter (after the per-run cap)
    pub raw_item_count: usize,

    /// Items that were not yet seen
    pub new_item_count: usize,

    /// Items delivered to every sink and committed
    pub delivered: usize,

    /// Items a transform dropped
    pub dropped: usize,

    /// Records that failed normalization
    pub malformed: usize,

    /// Items that failed a transform or delivery
    pub failed: usize,

    /// Cycle-level error, set when the cycle aborted
    pub error: Option<String>,

    pub outcome: CycleOutcome,
}

impl PollCycle {
    pub fn start(source_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_id: source_id.into(),
            started_at: Utc::now(),
            finished_at: None,
            raw_item_count: 0,
            new_item_count: 0,
            delivered: 0,
            dropped: 0,
            malformed: 0,
            failed: 0,
            error: None,
            outcome: CycleOutcome::InProgress,
        }
    }

    /// Mark the cycle complete; per-item failures do not fail the cycle
    pub fn complete(&mut self) {
        self.finished_at = Some(Utc::now());
        self.outcome = CycleOutcome::Completed;
    }

    /// Mark the cycle aborted by a cycle-level error
    pub fn abort(&mut self, error: impl fmt::Display) {
        self.finished_at = Some(Utc::now());
        self.error = Some(error.to_string());
        self.outcome = CycleOutcome::Aborted;
    }

    pub fn is_success(&self) -> bool {
        self.outcome == CycleOutcome::Completed
    }

    /// Duration in milliseconds, if finished
    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}

/// How a cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    InProgress,
    Completed,
    Aborted,
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProgress => write!(f, "in progress"),
            Self::Completed => write!(f, "completed"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Per-source runner state machine
///
/// `Idle -> Polling -> Filtering -> Transforming -> Delivering -> Idle`,
/// plus `Idle -> Backoff -> Idle` after a fetch failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum RunnerState {
    Idle,
    Polling,
    Filtering,
    Transforming,
    Delivering,
    Backoff { until: DateTime<Utc> },
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Polling => write!(f, "polling"),
            Self::Filtering => write!(f, "filtering"),
            Self::Transforming => write!(f, "transforming"),
            Self::Delivering => write!(f, "delivering"),
            Self::Backoff { until } => write!(f, "backoff until {}", until.format("%H:%M:%S")),
        }
    }
}

/// Snapshot of a source for `status()`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceStatus {
    pub source_id: String,
    pub state: RunnerState,
    pub last_cycle: Option<PollCycle>,
    pub consecutive_failures: u32,
    pub next_poll_at: Option<DateTime<Utc>>,
}

impl SourceStatus {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            state: RunnerState::Idle,
            last_cycle: None,
            consecutive_failures: 0,
            next_poll_at: None,
        }
    }
}
