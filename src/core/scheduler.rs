//! Scheduling across sources.
//!
//! Each source runs on its own task. Sources share nothing but the dedup
//! store and the status board, so a slow or failing source never holds up
//! another.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::dedup_store::DedupStore;
use super::error::PipelineError;
use super::policy::PollInterval;
use super::runner::{SourceRunner, StatusBoard};
use crate::domain::{PollCycle, SourceStatus};

/// Errors from scheduler operations
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Unknown source '{0}'")]
    UnknownSource(String),

    #[error("Source '{0}' is already registered")]
    DuplicateSource(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Runner task for '{source_id}' failed: {message}")]
    Task { source_id: String, message: String },
}

/// Owns every source runner
pub struct Scheduler {
    runners: BTreeMap<String, Arc<AsyncMutex<SourceRunner>>>,
    status: StatusBoard,
    store: Arc<DedupStore>,
}

impl Scheduler {
    pub fn new(store: Arc<DedupStore>) -> Self {
        Self {
            runners: BTreeMap::new(),
            status: StatusBoard::new(),
            store,
        }
    }

    pub fn store(&self) -> &Arc<DedupStore> {
        &self.store
    }

    /// Register a runner; it reports into this scheduler's status board
    pub fn add(&mut self, runner: SourceRunner) -> Result<(), SchedulerError> {
        let id = runner.source_id().to_string();
        if self.runners.contains_key(&id) {
            return Err(SchedulerError::DuplicateSource(id));
        }
        let runner = runner.with_status_board(self.status.clone());
        self.runners.insert(id, Arc::new(AsyncMutex::new(runner)));
        Ok(())
    }

    /// Registered source ids, sorted
    pub fn source_ids(&self) -> Vec<String> {
        self.runners.keys().cloned().collect()
    }

    fn runner(&self, source_id: &str) -> Result<Arc<AsyncMutex<SourceRunner>>, SchedulerError> {
        self.runners
            .get(source_id)
            .cloned()
            .ok_or_else(|| SchedulerError::UnknownSource(source_id.to_string()))
    }

    /// Run a single cycle of one source
    pub async fn run_once(&self, source_id: &str) -> Result<PollCycle, SchedulerError> {
        let runner = self.runner(source_id)?;
        let mut runner = runner.lock().await;
        Ok(runner.run_cycle().await?)
    }

    /// Run one cycle of every given source concurrently
    ///
    /// Results come back sorted by source id. An empty `source_ids` means
    /// every registered source.
    pub async fn run_once_many(
        &self,
        source_ids: &[String],
    ) -> Result<Vec<(String, Result<PollCycle, PipelineError>)>, SchedulerError> {
        let selected = self.select(source_ids)?;

        let mut tasks = JoinSet::new();
        for (id, runner) in selected {
            tasks.spawn(async move {
                let mut runner = runner.lock().await;
                (id, runner.run_cycle().await)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!(error = %e, "Runner task panicked");
                    return Err(SchedulerError::Task {
                        source_id: "unknown".to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
        results.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(results)
    }

    /// Run one source continuously until cancelled
    ///
    /// `interval` overrides the source's configured interval.
    pub async fn run_forever(
        &self,
        source_id: &str,
        interval: Option<PollInterval>,
        cancel: CancellationToken,
    ) -> Result<(), SchedulerError> {
        let runner = self.runner(source_id)?;
        let mut runner = runner.lock().await;
        match interval {
            Some(interval) => runner.run_with_interval(interval, cancel).await?,
            None => runner.run_forever(cancel).await?,
        }
        Ok(())
    }

    /// Run the given sources (or all) continuously until cancelled
    ///
    /// A dedup store failure in any runner is fatal: every other runner is
    /// cancelled at its next cycle boundary and the error is returned.
    pub async fn run_forever_many(
        &self,
        source_ids: &[String],
        interval: Option<PollInterval>,
        cancel: CancellationToken,
    ) -> Result<(), SchedulerError> {
        let selected = self.select(source_ids)?;
        info!(sources = selected.len(), "Starting continuous mode");

        let shutdown = cancel.child_token();
        let mut tasks = JoinSet::new();
        for (id, runner) in selected {
            let token = shutdown.clone();
            let interval = interval.clone();
            tasks.spawn(async move {
                let mut runner = runner.lock().await;
                let result = match interval {
                    Some(interval) => runner.run_with_interval(interval, token).await,
                    None => runner.run_forever(token).await,
                };
                (id, result)
            });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let failure = match joined {
                Ok((_, Ok(()))) => None,
                Ok((id, Err(e))) => {
                    error!(source = %id, error = %e, "Runner stopped on fatal error");
                    Some(SchedulerError::Pipeline(e))
                }
                Err(e) => {
                    error!(error = %e, "Runner task panicked");
                    Some(SchedulerError::Task {
                        source_id: "unknown".to_string(),
                        message: e.to_string(),
                    })
                }
            };
            if let Some(err) = failure {
                shutdown.cancel();
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Last known state of every source
    pub fn status(&self) -> Vec<SourceStatus> {
        self.status.snapshot()
    }

    fn select(
        &self,
        source_ids: &[String],
    ) -> Result<Vec<(String, Arc<AsyncMutex<SourceRunner>>)>, SchedulerError> {
        if source_ids.is_empty() {
            return Ok(self
                .runners
                .iter()
                .map(|(id, r)| (id.clone(), Arc::clone(r)))
                .collect());
        }
        source_ids
            .iter()
            .map(|id| Ok((id.clone(), self.runner(id)?)))
            .collect()
    }
}
