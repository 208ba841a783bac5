//! Delivery of one item to every configured sink, with retry.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::error::PipelineError;
use super::policy::RetryPolicy;
use crate::adapters::{DeliveryResult, Sink};
use crate::domain::FormattedItem;

/// Fans an item out to a source's sinks
///
/// An item counts as delivered only once every sink has accepted it.
/// Retryable failures are retried with backoff, re-sending only to the
/// sinks that have not succeeded yet. A permanent failure on any sink ends
/// the attempt immediately.
#[derive(Clone)]
pub struct Dispatcher {
    sinks: Vec<Arc<dyn Sink>>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("sinks", &self.sinks.iter().map(|s| s.name().to_string()).collect::<Vec<_>>())
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Dispatcher {
    pub fn new(sinks: Vec<Arc<dyn Sink>>, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            sinks,
            retry,
            timeout,
        }
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    async fn attempt(&self, sink: &dyn Sink, item: &FormattedItem) -> DeliveryResult {
        match tokio::time::timeout(self.timeout, sink.deliver(item)).await {
            Ok(result) => result,
            Err(_) => DeliveryResult::retryable(format!("timed out after {:?}", self.timeout)),
        }
    }

    /// Deliver to every sink; `Err(PipelineError::Delivery)` if any sink never accepted it
    pub async fn dispatch(&self, item: &FormattedItem) -> Result<(), PipelineError> {
        let mut pending: Vec<&Arc<dyn Sink>> = self.sinks.iter().collect();
        let mut attempt = 1u32;

        loop {
            let mut still_pending = Vec::new();
            let mut last_failure = None;

            for sink in pending {
                match self.attempt(sink.as_ref(), item).await {
                    DeliveryResult::Success => {
                        debug!(
                            source = %item.source_id,
                            identity = %item.identity,
                            sink = sink.name(),
                            attempt,
                            "Delivered"
                        );
                    }
                    DeliveryResult::Failure { reason, retryable } => {
                        if !retryable {
                            return Err(PipelineError::Delivery {
                                sink: sink.name().to_string(),
                                reason,
                                retryable: false,
                            });
                        }
                        last_failure = Some((sink.name().to_string(), reason));
                        still_pending.push(sink);
                    }
                }
            }

            let Some((sink, reason)) = last_failure else {
                return Ok(());
            };

            if !self.retry.should_retry(attempt) {
                return Err(PipelineError::Delivery {
                    sink,
                    reason: format!("{} (gave up after {} attempts)", reason, attempt),
                    retryable: true,
                });
            }

            let delay = self.retry.delay_for_attempt(attempt);
            warn!(
                source = %item.source_id,
                identity = %item.identity,
                sink = %sink,
                attempt,
                pending = still_pending.len(),
                delay_ms = delay.as_millis() as u64,
                error = %reason,
                "Delivery failed, retrying"
            );
            tokio::time::sleep(delay).await;

            pending = still_pending;
            attempt += 1;
        }
    }
}
