//! Core change-detection pipeline.
//!
//! This module contains:
//! - DedupStore: Durable per-source record of delivered identities
//! - Dispatcher: Fan-out delivery with retry
//! - SourceRunner: One source's poll cycle state machine
//! - Scheduler: Independent runners across sources
//! - Policies: Retry, backoff and poll intervals

pub mod dedup_store;
pub mod delivery;
pub mod error;
pub mod legacy;
pub mod policy;
pub mod runner;
pub mod scheduler;

// Re-export commonly used types
pub use dedup_store::{DedupStore, Retention};
pub use delivery::Dispatcher;
pub use error::{FetchError, FetchErrorKind, GenerationError, IdentityError, PipelineError};
pub use policy::{BackoffPolicy, PollInterval, RetryPolicy};
pub use runner::{SourceRunner, SourceSettings, StatusBoard};
pub use scheduler::{Scheduler, SchedulerError};
