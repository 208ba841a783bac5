//! Domain types for the feedwatch pipeline.
//!
//! This module contains the core data structures:
//! - Item: Normalized content with a stable identity
//! - SeenRecord: Durable proof of delivery
//! - PollCycle: Observability record of one cycle
//! - FormattedItem: Sink-ready rendering

pub mod cycle;
pub mod formatted;
pub mod item;
pub mod seen;

// Re-export commonly used types
pub use cycle::{CycleOutcome, PollCycle, RunnerState, SourceStatus};
pub use formatted::FormattedItem;
pub use item::{IdentityFn, IdentityScheme, Item, ItemPayload, Normalizer, RawItem, TimeBucket};
pub use seen::SeenRecord;
