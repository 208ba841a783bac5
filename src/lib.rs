//! feedwatch - Change detection and delivery for polling monitors
//!
//! Polls upstream sources (RSS feeds, JSON APIs), works out which records
//! are new, and delivers each new item once to one or more sinks (Discord
//! webhooks, Telegram chats).
//!
//! # Architecture
//!
//! The system is built around a durable dedup log:
//! - Every delivered identity is appended to a per-source JSONL log
//! - The in-memory index is rebuilt by replaying the log on startup
//! - An identity is committed only after every sink accepted the item, so a
//!   crash re-delivers rather than loses (at-least-once)
//!
//! # Modules
//!
//! - `adapters`: Source adapters, sinks and the generation backend
//! - `core`: Dedup store, delivery, runners and scheduling
//! - `domain`: Data structures (Item, SeenRecord, PollCycle)
//! - `transform`: Keyword filter, image selection, article generation
//! - `config`: YAML configuration and runner construction
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Poll every source once
//! feedwatch run --once
//!
//! # Poll continuously, every 5 minutes
//! feedwatch run --interval 300
//!
//! # Inspect what a source has delivered
//! feedwatch seen sheriff_news
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod transform;

// Re-export main types at crate root for convenience
pub use adapters::{DeliveryResult, FetchBatch, Generator, Sink, SourceAdapter};
pub use core::{DedupStore, Dispatcher, PipelineError, Scheduler, SourceRunner, SourceSettings};
pub use domain::{FormattedItem, IdentityScheme, Item, Normalizer, PollCycle, SeenRecord};
pub use transform::{Transform, TransformOutcome, TransformPipeline};
