//! Command-line interface for feedwatch.
//!
//! Provides commands for polling sources once or continuously, inspecting
//! the dedup store, and importing seen files from older bots.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{self, ResolvedConfig};
use crate::core::legacy::read_legacy_ids;
use crate::core::{DedupStore, PollInterval};
use crate::domain::PollCycle;

/// Process exit code when a one-shot run had a source abort on a fetch error
pub const EXIT_FETCH_FAILED: u8 = 2;

/// feedwatch - Change detection and delivery for polling monitors
#[derive(Parser, Debug)]
#[command(name = "feedwatch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: search for .feedwatch/config.yaml upward)
    #[arg(short, long, global = true, env = "FEEDWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Poll sources and deliver new items
    Run {
        /// Run a single cycle per source and exit
        #[arg(long, conflicts_with = "interval")]
        once: bool,

        /// Poll continuously every N seconds, overriding configured intervals
        #[arg(long, value_name = "SECONDS")]
        interval: Option<u64>,

        /// Only run these sources (repeatable; default: all)
        #[arg(short, long = "source", value_name = "ID")]
        sources: Vec<String>,
    },

    /// Show configured sources and their dedup record counts
    Status,

    /// List a source's seen records, newest last
    Seen {
        /// Source ID
        source_id: String,

        /// Maximum number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Import a seen-items file written by an older bot
    ImportLegacy {
        /// Source ID to import into
        source_id: String,

        /// Path to the legacy JSON file
        path: PathBuf,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<ExitCode> {
        let config = config::load(self.config.as_deref())?;

        match self.command {
            Commands::Run {
                once,
                interval,
                sources,
            } => {
                if once {
                    run_once(&config, &sources).await
                } else {
                    run_continuous(&config, &sources, interval).await
                }
            }
            Commands::Status => show_status(&config).await,
            Commands::Seen { source_id, limit } => list_seen(&config, &source_id, limit).await,
            Commands::ImportLegacy { source_id, path } => {
                import_legacy(&config, &source_id, &path).await
            }
            Commands::Config => show_config(&config),
        }
    }
}

/// One cycle per selected source
async fn run_once(config: &ResolvedConfig, sources: &[String]) -> Result<ExitCode> {
    if config.sources.is_empty() {
        bail!("No sources configured. Add a sources: list to .feedwatch/config.yaml");
    }

    let store = config.open_store().await?;
    let scheduler = config.build_scheduler(store).await?;
    let results = scheduler.run_once_many(sources).await?;

    let mut aborted = 0;
    for (source_id, result) in &results {
        match result {
            Ok(cycle) => {
                print_cycle(cycle);
                if !cycle.is_success() {
                    aborted += 1;
                }
            }
            Err(e) => {
                // Store failures are fatal for the whole process
                eprintln!("{}: {}", source_id, e);
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    if aborted > 0 {
        eprintln!("\n[{} of {} sources aborted]", aborted, results.len());
        return Ok(ExitCode::from(EXIT_FETCH_FAILED));
    }
    Ok(ExitCode::SUCCESS)
}

/// Poll until Ctrl-C
async fn run_continuous(
    config: &ResolvedConfig,
    sources: &[String],
    interval: Option<u64>,
) -> Result<ExitCode> {
    if config.sources.is_empty() {
        bail!("No sources configured. Add a sources: list to .feedwatch/config.yaml");
    }
    if interval == Some(0) {
        bail!("--interval must be at least 1 second");
    }

    let store = config.open_store().await?;
    let scheduler = config.build_scheduler(store).await?;
    let interval = interval.map(|secs| PollInterval::fixed(Duration::from_secs(secs)));

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested, finishing current cycles");
            signal_token.cancel();
        }
    });

    match scheduler.run_forever_many(sources, interval, cancel).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            warn!(error = %e, "Stopped");
            eprintln!("Error: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn print_cycle(cycle: &PollCycle) {
    let state = if cycle.is_success() { "ok" } else { "aborted" };
    println!(
        "{:<24} {:<8} fetched={} new={} delivered={} dropped={} malformed={} failed={}",
        cycle.source_id,
        state,
        cycle.raw_item_count,
        cycle.new_item_count,
        cycle.delivered,
        cycle.dropped,
        cycle.malformed,
        cycle.failed,
    );
    if let Some(error) = &cycle.error {
        println!("{:<24} error: {}", "", error);
    }
}

/// Configured sources with their dedup counts
async fn show_status(config: &ResolvedConfig) -> Result<ExitCode> {
    let store = config.open_store().await?;

    if config.sources.is_empty() && store.sources().is_empty() {
        println!("No sources configured");
        return Ok(ExitCode::SUCCESS);
    }

    println!(
        "{:<24} {:<6} {:<8} {:<26}",
        "SOURCE", "KIND", "SEEN", "LAST DELIVERY"
    );
    println!("{}", "-".repeat(66));

    for source in &config.sources {
        let records = store.records(&source.id).await;
        let last = records
            .iter()
            .map(|r| r.delivered_at)
            .max()
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "-".to_string());
        let kind = match source.kind {
            config::SourceKind::Rss => "rss",
            config::SourceKind::Json => "json",
        };
        println!("{:<24} {:<6} {:<8} {:<26}", source.id, kind, records.len(), last);
    }

    // Logs left behind by sources no longer in the config
    for id in store.sources() {
        if config.source(&id).is_none() {
            println!("{:<24} {:<6} {:<8} {:<26}", id, "-", store.count(&id).await, "(not configured)");
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Print the newest `limit` records of a source
async fn list_seen(config: &ResolvedConfig, source_id: &str, limit: usize) -> Result<ExitCode> {
    let store = config.open_store().await?;
    let records = store.records(source_id).await;

    if records.is_empty() {
        println!("No records for '{}'", source_id);
        return Ok(ExitCode::SUCCESS);
    }

    let skip = records.len().saturating_sub(limit);
    for record in &records[skip..] {
        println!(
            "{}  {}",
            record.delivered_at.format("%Y-%m-%d %H:%M:%S"),
            record.identity
        );
    }
    eprintln!(
        "\n[{} of {} records, log: {}]",
        records.len() - skip,
        records.len(),
        store.log_path(source_id).display()
    );

    Ok(ExitCode::SUCCESS)
}

/// Seed a source's dedup log from a legacy file
///
/// Ids are keyed through the source's identity scheme when the source is
/// configured with a single-field scheme, so they match what the runner
/// computes for the same records.
async fn import_legacy(
    config: &ResolvedConfig,
    source_id: &str,
    path: &std::path::Path,
) -> Result<ExitCode> {
    let ids = read_legacy_ids(path)?;
    let scheme = config
        .source(source_id)
        .map(|s| s.identity_scheme())
        .filter(|s| s.fields.len() == 1 && s.time_bucket.is_none());

    let identities: Vec<String> = match &scheme {
        Some(scheme) => ids.iter().map(|id| scheme.key_from_parts(&[id.as_str()])).collect(),
        None => ids,
    };

    let store = DedupStore::open(&config.seen_dir)
        .await
        .with_context(|| format!("Failed to open dedup store at {}", config.seen_dir.display()))?;
    let total = identities.len();
    let added = store
        .import(source_id, identities, Utc::now())
        .await
        .with_context(|| format!("Failed to import into '{}'", source_id))?;

    println!(
        "Imported {} new identities into '{}' ({} already present)",
        added,
        source_id,
        total - added
    );
    Ok(ExitCode::SUCCESS)
}

/// Show resolved configuration
fn show_config(config: &ResolvedConfig) -> Result<ExitCode> {
    println!("Resolved feedwatch configuration:\n");

    match &config.config_file {
        Some(path) => println!("Config file: {}", path.display()),
        None => println!("Config file: (none found, using defaults)"),
    }
    println!("Home:        {}", config.home.display());
    println!("Seen logs:   {}", config.seen_dir.display());

    println!("\nGenerators:");
    if config.generators.is_empty() {
        println!("  (none)");
    }
    for (name, generator) in &config.generators {
        println!("  {} -> {}", name, generator.model);
    }

    println!("\nSources:");
    if config.sources.is_empty() {
        println!("  (none)");
    }
    for source in &config.sources {
        let effective = source.effective(&config.defaults);
        println!("  {}", source.id);
        println!("    url:        {}", source.url);
        println!("    identity:   {}", source.identity_scheme().fields.join(" + "));
        println!(
            "    interval:   {}s (jitter {}s)",
            effective.settings.interval.base.as_secs(),
            effective.settings.interval.jitter.as_secs()
        );
        println!("    transforms: {}", source.transforms.len());
        println!("    sinks:      {}", source.sinks.len());
    }

    if let Err(e) = config.validate() {
        println!("\nInvalid: {:#}", e);
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
