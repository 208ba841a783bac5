//! Durable, per-source record of delivered identities.
//!
//! Each source gets its own append-only log, `<root>/<source_id>.jsonl`, one
//! [`SeenRecord`] per line. The logs are human-auditable and replayed into
//! an in-memory index at startup, so `has_seen` is a hash lookup.
//!
//! Partitions are independent: each sits behind its own async mutex, so
//! commits for one source never wait on another.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use super::error::PipelineError;
use crate::domain::{Item, SeenRecord};

/// Compaction is skipped for logs shorter than this
const MIN_COMPACT_LINES: usize = 64;

/// Bounded-retention settings for one source
///
/// Eviction forgets the oldest identities. Pick bounds well beyond what the
/// upstream can still return, or evicted items will be delivered again.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Retention {
    /// Keep at most this many identities
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_records: Option<usize>,

    /// Forget identities delivered longer ago than this
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_days: Option<u64>,
}

impl Retention {
    pub fn is_unbounded(&self) -> bool {
        self.max_records.is_none() && self.max_age_days.is_none()
    }
}

/// One source's slice of the store
#[derive(Debug)]
struct Partition {
    path: PathBuf,
    index: HashMap<String, SeenRecord>,
    /// Identities in commit order, oldest first
    order: VecDeque<String>,
    /// Non-empty lines currently in the log file
    lines: usize,
    retention: Retention,
}

impl Partition {
    fn empty(path: PathBuf) -> Self {
        Self {
            path,
            index: HashMap::new(),
            order: VecDeque::new(),
            lines: 0,
            retention: Retention::default(),
        }
    }

    fn insert(&mut self, record: SeenRecord) -> bool {
        if self.index.contains_key(&record.identity) {
            return false;
        }
        self.order.push_back(record.identity.clone());
        self.index.insert(record.identity.clone(), record);
        true
    }

    /// Drop identities outside the retention bounds; returns how many
    fn evict(&mut self, now: DateTime<Utc>) -> usize {
        let mut evicted = 0;

        // Timestamps are caller-supplied and need not follow commit order
        if let Some(days) = self.retention.max_age_days {
            let cutoff = now - ChronoDuration::days(days as i64);
            let index = &mut self.index;
            self.order.retain(|id| {
                let expired = index.get(id).map(|r| r.delivered_at < cutoff).unwrap_or(true);
                if expired {
                    index.remove(id);
                    evicted += 1;
                }
                !expired
            });
        }

        if let Some(max) = self.retention.max_records {
            while self.order.len() > max {
                if let Some(id) = self.order.pop_front() {
                    self.index.remove(&id);
                    evicted += 1;
                }
            }
        }

        evicted
    }

    fn needs_compaction(&self) -> bool {
        self.lines > MIN_COMPACT_LINES && self.lines > 2 * self.index.len()
    }

    fn live_records(&self) -> Vec<SeenRecord> {
        self.order
            .iter()
            .filter_map(|id| self.index.get(id).cloned())
            .collect()
    }
}

/// Persistent dedup store, partitioned by source
pub struct DedupStore {
    root: PathBuf,
    partitions: Mutex<HashMap<String, Arc<AsyncMutex<Partition>>>>,
}

impl std::fmt::Debug for DedupStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupStore")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl DedupStore {
    /// Open the store rooted at `root`, replaying every existing log
    ///
    /// Fails with `StoreUnavailable` if the directory cannot be created or
    /// any log contains a line that does not parse. A torn final line (no
    /// trailing newline, left by a crash mid-append) is cut off instead.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| PipelineError::store(&root, e))?;

        let mut partitions = HashMap::new();
        let mut entries = tokio::fs::read_dir(&root)
            .await
            .map_err(|e| PipelineError::store(&root, e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PipelineError::store(&root, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let Some(source_id) = path.file_stem().and_then(|s| s.to_str()).map(String::from)
            else {
                continue;
            };

            let partition = load_partition(&source_id, path).await?;
            debug!(source = %source_id, records = partition.index.len(), "Loaded dedup log");
            partitions.insert(source_id, Arc::new(AsyncMutex::new(partition)));
        }

        info!(root = %root.display(), sources = partitions.len(), "Dedup store opened");

        Ok(Self {
            root,
            partitions: Mutex::new(partitions),
        })
    }

    /// Directory holding the per-source logs
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a source's log
    pub fn log_path(&self, source_id: &str) -> PathBuf {
        self.root.join(format!("{}.jsonl", source_id))
    }

    fn partition(&self, source_id: &str) -> Result<Arc<AsyncMutex<Partition>>, PipelineError> {
        if !is_valid_source_id(source_id) {
            return Err(PipelineError::store(
                &self.root,
                format!("invalid source id '{}'", source_id),
            ));
        }
        let mut map = self.partitions.lock().unwrap_or_else(|e| e.into_inner());
        let partition = map
            .entry(source_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(Partition::empty(self.log_path(source_id)))));
        Ok(Arc::clone(partition))
    }

    fn existing_partition(&self, source_id: &str) -> Option<Arc<AsyncMutex<Partition>>> {
        let map = self.partitions.lock().unwrap_or_else(|e| e.into_inner());
        map.get(source_id).cloned()
    }

    /// Apply a retention policy to a source, evicting and compacting now
    pub async fn configure_source(
        &self,
        source_id: &str,
        retention: Retention,
    ) -> Result<(), PipelineError> {
        let partition = self.partition(source_id)?;
        let mut part = partition.lock().await;
        part.retention = retention;
        let evicted = part.evict(Utc::now());
        if evicted > 0 {
            debug!(source = %source_id, evicted, "Evicted identities outside retention");
        }
        maybe_compact(&mut part).await
    }

    /// Whether an identity was committed for this source, in any process lifetime
    pub async fn has_seen(&self, source_id: &str, identity: &str) -> bool {
        match self.existing_partition(source_id) {
            Some(partition) => partition.lock().await.index.contains_key(identity),
            None => false,
        }
    }

    /// Record an identity as delivered. Idempotent.
    pub async fn mark_seen(
        &self,
        source_id: &str,
        identity: &str,
        at: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        self.commit(SeenRecord::new(source_id, identity, at)).await
    }

    /// Record a full seen record. Idempotent on `(source_id, identity)`.
    pub async fn commit(&self, record: SeenRecord) -> Result<(), PipelineError> {
        let partition = self.partition(&record.source_id)?;
        let mut part = partition.lock().await;

        if part.index.contains_key(&record.identity) {
            return Ok(());
        }

        let line = encode_line(&record, &part.path)?;
        append_lines(part.path.clone(), line).await?;
        part.lines += 1;
        part.insert(record);

        part.evict(Utc::now());
        maybe_compact(&mut part).await
    }

    /// Commit many identities at once; returns how many were new
    pub async fn import(
        &self,
        source_id: &str,
        identities: impl IntoIterator<Item = String>,
        at: DateTime<Utc>,
    ) -> Result<usize, PipelineError> {
        let partition = self.partition(source_id)?;
        let mut part = partition.lock().await;

        let mut buffer = String::new();
        let mut fresh = Vec::new();
        let mut batch = HashSet::new();
        for identity in identities {
            if part.index.contains_key(&identity) || !batch.insert(identity.clone()) {
                continue;
            }
            let record = SeenRecord::new(source_id, identity, at);
            buffer.push_str(&encode_line(&record, &part.path)?);
            fresh.push(record);
        }

        if fresh.is_empty() {
            return Ok(0);
        }

        append_lines(part.path.clone(), buffer).await?;
        let count = fresh.len();
        part.lines += count;
        for record in fresh {
            part.insert(record);
        }

        part.evict(Utc::now());
        maybe_compact(&mut part).await?;
        Ok(count)
    }

    /// Items not yet seen, in input order
    ///
    /// Does not mark anything seen. Items sharing an identity with an
    /// earlier item in the same batch are dropped, so one cycle never
    /// delivers the same identity twice.
    pub async fn filter_new(&self, source_id: &str, items: Vec<Item>) -> Vec<Item> {
        let partition = self.existing_partition(source_id);
        let guard = match &partition {
            Some(p) => Some(p.lock().await),
            None => None,
        };

        let mut batch = HashSet::new();
        items
            .into_iter()
            .filter(|item| {
                let seen = guard
                    .as_ref()
                    .map(|part| part.index.contains_key(&item.identity))
                    .unwrap_or(false);
                !seen && batch.insert(item.identity.clone())
            })
            .collect()
    }

    /// Live records for a source, oldest first
    pub async fn records(&self, source_id: &str) -> Vec<SeenRecord> {
        match self.existing_partition(source_id) {
            Some(partition) => partition.lock().await.live_records(),
            None => Vec::new(),
        }
    }

    /// Number of live identities for a source
    pub async fn count(&self, source_id: &str) -> usize {
        match self.existing_partition(source_id) {
            Some(partition) => partition.lock().await.index.len(),
            None => 0,
        }
    }

    /// Sources with a partition, sorted
    pub fn sources(&self) -> Vec<String> {
        let map = self.partitions.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = map.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Source ids double as file names
pub fn is_valid_source_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

fn encode_line(record: &SeenRecord, path: &Path) -> Result<String, PipelineError> {
    let json = serde_json::to_string(record).map_err(|e| PipelineError::store(path, e))?;
    Ok(format!("{}\n", json))
}

async fn load_partition(source_id: &str, path: PathBuf) -> Result<Partition, PipelineError> {
    let content = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| PipelineError::store(&path, e))?;

    let mut partition = Partition::empty(path.clone());
    let complete_len = content.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let (complete, tail) = content.split_at(complete_len);

    for (n, line) in complete.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: SeenRecord = serde_json::from_str(line)
            .map_err(|e| PipelineError::store(&path, format!("line {}: {}", n + 1, e)))?;
        if record.source_id != source_id {
            return Err(PipelineError::store(
                &path,
                format!(
                    "line {}: record for '{}' in log of '{}'",
                    n + 1,
                    record.source_id,
                    source_id
                ),
            ));
        }
        partition.lines += 1;
        partition.insert(record);
    }

    if !tail.trim().is_empty() {
        match serde_json::from_str::<SeenRecord>(tail) {
            Ok(record) if record.source_id == source_id => {
                // Complete record missing only its newline
                append_lines(path.clone(), "\n".to_string()).await?;
                partition.lines += 1;
                partition.insert(record);
            }
            _ => {
                warn!(
                    source = %source_id,
                    path = %path.display(),
                    bytes = tail.len(),
                    "Discarding torn final line in dedup log"
                );
                truncate(path.clone(), complete_len as u64).await?;
            }
        }
    }

    Ok(partition)
}

/// Append pre-encoded lines under an exclusive file lock
async fn append_lines(path: PathBuf, lines: String) -> Result<(), PipelineError> {
    let err_path = path.clone();
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.lock_exclusive()?;
        file.write_all(lines.as_bytes())?;
        file.flush()?;
        file.sync_data()?;
        // Lock is released when file is dropped
        Ok(())
    })
    .await
    .map_err(|e| PipelineError::store(&err_path, e))?
    .map_err(|e| PipelineError::store(&err_path, e))
}

async fn truncate(path: PathBuf, len: u64) -> Result<(), PipelineError> {
    let err_path = path.clone();
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let file = OpenOptions::new().write(true).open(&path)?;
        file.lock_exclusive()?;
        file.set_len(len)?;
        file.sync_data()
    })
    .await
    .map_err(|e| PipelineError::store(&err_path, e))?
    .map_err(|e| PipelineError::store(&err_path, e))
}

/// Rewrite the log with only live records once dead lines dominate
async fn maybe_compact(part: &mut Partition) -> Result<(), PipelineError> {
    if !part.needs_compaction() {
        return Ok(());
    }

    let records = part.live_records();
    let mut content = String::new();
    for record in &records {
        content.push_str(&encode_line(record, &part.path)?);
    }

    let path = part.path.clone();
    let err_path = path.clone();
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_data()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(|e| PipelineError::store(&err_path, e))?
    .map_err(|e| PipelineError::store(&err_path, e))?;

    debug!(
        path = %part.path.display(),
        before = part.lines,
        after = records.len(),
        "Compacted dedup log"
    );
    part.lines = records.len();
    Ok(())
}
