//! Durable checkpoint store over the article CSV
//!
//! Makes runs idempotent and crash-safe: terminal outcomes are appended one
//! row at a time under a single writer lock, the done-set is rebuilt from the
//! file at startup, and `prune_and_rewrite` drops stale unresolved rows left
//! behind by an interrupted run.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::record::ArticleRecord;

/// Read every row of an article CSV. Missing file reads as empty.
pub fn read_records(path: &Path) -> Result<Vec<ArticleRecord>> {
    if !path.exists() {
        debug!(?path, "read_records: file does not exist");
        return Ok(Vec::new());
    }

    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let mut records = Vec::new();
    for row in reader.deserialize() {
        let record: ArticleRecord =
            row.with_context(|| format!("malformed row in {}", path.display()))?;
        records.push(record);
    }

    debug!(?path, rows = records.len(), "read_records: loaded");
    Ok(records)
}

/// Row counts by terminal class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreSummary {
    pub done: usize,
    pub sentinel: usize,
    pub unresolved: usize,
}

/// Append-only terminal-outcome store keyed by article URL.
pub struct CheckpointStore {
    path: PathBuf,
    /// Serializes the physical append so concurrent completions never
    /// interleave a partially written row.
    write_lock: Mutex<()>,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keys already terminally recorded (success or sentinel). Unresolved
    /// rows are deliberately absent so the next run retries them.
    pub fn done_keys(&self) -> Result<HashSet<String>> {
        let records = read_records(&self.path)?;
        Ok(records
            .into_iter()
            .filter(ArticleRecord::is_done)
            .map(|r| r.url)
            .collect())
    }

    /// Input rows whose key is not yet done.
    pub fn remaining(&self, inputs: Vec<ArticleRecord>) -> Result<Vec<ArticleRecord>> {
        let done = self.done_keys()?;
        let total = inputs.len();
        let pending: Vec<ArticleRecord> = inputs
            .into_iter()
            .filter(|r| !done.contains(&r.url))
            .collect();
        info!(total, done = done.len(), pending = pending.len(), "backlog computed");
        Ok(pending)
    }

    /// Durably append one terminal row.
    ///
    /// The csv crate is synchronous, so the physical write runs on the
    /// blocking pool; the lock still serializes writers so rows never
    /// interleave.
    pub async fn append(&self, record: &ArticleRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let path = self.path.clone();
        let row = record.clone();
        tokio::task::spawn_blocking(move || append_row(&path, &row)).await??;

        debug!(url = %record.url, "checkpoint row appended");
        Ok(())
    }

    /// Rewrite the store keeping only done rows (first occurrence per key),
    /// dropping unresolved artifacts from earlier runs. Returns the number
    /// of rows removed.
    pub async fn prune_and_rewrite(&self) -> Result<usize> {
        let _guard = self.write_lock.lock().await;

        let path = self.path.clone();
        let (removed, kept) = tokio::task::spawn_blocking(move || prune_file(&path)).await??;

        if removed == 0 {
            debug!("prune: nothing to drop");
        } else {
            info!(removed, kept, "checkpoint store pruned");
        }
        Ok(removed)
    }

    /// Count rows by terminal class.
    pub fn summary(&self) -> Result<StoreSummary> {
        let records = read_records(&self.path)?;
        let mut summary = StoreSummary::default();
        for record in &records {
            if record.is_sentinel() {
                summary.sentinel += 1;
            } else if record.is_done() {
                summary.done += 1;
            } else {
                summary.unresolved += 1;
            }
        }
        Ok(summary)
    }
}

/// Physical append, run on the blocking pool under the store's write lock.
fn append_row(path: &Path, record: &ArticleRecord) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let write_header = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(write_header)
        .from_writer(file);
    writer.serialize(record)?;
    writer.flush()?;
    Ok(())
}

/// Physical prune, run on the blocking pool under the store's write lock.
/// Returns (rows removed, rows kept).
fn prune_file(path: &Path) -> Result<(usize, usize)> {
    let records = read_records(path)?;
    let original = records.len();

    let mut seen = HashSet::new();
    let kept: Vec<ArticleRecord> = records
        .into_iter()
        .filter(|r| r.is_done() && seen.insert(r.url.clone()))
        .collect();

    let removed = original - kept.len();
    if removed == 0 {
        return Ok((0, kept.len()));
    }

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to rewrite {}", path.display()))?;
    for record in &kept {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok((removed, kept.len()))
}
