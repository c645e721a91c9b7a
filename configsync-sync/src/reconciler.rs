//! Reconciliation passes: scan the entry store for records changed since a
//! checkpoint and materialize them under the local root.
//!
//! The checkpoint moves to "now" *before* the scan is read, so a record
//! written while a pass is running is picked up by the next pass. Seeing a
//! record twice is harmless (the mtime gate turns the second write into a
//! no-op); missing one is not.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use configsync_core::{now_millis, Entry, Settings};
use configsync_store::{EntryStore, Hit, ScanCursor};

use crate::error::SyncError;
use crate::path;
use crate::writer::{self, WriteResult};

// ---------------------------------------------------------------------------
// Checkpoint / termination
// ---------------------------------------------------------------------------

/// Low-water mark of the next scan. Process-local, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    last_checked: DateTime<Utc>,
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self::at(Utc.timestamp_millis_opt(0).single().unwrap_or_default())
    }
}

impl Checkpoint {
    pub fn at(last_checked: DateTime<Utc>) -> Self {
        Self { last_checked }
    }

    pub fn last_checked(&self) -> DateTime<Utc> {
        self.last_checked
    }

    /// Move to `now` and return the previous value (the scan's `since`).
    pub fn advance(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        std::mem::replace(&mut self.last_checked, now)
    }
}

/// Cooperative cancellation for a pass. Checked at pass entry and before
/// every page; in-flight file writes are never interrupted.
#[derive(Debug, Clone, Default)]
pub struct TerminationFlag(Arc<AtomicBool>);

impl TerminationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn terminate(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_terminated(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Pass report
// ---------------------------------------------------------------------------

/// Summary of one completed pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    pub since: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub pages: usize,
    pub written: usize,
    pub unchanged: usize,
    /// Records whose path cannot be materialized under the root.
    pub rejected: usize,
    /// Records that failed to decode or to write.
    pub failed: usize,
    pub duration_ms: u64,
}

impl PassReport {
    fn new(since: DateTime<Utc>, started_at: DateTime<Utc>) -> Self {
        Self {
            since,
            started_at,
            pages: 0,
            written: 0,
            unchanged: 0,
            rejected: 0,
            failed: 0,
            duration_ms: 0,
        }
    }

    /// Records seen by the pass.
    pub fn records(&self) -> usize {
        self.written + self.unchanged + self.rejected + self.failed
    }

    fn tally(&mut self, outcome: &Result<WriteResult, SyncError>) {
        match outcome {
            Ok(WriteResult::Written { .. }) => self.written += 1,
            Ok(WriteResult::Unchanged { .. }) => self.unchanged += 1,
            Err(SyncError::PathRejected { .. }) => self.rejected += 1,
            Err(_) => self.failed += 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// Owns the shared checkpoint and runs passes against one local root.
pub struct Reconciler {
    store: EntryStore,
    root: PathBuf,
    page_size: usize,
    keep_alive: Duration,
    checkpoint: Mutex<Checkpoint>,
    scheduled: Mutex<()>,
}

impl Reconciler {
    pub fn new(store: EntryStore, settings: &Settings) -> Self {
        Self::with_options(
            store,
            settings.sync.config_path.clone(),
            settings.scroll_size(),
            settings.scroll_time(),
        )
    }

    pub fn with_options(
        store: EntryStore,
        root: PathBuf,
        page_size: usize,
        keep_alive: Duration,
    ) -> Self {
        Self {
            store,
            root,
            page_size: page_size.max(1),
            keep_alive,
            checkpoint: Mutex::new(Checkpoint::default()),
            scheduled: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> &EntryStore {
        &self.store
    }

    pub async fn checkpoint(&self) -> Checkpoint {
        *self.checkpoint.lock().await
    }

    /// Scheduler-driven pass: advances the shared checkpoint. Concurrent
    /// callers queue behind each other.
    pub async fn run_pass(&self, flag: &TerminationFlag) -> Result<PassReport, SyncError> {
        let _running = self.scheduled.lock().await;
        if flag.is_terminated() {
            return Err(SyncError::Terminated);
        }
        let since = self.checkpoint.lock().await.advance(now_millis());
        self.execute(since, flag).await
    }

    /// Flush pass: works from a copy of the checkpoint and leaves the shared
    /// one untouched. May overlap a scheduled pass.
    pub async fn flush_pass(&self, flag: &TerminationFlag) -> Result<PassReport, SyncError> {
        if flag.is_terminated() {
            return Err(SyncError::Terminated);
        }
        let mut copy = self.checkpoint().await;
        let since = copy.advance(now_millis());
        self.execute(since, flag).await
    }

    async fn execute(
        &self,
        since: DateTime<Utc>,
        flag: &TerminationFlag,
    ) -> Result<PassReport, SyncError> {
        let clock = Instant::now();
        let mut report = PassReport::new(since, now_millis());
        tracing::debug!(since = %since, root = %self.root.display(), "starting pass");

        let mut scan = self.store.scan(since, self.page_size, self.keep_alive).await?;
        let drained = self.drain(&mut scan, flag, &mut report).await;
        scan.close().await;
        drained?;

        report.duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);
        if report.records() > 0 {
            tracing::info!(
                pages = report.pages,
                written = report.written,
                unchanged = report.unchanged,
                rejected = report.rejected,
                failed = report.failed,
                duration_ms = report.duration_ms,
                "pass complete"
            );
        }
        Ok(report)
    }

    async fn drain(
        &self,
        scan: &mut ScanCursor,
        flag: &TerminationFlag,
        report: &mut PassReport,
    ) -> Result<(), SyncError> {
        loop {
            if flag.is_terminated() {
                return Err(SyncError::Terminated);
            }
            let Some(hits) = scan.next_page().await? else {
                return Ok(());
            };
            // Stop requested while the page was being fetched.
            if flag.is_terminated() {
                return Err(SyncError::Terminated);
            }
            report.pages += 1;
            let root = self.root.clone();
            let outcomes = tokio::task::spawn_blocking(move || apply_page(&root, hits)).await?;
            for outcome in &outcomes {
                report.tally(outcome);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Per-record work
// ---------------------------------------------------------------------------

fn apply_page(root: &Path, hits: Vec<Hit>) -> Vec<Result<WriteResult, SyncError>> {
    hits.into_iter()
        .map(|hit| {
            let id = hit.id.to_string();
            let outcome = apply_record(root, hit);
            match &outcome {
                Ok(WriteResult::Written { path }) => {
                    tracing::info!(path = %path.display(), "updated file");
                }
                Ok(WriteResult::Unchanged { .. }) => {}
                Err(e @ SyncError::PathRejected { .. }) => {
                    tracing::warn!(id = %id, error = %e, "skipping record");
                }
                Err(e) => tracing::warn!(id = %id, error = %e, "failed to update file"),
            }
            outcome
        })
        .collect()
}

fn apply_record(root: &Path, hit: Hit) -> Result<WriteResult, SyncError> {
    let entry: Entry = serde_json::from_value(hit.source).map_err(|source| SyncError::Decode {
        id: hit.id.to_string(),
        source,
    })?;
    let target = path::resolve(root, &entry.path)?;
    writer::write_if_newer(&target, &entry.content, entry.timestamp)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_advance_returns_previous() {
        let mut cp = Checkpoint::default();
        assert_eq!(cp.last_checked().timestamp_millis(), 0);
        let now = now_millis();
        let since = cp.advance(now);
        assert_eq!(since.timestamp_millis(), 0);
        assert_eq!(cp.last_checked(), now);
    }

    #[test]
    fn termination_flag_is_shared_between_clones() {
        let flag = TerminationFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_terminated());
        flag.terminate();
        assert!(clone.is_terminated());
    }

    #[test]
    fn report_tally_classifies_failures() {
        let mut report = PassReport::new(now_millis(), now_millis());
        report.tally(&Ok(WriteResult::Written {
            path: PathBuf::from("a"),
        }));
        report.tally(&Err(SyncError::PathRejected {
            path: "../x".to_string(),
            reason: "parent directory segment",
        }));
        report.tally(&Err(SyncError::Terminated));
        assert_eq!((report.written, report.rejected, report.failed), (1, 1, 1));
        assert_eq!(report.records(), 3);
    }
}
