//! Propagation of cache writes to the log files.
//!
//! Every successful table write produces a [`Changes`] value naming the log
//! files whose content it altered. The [`SyncEngine`] decides, per
//! [`SyncStrategy`], whether those files are rewritten now or remembered as
//! dirty until a later flush.

use std::collections::BTreeSet;
use std::sync::Weak;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Sender};
use crumbs_core::StashHistoryEntry;
use tracing::{debug, warn};

use crate::backend::Shared;
use crate::config::SyncStrategy;
use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::log::{LogFile, LogStore};
use crate::records;

// ═══════════════════════════════════════════════════════════════════════
//  Changes
// ═══════════════════════════════════════════════════════════════════════

/// Log files touched by one write.
#[derive(Debug, Default)]
pub(crate) struct Changes {
    /// Files whose snapshot changed.
    pub rewrite: BTreeSet<LogFile>,
    /// New stash history entries, which can be appended instead of
    /// rewriting the history file.
    pub appended: Vec<StashHistoryEntry>,
}

impl Changes {
    pub fn files(files: impl IntoIterator<Item = LogFile>) -> Self {
        Self {
            rewrite: files.into_iter().collect(),
            appended: Vec::new(),
        }
    }

    pub fn with_appended(mut self, entry: StashHistoryEntry) -> Self {
        self.appended.push(entry);
        self
    }

    /// Every file this write leaves out of date.
    fn touched(&self) -> impl Iterator<Item = LogFile> + '_ {
        let history = (!self.appended.is_empty()).then_some(LogFile::StashHistory);
        self.rewrite.iter().copied().chain(history)
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  SyncEngine
// ═══════════════════════════════════════════════════════════════════════

/// Per-attachment sync state. Always used under the backend's write lock.
#[derive(Debug)]
pub(crate) struct SyncEngine {
    strategy: SyncStrategy,
    /// Files whose log content lags the cache.
    dirty: BTreeSet<LogFile>,
    /// Writes since the last batch flush.
    pending: usize,
    /// When `dirty` last went from empty to non-empty. The batch timer
    /// measures its interval from here.
    dirty_since: Option<Instant>,
}

impl SyncEngine {
    pub fn new(strategy: SyncStrategy) -> Self {
        Self {
            strategy,
            dirty: BTreeSet::new(),
            pending: 0,
            dirty_since: None,
        }
    }

    pub fn strategy(&self) -> SyncStrategy {
        self.strategy
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Record files that lag the cache without counting a write.
    pub fn mark(&mut self, files: impl IntoIterator<Item = LogFile>) {
        self.dirty.extend(files);
        self.note_dirty();
    }

    fn note_dirty(&mut self) {
        if self.dirty_since.is_none() && !self.dirty.is_empty() {
            self.dirty_since = Some(Instant::now());
        }
    }

    /// Handle the log side of one committed cache write.
    ///
    /// Under `immediate` the error of a failed rewrite is returned, and the
    /// file stays dirty so the next flush retries it.
    pub fn persist(&mut self, db: &Database, logs: &LogStore, changes: Changes) -> StoreResult<()> {
        match self.strategy {
            SyncStrategy::Immediate => {
                let mut first_err = None;

                if !changes.rewrite.contains(&LogFile::StashHistory)
                    && !self.dirty.contains(&LogFile::StashHistory)
                {
                    for entry in &changes.appended {
                        if let Err(e) = logs.append(LogFile::StashHistory, entry) {
                            warn!(error = %e, "stash history append failed");
                            self.dirty.insert(LogFile::StashHistory);
                            first_err.get_or_insert(e);
                            break;
                        }
                    }
                } else if !changes.appended.is_empty() {
                    self.dirty.insert(LogFile::StashHistory);
                }

                self.dirty.extend(changes.rewrite);
                if let Err(e) = self.flush(db, logs) {
                    first_err.get_or_insert(e);
                }
                first_err.map_or(Ok(()), Err)
            }
            SyncStrategy::OnClose => {
                self.dirty.extend(changes.touched());
                Ok(())
            }
            SyncStrategy::Batch { size, .. } => {
                self.dirty.extend(changes.touched());
                self.note_dirty();
                self.pending += 1;
                if self.pending >= size {
                    debug!(pending = self.pending, "batch size reached");
                    self.flush(db, logs)?;
                }
                Ok(())
            }
        }
    }

    /// Rewrite every dirty file. Files that fail stay dirty.
    pub fn flush(&mut self, db: &Database, logs: &LogStore) -> StoreResult<()> {
        let files = std::mem::take(&mut self.dirty);
        let mut first_err = None;
        for file in files {
            if let Err(e) = db.execute(|conn| records::rewrite_file(conn, logs, file)) {
                warn!(file = file.file_name(), error = %e, "log rewrite failed");
                self.dirty.insert(file);
                first_err.get_or_insert(e);
            }
        }
        self.pending = 0;
        // Files that failed wait a full interval before the timer retries.
        self.dirty_since = (!self.dirty.is_empty()).then(Instant::now);
        first_err.map_or(Ok(()), Err)
    }

    /// Timer-driven flush for the batch strategy. Flushes once the oldest
    /// unflushed change is at least one interval old.
    pub fn flush_due(&mut self, db: &Database, logs: &LogStore) -> StoreResult<()> {
        let SyncStrategy::Batch { interval, .. } = self.strategy else {
            return Ok(());
        };
        let Some(since) = self.dirty_since else {
            return Ok(());
        };
        if self.dirty.is_empty() || since.elapsed() < interval {
            return Ok(());
        }
        debug!(files = self.dirty.len(), "batch interval elapsed");
        self.flush(db, logs)
    }

    /// Final flush before the cache is released.
    pub fn flush_for_detach(&mut self, db: &Database, logs: &LogStore) -> StoreResult<()> {
        if self.strategy == SyncStrategy::OnClose {
            self.dirty.extend(LogFile::ALL);
        }
        if !self.is_dirty() {
            return Ok(());
        }
        debug!(strategy = self.strategy.as_str(), files = self.dirty.len(), "flushing on detach");
        self.flush(db, logs)
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Flusher
// ═══════════════════════════════════════════════════════════════════════

/// Background thread flushing a batch-mode attachment.
///
/// It checks four times per interval, so a change reaches the logs between
/// one and one and a quarter intervals after it was made.
#[derive(Debug)]
pub(crate) struct Flusher {
    stop: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Flusher {
    pub fn spawn(shared: Weak<Shared>, generation: u64, interval: Duration) -> StoreResult<Self> {
        let (stop, stopped) = channel::bounded::<()>(1);
        let handle = std::thread::Builder::new()
            .name("crumbs-batch-flush".into())
            .spawn(move || {
                let ticker = channel::tick(check_period(interval));
                loop {
                    crossbeam::select! {
                        recv(stopped) -> _ => break,
                        recv(ticker) -> _ => {
                            let Some(strong) = shared.upgrade() else { break };
                            match strong.flush_due(generation) {
                                Ok(()) => {}
                                Err(StoreError::Detached) => break,
                                Err(e) => warn!(error = %e, "batch flush failed"),
                            }
                        }
                    }
                }
                debug!(generation, "batch flusher stopped");
            })?;

        debug!(generation, interval_ms = interval.as_millis() as u64, "batch flusher started");
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Signal the thread and wait for it. Must not be called while holding
    /// the backend lock.
    pub fn stop(mut self) {
        let _ = self.stop.try_send(());
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("batch flusher panicked");
        }
    }
}

fn check_period(interval: Duration) -> Duration {
    (interval / 4).max(Duration::from_millis(1))
}

// ── tests ────────────────────────────────────────────────────────────
