//! Mapping between log lines and cache rows.
//!
//! Each log file has one line type implementing [`LogRecord`]: how a parsed
//! line is upserted into the cache during replay, and how the file's full
//! snapshot is read back out for a rewrite. The implementations live next
//! to the table code in [`crate::tables`].

use rusqlite::Connection;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crumbs_core::{Category, Link, Metadata, Property, Stash, StashHistoryEntry, Trail};

use crate::error::StoreResult;
use crate::loader::{LoadReport, WarningKind};
use crate::log::{LogFile, LogStore};
use crate::tables::crumbs::{CrumbLine, CrumbPropertyLine};

/// One line of a log file.
pub(crate) trait LogRecord: Serialize + DeserializeOwned {
    const FILE: LogFile;

    /// Upsert this line into the cache. A repeated key replaces the earlier
    /// row, so the last line for an id wins.
    fn insert(&self, conn: &Connection) -> StoreResult<()>;

    /// Every cache row of this file, in a stable order.
    fn snapshot(conn: &Connection) -> StoreResult<Vec<Self>>;
}

/// Rewrite `file` from the cache.
pub(crate) fn rewrite_file(conn: &Connection, logs: &LogStore, file: LogFile) -> StoreResult<()> {
    match file {
        LogFile::Properties => rewrite::<Property>(conn, logs),
        LogFile::Categories => rewrite::<Category>(conn, logs),
        LogFile::Crumbs => rewrite::<CrumbLine>(conn, logs),
        LogFile::CrumbProperties => rewrite::<CrumbPropertyLine>(conn, logs),
        LogFile::Trails => rewrite::<Trail>(conn, logs),
        LogFile::Links => rewrite::<Link>(conn, logs),
        LogFile::Metadata => rewrite::<Metadata>(conn, logs),
        LogFile::Stashes => rewrite::<Stash>(conn, logs),
        LogFile::StashHistory => rewrite::<StashHistoryEntry>(conn, logs),
    }
}

/// Replay `file` into the cache, recording counts and warnings in `report`.
pub(crate) fn load_file(
    conn: &Connection,
    logs: &LogStore,
    file: LogFile,
    report: &mut LoadReport,
) -> StoreResult<()> {
    match file {
        LogFile::Properties => load::<Property>(conn, logs, report),
        LogFile::Categories => load::<Category>(conn, logs, report),
        LogFile::Crumbs => load::<CrumbLine>(conn, logs, report),
        LogFile::CrumbProperties => load::<CrumbPropertyLine>(conn, logs, report),
        LogFile::Trails => load::<Trail>(conn, logs, report),
        LogFile::Links => load::<Link>(conn, logs, report),
        LogFile::Metadata => load::<Metadata>(conn, logs, report),
        LogFile::Stashes => load::<Stash>(conn, logs, report),
        LogFile::StashHistory => load::<StashHistoryEntry>(conn, logs, report),
    }
}

fn rewrite<T: LogRecord>(conn: &Connection, logs: &LogStore) -> StoreResult<()> {
    let rows = T::snapshot(conn)?;
    logs.rewrite(T::FILE, &rows)
}

fn load<T: LogRecord>(conn: &Connection, logs: &LogStore, report: &mut LoadReport) -> StoreResult<()> {
    let file = T::FILE;
    let mut lines = 0;
    let mut loaded = 0;

    for (idx, raw) in logs.read_lines(file)?.iter().enumerate() {
        if raw.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        lines += 1;
        let line = idx + 1;

        let record: T = match serde_json::from_slice(raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(file = file.file_name(), line, error = %e, "skipping malformed log line");
                report.warn(file, Some(line), WarningKind::Malformed, e.to_string());
                continue;
            }
        };

        match record.insert(conn) {
            Ok(()) => loaded += 1,
            Err(e) if e.is_rejection() => {
                warn!(file = file.file_name(), line, error = %e, "skipping rejected log line");
                report.warn(file, Some(line), WarningKind::ConstraintViolation, e.to_string());
            }
            Err(e) => return Err(e),
        }
    }

    report.record_counts(file, lines, loaded);
    Ok(())
}
