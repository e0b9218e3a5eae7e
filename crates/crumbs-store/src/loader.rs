//! Cache rebuild from the log files.
//!
//! [`load_all`] replays every log file into a freshly created cache inside
//! one transaction with foreign keys off, so files load independently of
//! the order rows reference each other. Unreadable or rejected lines are
//! skipped and collected as [`LoadWarning`]s; only an I/O failure or a
//! broken database aborts the load, in which case nothing is committed.
//!
//! After commit the load repairs what line-level tolerance can leave
//! behind: rows whose parent never loaded are removed, and crumbs missing a
//! property entry are backfilled.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::{Database, set_foreign_keys};
use crate::error::StoreResult;
use crate::log::{LogFile, LogStore};
use crate::records;
use crate::tables::properties;

// ═══════════════════════════════════════════════════════════════════════
//  Warnings
// ═══════════════════════════════════════════════════════════════════════

/// Why a log line did not make it into the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// The line is not a valid record.
    Malformed,
    /// The record was rejected on insert.
    ConstraintViolation,
    /// The record referenced a row that does not exist and was removed
    /// after loading.
    Orphaned,
}

impl WarningKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::ConstraintViolation => "constraint_violation",
            Self::Orphaned => "orphaned",
        }
    }
}

/// A non-fatal problem found while loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadWarning {
    /// Log file name, e.g. `crumbs.jsonl`.
    pub file: &'static str,
    /// 1-based line number, when the problem maps to one line.
    pub line: Option<usize>,
    pub kind: WarningKind,
    pub message: String,
}

impl fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{}: {}: {}", self.file, line, self.kind.as_str(), self.message),
            None => write!(f, "{}: {}: {}", self.file, self.kind.as_str(), self.message),
        }
    }
}

/// Outcome of one load.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Non-blank lines per file.
    lines: BTreeMap<LogFile, usize>,
    /// Lines inserted per file.
    loaded: BTreeMap<LogFile, usize>,
    pub warnings: Vec<LoadWarning>,
    /// Files whose content no longer matches the cache after repairs.
    pub repaired: BTreeSet<LogFile>,
}

impl LoadReport {
    pub fn lines(&self, file: LogFile) -> usize {
        self.lines.get(&file).copied().unwrap_or(0)
    }

    pub fn loaded(&self, file: LogFile) -> usize {
        self.loaded.get(&file).copied().unwrap_or(0)
    }

    pub(crate) fn warn(&mut self, file: LogFile, line: Option<usize>, kind: WarningKind, message: String) {
        self.warnings.push(LoadWarning {
            file: file.file_name(),
            line,
            kind,
            message,
        });
    }

    pub(crate) fn record_counts(&mut self, file: LogFile, lines: usize, loaded: usize) {
        self.lines.insert(file, lines);
        self.loaded.insert(file, loaded);
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Load
// ═══════════════════════════════════════════════════════════════════════

/// Replay every log file into `db`, which must hold an empty schema.
pub(crate) fn load_all(db: &Database, logs: &LogStore) -> StoreResult<LoadReport> {
    db.execute_mut(|conn| {
        let mut report = LoadReport::default();

        set_foreign_keys(conn, false)?;
        let tx = conn.transaction()?;
        for file in LogFile::ALL {
            records::load_file(&tx, logs, file, &mut report)?;
        }
        tx.commit()?;
        set_foreign_keys(conn, true)?;

        remove_orphans(conn, &mut report)?;

        let backfilled = properties::backfill_all(conn)?;
        if backfilled > 0 {
            debug!(entries = backfilled, "backfilled missing property entries");
            report.repaired.insert(LogFile::CrumbProperties);
        }

        for file in LogFile::ALL {
            debug!(
                file = file.file_name(),
                lines = report.lines(file),
                loaded = report.loaded(file),
                "log file loaded"
            );
        }
        info!(warnings = report.warnings.len(), "cache rebuilt from logs");
        Ok(report)
    })
}

/// Delete rows whose foreign key points nowhere.
fn remove_orphans(conn: &Connection, report: &mut LoadReport) -> StoreResult<()> {
    let orphans: Vec<(String, Option<i64>, String)> = {
        let mut stmt = conn.prepare("PRAGMA foreign_key_check")?;
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<Result<Vec<_>, _>>()?
    };

    for (table, rowid, parent) in orphans {
        let Some(rowid) = rowid else { continue };
        let Some(file) = LogFile::for_table(&table) else {
            continue;
        };
        conn.execute(&format!("DELETE FROM \"{table}\" WHERE rowid = ?1"), [rowid])?;

        let message = format!("{table} row references a missing {parent} row");
        warn!(file = file.file_name(), "{message}");
        report.warn(file, None, WarningKind::Orphaned, message);
        report.repaired.insert(file);
    }
    Ok(())
}

// ── tests ────────────────────────────────────────────────────────────
