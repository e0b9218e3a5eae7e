//! Durable log files.
//!
//! Every entity type has one line-delimited JSON file in the data directory.
//! The files are the source of truth; the SQLite cache is rebuilt from them
//! on every attach.
//!
//! Two write paths exist:
//!
//! - [`LogStore::rewrite`] replaces a file with a complete snapshot by
//!   writing a temporary file next to it, syncing it and renaming it over
//!   the destination. A reader sees either the old or the new file, never a
//!   partial one.
//! - [`LogStore::append`] adds one line to the end of a file. Only the stash
//!   history uses it.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::StoreResult;

// ═══════════════════════════════════════════════════════════════════════
//  LogFile
// ═══════════════════════════════════════════════════════════════════════

/// The managed log files, in load order: a file only references files
/// listed before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LogFile {
    Properties,
    Categories,
    Crumbs,
    CrumbProperties,
    Trails,
    Links,
    Metadata,
    Stashes,
    StashHistory,
}

impl LogFile {
    pub const ALL: [LogFile; 9] = [
        Self::Properties,
        Self::Categories,
        Self::Crumbs,
        Self::CrumbProperties,
        Self::Trails,
        Self::Links,
        Self::Metadata,
        Self::Stashes,
        Self::StashHistory,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Properties => "properties.jsonl",
            Self::Categories => "categories.jsonl",
            Self::Crumbs => "crumbs.jsonl",
            Self::CrumbProperties => "crumb_properties.jsonl",
            Self::Trails => "trails.jsonl",
            Self::Links => "links.jsonl",
            Self::Metadata => "metadata.jsonl",
            Self::Stashes => "stashes.jsonl",
            Self::StashHistory => "stash_history.jsonl",
        }
    }

    /// Cache table holding this file's rows.
    pub fn table(&self) -> &'static str {
        match self {
            Self::Properties => "properties",
            Self::Categories => "categories",
            Self::Crumbs => "crumbs",
            Self::CrumbProperties => "crumb_properties",
            Self::Trails => "trails",
            Self::Links => "links",
            Self::Metadata => "metadata",
            Self::Stashes => "stashes",
            Self::StashHistory => "stash_history",
        }
    }

    /// Reverse of [`LogFile::table`].
    pub fn for_table(table: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|file| file.table() == table)
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  LogStore
// ═══════════════════════════════════════════════════════════════════════

/// The log files of one data directory.
#[derive(Debug, Clone)]
pub struct LogStore {
    dir: PathBuf,
}

impl LogStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, file: LogFile) -> PathBuf {
        self.dir.join(file.file_name())
    }

    /// Create any missing log file. Existing files are left untouched.
    pub fn ensure_files(&self) -> StoreResult<()> {
        for file in LogFile::ALL {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.path(file))?;
        }
        Ok(())
    }

    /// Raw lines of `file`, without terminators. Lines are returned as bytes
    /// so an invalid UTF-8 line fails to parse like any other malformed
    /// line instead of failing the whole read.
    pub fn read_lines(&self, file: LogFile) -> StoreResult<Vec<Vec<u8>>> {
        let bytes = fs::read(self.path(file))?;
        let mut lines: Vec<Vec<u8>> = bytes
            .split(|b| *b == b'\n')
            .map(|line| line.strip_suffix(b"\r").unwrap_or(line).to_vec())
            .collect();
        // A trailing newline leaves one empty slice behind.
        if lines.last().is_some_and(Vec::is_empty) {
            lines.pop();
        }
        Ok(lines)
    }

    /// Atomically replace `file` with one line per record.
    pub fn rewrite<T: Serialize>(&self, file: LogFile, records: &[T]) -> StoreResult<()> {
        let path = self.path(file);
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            for record in records {
                serde_json::to_writer(&mut writer, record)?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        sync_dir(&self.dir)?;

        debug!(file = file.file_name(), records = records.len(), "log file rewritten");
        Ok(())
    }

    /// Append one record to `file` and sync it.
    pub fn append<T: Serialize>(&self, file: LogFile, record: &T) -> StoreResult<()> {
        let path = self.path(file);
        let mut line = Vec::new();
        if !ends_with_newline(&path)? {
            line.push(b'\n');
        }
        serde_json::to_writer(&mut line, record)?;
        line.push(b'\n');

        let mut out = OpenOptions::new().create(true).append(true).open(&path)?;
        out.write_all(&line)?;
        out.sync_data()?;

        debug!(file = file.file_name(), "log line appended");
        Ok(())
    }
}

/// True for an empty file or one whose last byte is a newline.
fn ends_with_newline(path: &Path) -> StoreResult<bool> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e.into()),
    };
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

/// Make a completed rename durable.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> StoreResult<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> StoreResult<()> {
    Ok(())
}

// ── tests ────────────────────────────────────────────────────────────
