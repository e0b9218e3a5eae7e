//! SQLite connection for the relational cache.
//!
//! The [`Database`] struct wraps a `rusqlite::Connection` behind a `Mutex`
//! so the attached backend can be shared across threads (connections are
//! `Send` but not `Sync`). The cache is disposable, so the pragmas favour
//! speed over durability: the log files are the durable copy.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::StoreResult;

/// Thread-safe handle to the cache database.
#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a cache database at `path` and apply pragmas.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening cache database");

        let conn = Connection::open(path)?;
        Self::apply_pragmas(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory cache.
    pub fn open_in_memory() -> StoreResult<Self> {
        debug!("opening in-memory cache database");

        let conn = Connection::open_in_memory()?;
        Self::apply_pragmas(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run a closure against the connection.
    ///
    /// ```ignore
    /// let count: i64 = db.execute(|conn| {
    ///     Ok(conn.query_row("SELECT count(*) FROM crumbs", [], |row| row.get(0))?)
    /// })?;
    /// ```
    pub fn execute<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T>,
    {
        let conn = self.conn.lock()?;
        f(&conn)
    }

    /// Run a closure that needs `&mut Connection` (transactions).
    pub fn execute_mut<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T>,
    {
        let mut conn = self.conn.lock()?;
        f(&mut conn)
    }

    // ── pragmas ──────────────────────────────────────────────────────

    fn apply_pragmas(conn: &Connection) -> StoreResult<()> {
        debug!("applying cache pragmas");

        // WAL mode: readers do not block the single writer.
        conn.pragma_update(None, "journal_mode", "WAL")?;

        // The cache is rebuilt from the logs on every attach, so losing
        // the tail of it on power failure costs nothing.
        conn.pragma_update(None, "synchronous", "OFF")?;

        // Temp tables and indices in memory, not on disk.
        conn.pragma_update(None, "temp_store", "MEMORY")?;

        // Enforced for normal operation; log replay turns it off while
        // loading and back on afterwards.
        conn.pragma_update(None, "foreign_keys", "ON")?;

        conn.pragma_update(None, "busy_timeout", 5_000_i32)?;

        Ok(())
    }
}

/// Switch foreign-key enforcement. Has no effect inside a transaction.
pub(crate) fn set_foreign_keys(conn: &Connection, enabled: bool) -> StoreResult<()> {
    conn.pragma_update(None, "foreign_keys", if enabled { "ON" } else { "OFF" })?;
    Ok(())
}

// ── column helpers ───────────────────────────────────────────────────

/// Timestamps are stored as integer microseconds since the Unix epoch so
/// they sort numerically.
pub(crate) fn to_micros(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

/// Current time at the precision the cache stores.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub(crate) fn from_micros(idx: usize, micros: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, micros))
}

/// Read a text column and parse it into one of the core vocabularies.
pub(crate) fn parse_column<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Read a text column holding a JSON document.
pub(crate) fn json_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<serde_json::Value> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

// ── tests ────────────────────────────────────────────────────────────
