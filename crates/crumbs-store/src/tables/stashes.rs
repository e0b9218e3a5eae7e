//! Stashes and their append-only history.
//!
//! Stash mutations happen in memory through the [`Stash`] methods; storing
//! the result is where they are checked. A stored update must carry a
//! version at least as new as the cache's, and every version bump appends
//! one [`StashHistoryEntry`].

use chrono::SubsecRound;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

use crumbs_core::stash::OP_CREATE;
use crumbs_core::{Stash, StashHistoryEntry, StashType};

use super::{duplicate_name, new_id, not_found, require};
use crate::db::{from_micros, json_column, now, parse_column, to_micros};
use crate::error::{StoreError, StoreResult};
use crate::log::LogFile;
use crate::records::LogRecord;
use crate::sync::Changes;
use crate::table::Query;

const COLUMNS: &str =
    "id, name, stash_type, value, version, last_operation, changed_by, created_at, updated_at";

fn hydrate(row: &Row<'_>) -> rusqlite::Result<Stash> {
    Ok(Stash {
        id: row.get(0)?,
        name: row.get(1)?,
        stash_type: parse_column(row, 2)?,
        value: json_column(row, 3)?,
        version: row.get(4)?,
        last_operation: row.get(5)?,
        changed_by: row.get(6)?,
        created_at: from_micros(7, row.get(7)?)?,
        updated_at: from_micros(8, row.get(8)?)?,
        unrecorded: Vec::new(),
    })
}

pub(crate) fn get(conn: &Connection, id: &str) -> StoreResult<Stash> {
    conn.query_row(&format!("SELECT {COLUMNS} FROM stashes WHERE id = ?1"), [id], hydrate)
        .map_err(not_found("stash", id))
}

pub(crate) fn fetch(conn: &Connection, query: &Query) -> StoreResult<Vec<Stash>> {
    let (clause, params) = query.where_clause();
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM stashes{clause} ORDER BY created_at DESC, id DESC"
    ))?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params), hydrate)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Create or update a stash.
///
/// Creation stamps version 1 and operation `create`; mutations made
/// before the first store fold into that entry. An update keeps the stored
/// type and creation time, rejects a version older than the stored one,
/// rejects a value change that did not bump the version, and appends one
/// history entry per version gained.
pub(crate) fn set(conn: &Connection, id: &str, mut stash: Stash) -> StoreResult<(String, Changes)> {
    require("stash name", &stash.name)?;
    validate_value(&stash)?;
    let unrecorded = stash.take_unrecorded();

    let stored = if id.is_empty() {
        None
    } else {
        conn.query_row(&format!("SELECT {COLUMNS} FROM stashes WHERE id = ?1"), [id], hydrate)
            .optional()?
    };

    let Some(stored) = stored else {
        stash.id = if id.is_empty() { new_id() } else { id.to_string() };
        let stamp = now();
        stash.created_at = stamp;
        stash.updated_at = stamp;
        stash.version = 1;
        stash.last_operation = OP_CREATE.to_string();

        insert_row(conn, &stash)?;
        let entry = append_history(conn, &stash.id, stash.history_entry())?;
        debug!(stash_id = %stash.id, name = %stash.name, stash_type = %stash.stash_type, "stash created");
        return Ok((
            stash.id,
            Changes::files([LogFile::Stashes]).with_appended(entry),
        ));
    };

    if stored.stash_type != stash.stash_type {
        return Err(StoreError::InvalidField(format!(
            "stash_type of stash {id} cannot change from {} to {}",
            stored.stash_type, stash.stash_type
        )));
    }
    if stash.version < stored.version {
        return Err(StoreError::InvalidField(format!(
            "stale stash version {} (stored version is {})",
            stash.version, stored.version
        )));
    }
    if stash.version == stored.version && stash.value != stored.value {
        return Err(StoreError::InvalidField(format!(
            "value of stash {id} changed without a version bump"
        )));
    }

    stash.id = id.to_string();
    stash.created_at = stored.created_at;
    stash.updated_at = now();
    if stash.version == stored.version {
        stash.last_operation = stored.last_operation.clone();
    }
    let entries = versions_gained(&stored, &stash, unrecorded)?;

    conn.execute(
        "UPDATE stashes SET name = ?2, value = ?3, version = ?4, last_operation = ?5, \
         changed_by = ?6, updated_at = ?7 WHERE id = ?1",
        params![
            stash.id,
            stash.name,
            stash.value.to_string(),
            stash.version,
            stash.last_operation,
            stash.changed_by,
            to_micros(&stash.updated_at),
        ],
    )
    .map_err(duplicate_name("stash", &stash.name))?;

    let mut changes = Changes::files([LogFile::Stashes]);
    for entry in entries {
        changes = changes.with_appended(append_history(conn, &stash.id, entry)?);
    }
    if stash.version > stored.version {
        debug!(stash_id = %stash.id, version = stash.version, op = %stash.last_operation, "stash updated");
    }
    Ok((stash.id, changes))
}

/// Remove a stash and its history.
pub(crate) fn delete(conn: &Connection, id: &str) -> StoreResult<Changes> {
    let removed = conn.execute("DELETE FROM stashes WHERE id = ?1", [id])?;
    if removed == 0 {
        return Err(StoreError::NotFound {
            entity: "stash",
            id: id.to_string(),
        });
    }
    Ok(Changes::files([LogFile::Stashes, LogFile::StashHistory]))
}

/// History of `stash_id`, oldest version first.
pub(crate) fn history(conn: &Connection, stash_id: &str) -> StoreResult<Vec<StashHistoryEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {HISTORY_COLUMNS} FROM stash_history WHERE stash_id = ?1 ORDER BY version ASC"
    ))?;
    let rows = stmt
        .query_map([stash_id], hydrate_entry)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Counters hold a number (or nothing yet); locks hold nothing or a holder.
fn validate_value(stash: &Stash) -> StoreResult<()> {
    match stash.stash_type {
        StashType::Counter => {
            stash.counter_value()?;
        }
        StashType::Lock => {
            if !stash.value.is_null() && stash.lock_holder().is_none() {
                return Err(StoreError::InvalidField(format!(
                    "lock stash {} must hold null or an object with a non-empty holder",
                    stash.name
                )));
            }
        }
        StashType::Resource | StashType::Artifact | StashType::Context => {}
    }
    Ok(())
}

fn insert_row(conn: &Connection, stash: &Stash) -> StoreResult<()> {
    conn.execute(
        &format!("INSERT INTO stashes ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"),
        params![
            stash.id,
            stash.name,
            stash.stash_type.as_str(),
            stash.value.to_string(),
            stash.version,
            stash.last_operation,
            stash.changed_by,
            to_micros(&stash.created_at),
            to_micros(&stash.updated_at),
        ],
    )
    .map_err(duplicate_name("stash", &stash.name))?;
    Ok(())
}

/// History entries for every version between `stored` and `stash`, in
/// order. A copy mutated through the [`Stash`] methods carries them; a copy
/// whose version was bumped by hand may gain exactly one version, recorded
/// from its current state.
fn versions_gained(
    stored: &Stash,
    stash: &Stash,
    unrecorded: Vec<StashHistoryEntry>,
) -> StoreResult<Vec<StashHistoryEntry>> {
    if stash.version == stored.version {
        return Ok(Vec::new());
    }

    // Entries at or below the stored version were written by an earlier set.
    let mut entries: Vec<StashHistoryEntry> = unrecorded
        .into_iter()
        .filter(|entry| entry.version > stored.version)
        .collect();
    if entries.is_empty() && stash.version == stored.version + 1 {
        entries.push(stash.history_entry());
    }

    let contiguous = entries
        .iter()
        .zip(stored.version + 1..)
        .all(|(entry, version)| entry.version == version);
    let complete = entries.last().map(|entry| entry.version) == Some(stash.version);
    if !contiguous || !complete {
        return Err(StoreError::InvalidField(format!(
            "stash {} moves from version {} to {} without a history entry for every version",
            stored.id, stored.version, stash.version
        )));
    }
    Ok(entries)
}

/// Record one version of `stash_id` in the history table.
fn append_history(
    conn: &Connection,
    stash_id: &str,
    mut entry: StashHistoryEntry,
) -> StoreResult<StashHistoryEntry> {
    entry.id = new_id();
    entry.stash_id = stash_id.to_string();
    entry.created_at = entry.created_at.trunc_subsecs(6);
    insert_entry(conn, &entry)?;
    Ok(entry)
}

// ═══════════════════════════════════════════════════════════════════════
//  History rows
// ═══════════════════════════════════════════════════════════════════════

const HISTORY_COLUMNS: &str = "id, stash_id, version, value, operation, changed_by, created_at";

fn hydrate_entry(row: &Row<'_>) -> rusqlite::Result<StashHistoryEntry> {
    Ok(StashHistoryEntry {
        id: row.get(0)?,
        stash_id: row.get(1)?,
        version: row.get(2)?,
        value: json_column(row, 3)?,
        operation: row.get(4)?,
        changed_by: row.get(5)?,
        created_at: from_micros(6, row.get(6)?)?,
    })
}

fn insert_entry(conn: &Connection, entry: &StashHistoryEntry) -> StoreResult<()> {
    conn.execute(
        &format!(
            "INSERT INTO stash_history ({HISTORY_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(id) DO UPDATE SET stash_id = excluded.stash_id, \
             version = excluded.version, value = excluded.value, \
             operation = excluded.operation, changed_by = excluded.changed_by, \
             created_at = excluded.created_at"
        ),
        params![
            entry.id,
            entry.stash_id,
            entry.version,
            entry.value.to_string(),
            entry.operation,
            entry.changed_by,
            to_micros(&entry.created_at),
        ],
    )?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
//  Log lines
// ═══════════════════════════════════════════════════════════════════════

impl LogRecord for Stash {
    const FILE: LogFile = LogFile::Stashes;

    fn insert(&self, conn: &Connection) -> StoreResult<()> {
        if self.id.is_empty() {
            return Err(StoreError::InvalidId);
        }
        validate_value(self)?;
        conn.execute(
            &format!(
                "INSERT INTO stashes ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name, \
                 stash_type = excluded.stash_type, value = excluded.value, \
                 version = excluded.version, last_operation = excluded.last_operation, \
                 changed_by = excluded.changed_by, created_at = excluded.created_at, \
                 updated_at = excluded.updated_at"
            ),
            params![
                self.id,
                self.name,
                self.stash_type.as_str(),
                self.value.to_string(),
                self.version,
                self.last_operation,
                self.changed_by,
                to_micros(&self.created_at),
                to_micros(&self.updated_at),
            ],
        )?;
        Ok(())
    }

    fn snapshot(conn: &Connection) -> StoreResult<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM stashes ORDER BY created_at ASC, id ASC"
        ))?;
        let rows = stmt.query_map([], hydrate)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl LogRecord for StashHistoryEntry {
    const FILE: LogFile = LogFile::StashHistory;

    fn insert(&self, conn: &Connection) -> StoreResult<()> {
        if self.id.is_empty() || self.stash_id.is_empty() {
            return Err(StoreError::InvalidId);
        }
        insert_entry(conn, self)
    }

    fn snapshot(conn: &Connection) -> StoreResult<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {HISTORY_COLUMNS} FROM stash_history ORDER BY stash_id, version"
        ))?;
        let rows = stmt
            .query_map([], hydrate_entry)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

// ── tests ────────────────────────────────────────────────────────────
