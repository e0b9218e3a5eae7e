//! Trails.

use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

use crumbs_core::{EntityError, Trail};

use super::{new_id, not_found};
use crate::db::{from_micros, now, parse_column, to_micros};
use crate::error::{StoreError, StoreResult};
use crate::log::LogFile;
use crate::records::LogRecord;
use crate::sync::Changes;
use crate::table::Query;

const COLUMNS: &str = "id, state, created_at, completed_at";

fn hydrate(row: &Row<'_>) -> rusqlite::Result<Trail> {
    let completed_at = match row.get::<_, Option<i64>>(3)? {
        Some(micros) => Some(from_micros(3, micros)?),
        None => None,
    };
    Ok(Trail {
        id: row.get(0)?,
        state: parse_column(row, 1)?,
        created_at: from_micros(2, row.get(2)?)?,
        completed_at,
    })
}

pub(crate) fn get(conn: &Connection, id: &str) -> StoreResult<Trail> {
    conn.query_row(&format!("SELECT {COLUMNS} FROM trails WHERE id = ?1"), [id], hydrate)
        .map_err(not_found("trail", id))
}

pub(crate) fn fetch(conn: &Connection, query: &Query) -> StoreResult<Vec<Trail>> {
    let (clause, params) = query.where_clause();
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM trails{clause} ORDER BY created_at DESC, id DESC"
    ))?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params), hydrate)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Create or update a trail. An update must keep the stored state or
/// follow a legal transition from it.
pub(crate) fn set(conn: &Connection, id: &str, mut trail: Trail) -> StoreResult<(String, Changes)> {
    let stored = if id.is_empty() {
        None
    } else {
        conn.query_row(&format!("SELECT {COLUMNS} FROM trails WHERE id = ?1"), [id], hydrate)
            .optional()?
    };

    match stored {
        Some(stored) => {
            if stored.state != trail.state && !stored.state.can_transition_to(trail.state) {
                return Err(EntityError::InvalidTransition {
                    from: stored.state.to_string(),
                    to: trail.state.to_string(),
                }
                .into());
            }
            trail.id = id.to_string();
            trail.created_at = stored.created_at;
        }
        None if id.is_empty() => {
            trail.id = new_id();
            trail.created_at = now();
        }
        None => trail.id = id.to_string(),
    }

    if trail.state.is_terminal() != trail.completed_at.is_some() {
        return Err(StoreError::InvalidField(format!(
            "completed_at must be set exactly when the trail is terminal (state {})",
            trail.state
        )));
    }

    upsert(conn, &trail)?;
    debug!(trail_id = %trail.id, state = %trail.state, "trail stored");
    Ok((trail.id, Changes::files([LogFile::Trails])))
}

pub(crate) fn delete(conn: &Connection, id: &str) -> StoreResult<Changes> {
    let removed = conn.execute("DELETE FROM trails WHERE id = ?1", [id])?;
    if removed == 0 {
        return Err(StoreError::NotFound {
            entity: "trail",
            id: id.to_string(),
        });
    }
    Ok(Changes::files([LogFile::Trails]))
}

fn upsert(conn: &Connection, trail: &Trail) -> StoreResult<()> {
    conn.execute(
        &format!(
            "INSERT INTO trails ({COLUMNS}) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(id) DO UPDATE SET state = excluded.state, \
             created_at = excluded.created_at, completed_at = excluded.completed_at"
        ),
        params![
            trail.id,
            trail.state.as_str(),
            to_micros(&trail.created_at),
            trail.completed_at.as_ref().map(to_micros),
        ],
    )?;
    Ok(())
}

impl LogRecord for Trail {
    const FILE: LogFile = LogFile::Trails;

    fn insert(&self, conn: &Connection) -> StoreResult<()> {
        if self.id.is_empty() {
            return Err(StoreError::InvalidId);
        }
        upsert(conn, self)
    }

    fn snapshot(conn: &Connection) -> StoreResult<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM trails ORDER BY created_at ASC, id ASC"
        ))?;
        let rows = stmt.query_map([], hydrate)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

// ── tests ────────────────────────────────────────────────────────────
