//! Links. Endpoints are not checked for existence.

use rusqlite::{Connection, OptionalExtension, Row, params};

use crumbs_core::Link;

use super::{new_id, not_found, require};
use crate::db::{from_micros, now, parse_column, to_micros};
use crate::error::{StoreError, StoreResult};
use crate::log::LogFile;
use crate::records::LogRecord;
use crate::sync::Changes;
use crate::table::Query;

const COLUMNS: &str = "id, link_type, from_id, to_id, created_at";

fn hydrate(row: &Row<'_>) -> rusqlite::Result<Link> {
    Ok(Link {
        id: row.get(0)?,
        link_type: parse_column(row, 1)?,
        from_id: row.get(2)?,
        to_id: row.get(3)?,
        created_at: from_micros(4, row.get(4)?)?,
    })
}

pub(crate) fn get(conn: &Connection, id: &str) -> StoreResult<Link> {
    conn.query_row(&format!("SELECT {COLUMNS} FROM links WHERE id = ?1"), [id], hydrate)
        .map_err(not_found("link", id))
}

pub(crate) fn fetch(conn: &Connection, query: &Query) -> StoreResult<Vec<Link>> {
    let (clause, params) = query.where_clause();
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM links{clause} ORDER BY created_at DESC, id DESC"
    ))?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params), hydrate)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn set(conn: &Connection, id: &str, mut link: Link) -> StoreResult<(String, Changes)> {
    require("link from_id", &link.from_id)?;
    require("link to_id", &link.to_id)?;

    if id.is_empty() {
        link.id = new_id();
        link.created_at = now();
    } else {
        link.id = id.to_string();
        let stored: Option<i64> = conn
            .query_row("SELECT created_at FROM links WHERE id = ?1", [id], |row| row.get(0))
            .optional()?;
        if let Some(micros) = stored {
            link.created_at = from_micros(0, micros)?;
        }
    }

    upsert(conn, &link)?;
    Ok((link.id, Changes::files([LogFile::Links])))
}

pub(crate) fn delete(conn: &Connection, id: &str) -> StoreResult<Changes> {
    let removed = conn.execute("DELETE FROM links WHERE id = ?1", [id])?;
    if removed == 0 {
        return Err(StoreError::NotFound {
            entity: "link",
            id: id.to_string(),
        });
    }
    Ok(Changes::files([LogFile::Links]))
}

fn upsert(conn: &Connection, link: &Link) -> StoreResult<()> {
    conn.execute(
        &format!(
            "INSERT INTO links ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(id) DO UPDATE SET link_type = excluded.link_type, \
             from_id = excluded.from_id, to_id = excluded.to_id, created_at = excluded.created_at"
        ),
        params![
            link.id,
            link.link_type.as_str(),
            link.from_id,
            link.to_id,
            to_micros(&link.created_at),
        ],
    )?;
    Ok(())
}

impl LogRecord for Link {
    const FILE: LogFile = LogFile::Links;

    fn insert(&self, conn: &Connection) -> StoreResult<()> {
        if self.id.is_empty() {
            return Err(StoreError::InvalidId);
        }
        upsert(conn, self)
    }

    fn snapshot(conn: &Connection) -> StoreResult<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM links ORDER BY created_at ASC, id ASC"
        ))?;
        let rows = stmt.query_map([], hydrate)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
