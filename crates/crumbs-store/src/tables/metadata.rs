//! Metadata attached to crumbs.

use rusqlite::{Connection, OptionalExtension, Row, params};

use crumbs_core::Metadata;

use super::{crumbs, new_id, not_found, require};
use crate::db::{from_micros, now, to_micros};
use crate::error::{StoreError, StoreResult};
use crate::log::LogFile;
use crate::records::LogRecord;
use crate::sync::Changes;
use crate::table::Query;

const COLUMNS: &str = "id, table_name, crumb_id, property_id, content, created_at";

fn hydrate(row: &Row<'_>) -> rusqlite::Result<Metadata> {
    Ok(Metadata {
        id: row.get(0)?,
        table_name: row.get(1)?,
        crumb_id: row.get(2)?,
        property_id: row.get(3)?,
        content: row.get(4)?,
        created_at: from_micros(5, row.get(5)?)?,
    })
}

pub(crate) fn get(conn: &Connection, id: &str) -> StoreResult<Metadata> {
    conn.query_row(&format!("SELECT {COLUMNS} FROM metadata WHERE id = ?1"), [id], hydrate)
        .map_err(not_found("metadata", id))
}

pub(crate) fn fetch(conn: &Connection, query: &Query) -> StoreResult<Vec<Metadata>> {
    let (clause, params) = query.where_clause();
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM metadata{clause} ORDER BY created_at DESC, id DESC"
    ))?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params), hydrate)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn set(conn: &Connection, id: &str, mut meta: Metadata) -> StoreResult<(String, Changes)> {
    require("metadata table_name", &meta.table_name)?;
    require("metadata crumb_id", &meta.crumb_id)?;
    require("metadata content", &meta.content)?;
    if !crumbs::exists(conn, &meta.crumb_id)? {
        return Err(StoreError::NotFound {
            entity: "crumb",
            id: meta.crumb_id.clone(),
        });
    }
    if let Some(property_id) = &meta.property_id {
        require("metadata property_id", property_id)?;
        let known = conn
            .query_row("SELECT 1 FROM properties WHERE id = ?1", [property_id], |_| Ok(()))
            .optional()?;
        if known.is_none() {
            return Err(StoreError::NotFound {
                entity: "property",
                id: property_id.clone(),
            });
        }
    }

    if id.is_empty() {
        meta.id = new_id();
        meta.created_at = now();
    } else {
        meta.id = id.to_string();
        let stored: Option<i64> = conn
            .query_row("SELECT created_at FROM metadata WHERE id = ?1", [id], |row| row.get(0))
            .optional()?;
        if let Some(micros) = stored {
            meta.created_at = from_micros(0, micros)?;
        }
    }

    upsert(conn, &meta)?;
    Ok((meta.id, Changes::files([LogFile::Metadata])))
}

pub(crate) fn delete(conn: &Connection, id: &str) -> StoreResult<Changes> {
    let removed = conn.execute("DELETE FROM metadata WHERE id = ?1", [id])?;
    if removed == 0 {
        return Err(StoreError::NotFound {
            entity: "metadata",
            id: id.to_string(),
        });
    }
    Ok(Changes::files([LogFile::Metadata]))
}

fn upsert(conn: &Connection, meta: &Metadata) -> StoreResult<()> {
    conn.execute(
        &format!(
            "INSERT INTO metadata ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT(id) DO UPDATE SET table_name = excluded.table_name, \
             crumb_id = excluded.crumb_id, property_id = excluded.property_id, \
             content = excluded.content, created_at = excluded.created_at"
        ),
        params![
            meta.id,
            meta.table_name,
            meta.crumb_id,
            meta.property_id,
            meta.content,
            to_micros(&meta.created_at),
        ],
    )?;
    Ok(())
}

impl LogRecord for Metadata {
    const FILE: LogFile = LogFile::Metadata;

    fn insert(&self, conn: &Connection) -> StoreResult<()> {
        if self.id.is_empty() {
            return Err(StoreError::InvalidId);
        }
        upsert(conn, self)
    }

    fn snapshot(conn: &Connection) -> StoreResult<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM metadata ORDER BY created_at ASC, id ASC"
        ))?;
        let rows = stmt.query_map([], hydrate)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
