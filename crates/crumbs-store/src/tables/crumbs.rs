//! Crumbs and their property entries.
//!
//! A crumb is split over two log files: `crumbs.jsonl` holds the scalar
//! fields ([`CrumbLine`]) and `crumb_properties.jsonl` one line per
//! (crumb, property) pair ([`CrumbPropertyLine`]) so each value keeps its
//! kind across a rebuild.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crumbs_core::{Crumb, CrumbState, EntityError, Property, Value, ValueType};

use super::{new_id, not_found, properties, require};
use crate::db::{from_micros, json_column, now, parse_column, to_micros};
use crate::error::{StoreError, StoreResult};
use crate::log::LogFile;
use crate::records::LogRecord;
use crate::sync::Changes;
use crate::table::Query;

const COLUMNS: &str = "id, name, state, created_at, updated_at";

fn hydrate(row: &Row<'_>) -> rusqlite::Result<Crumb> {
    Ok(Crumb {
        id: row.get(0)?,
        name: row.get(1)?,
        state: parse_column(row, 2)?,
        created_at: from_micros(3, row.get(3)?)?,
        updated_at: from_micros(4, row.get(4)?)?,
        properties: BTreeMap::new(),
    })
}

/// Fill in the property map of a hydrated crumb.
fn load_properties(conn: &Connection, crumb: &mut Crumb) -> StoreResult<()> {
    let mut stmt = conn.prepare_cached(
        "SELECT property_id, value_type, value FROM crumb_properties WHERE crumb_id = ?1",
    )?;
    let rows = stmt
        .query_map([&crumb.id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                parse_column::<ValueType>(row, 1)?,
                json_column(row, 2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for (property_id, kind, json) in rows {
        let value = Value::from_json(&property_id, kind, &json)?;
        crumb.properties.insert(property_id, value);
    }
    Ok(())
}

pub(crate) fn get(conn: &Connection, id: &str) -> StoreResult<Crumb> {
    let mut crumb = conn
        .query_row(&format!("SELECT {COLUMNS} FROM crumbs WHERE id = ?1"), [id], hydrate)
        .map_err(not_found("crumb", id))?;
    load_properties(conn, &mut crumb)?;
    Ok(crumb)
}

pub(crate) fn fetch(conn: &Connection, query: &Query) -> StoreResult<Vec<Crumb>> {
    let (clause, params) = query.where_clause();
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM crumbs{clause} ORDER BY created_at DESC, id DESC"
    ))?;
    let mut crumbs = stmt
        .query_map(rusqlite::params_from_iter(params), hydrate)?
        .collect::<Result<Vec<_>, _>>()?;
    for crumb in &mut crumbs {
        load_properties(conn, crumb)?;
    }
    Ok(crumbs)
}

/// Whether a crumb with this id exists.
pub(crate) fn exists(conn: &Connection, id: &str) -> StoreResult<bool> {
    let found = conn
        .query_row("SELECT 1 FROM crumbs WHERE id = ?1", [id], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

/// Create or update a crumb.
///
/// A new crumb (empty `id`) starts in `draft`. For every crumb the stored
/// property map is rebuilt as: the default of every defined property,
/// overlaid with the caller's values after they are checked against their
/// property.
pub(crate) fn set(conn: &Connection, id: &str, mut crumb: Crumb) -> StoreResult<(String, Changes)> {
    require("crumb name", &crumb.name)?;

    let stamp = now();
    if id.is_empty() {
        crumb.id = new_id();
        crumb.state = CrumbState::Draft;
        crumb.created_at = stamp;
    } else {
        crumb.id = id.to_string();
        if let Some(created) = stored_created_at(conn, id)? {
            crumb.created_at = created;
        }
    }
    crumb.updated_at = stamp;

    let defined = properties::all(conn)?;
    crumb.properties = resolve_properties(conn, &defined, &crumb.properties)?;

    upsert_row(conn, &CrumbLine::from(&crumb))?;
    conn.execute("DELETE FROM crumb_properties WHERE crumb_id = ?1", [&crumb.id])?;
    for property in &defined {
        if let Some(value) = crumb.properties.get(&property.id) {
            insert_value(conn, &crumb.id, property, value)?;
        }
    }

    debug!(crumb_id = %crumb.id, state = %crumb.state, "crumb stored");
    Ok((
        crumb.id,
        Changes::files([LogFile::Crumbs, LogFile::CrumbProperties]),
    ))
}

/// Remove a crumb, its property entries and its metadata.
pub(crate) fn delete(conn: &Connection, id: &str) -> StoreResult<Changes> {
    let removed = conn.execute("DELETE FROM crumbs WHERE id = ?1", [id])?;
    if removed == 0 {
        return Err(StoreError::NotFound {
            entity: "crumb",
            id: id.to_string(),
        });
    }
    Ok(Changes::files([
        LogFile::Crumbs,
        LogFile::CrumbProperties,
        LogFile::Metadata,
    ]))
}

fn stored_created_at(conn: &Connection, id: &str) -> StoreResult<Option<DateTime<Utc>>> {
    let micros: Option<i64> = conn
        .query_row("SELECT created_at FROM crumbs WHERE id = ?1", [id], |row| row.get(0))
        .optional()?;
    Ok(match micros {
        Some(m) => Some(from_micros(0, m)?),
        None => None,
    })
}

/// Defaults for every defined property, overlaid with checked caller values.
fn resolve_properties(
    conn: &Connection,
    defined: &[Property],
    supplied: &BTreeMap<String, Value>,
) -> StoreResult<BTreeMap<String, Value>> {
    let mut values: BTreeMap<String, Value> = defined
        .iter()
        .map(|p| (p.id.clone(), p.value_type.default_value()))
        .collect();

    for (property_id, value) in supplied {
        let property = defined
            .iter()
            .find(|p| &p.id == property_id)
            .ok_or_else(|| EntityError::PropertyNotFound(property_id.clone()))?;

        // Re-decoding through JSON checks the kind and turns RFC 3339 text
        // into a timestamp for timestamp properties.
        let value = Value::from_json(&property.id, property.value_type, &value.to_json())?;

        if property.value_type == ValueType::Categorical
            && let Value::Text(category_id) = &value
            && !properties::category_belongs(conn, &property.id, category_id)?
        {
            return Err(EntityError::InvalidCategory {
                property: property.id.clone(),
                category: category_id.clone(),
            }
            .into());
        }
        values.insert(property_id.clone(), value);
    }
    Ok(values)
}

fn upsert_row(conn: &Connection, line: &CrumbLine) -> StoreResult<()> {
    conn.execute(
        &format!(
            "INSERT INTO crumbs ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, state = excluded.state, \
             created_at = excluded.created_at, updated_at = excluded.updated_at"
        ),
        params![
            line.id,
            line.name,
            line.state.as_str(),
            to_micros(&line.created_at),
            to_micros(&line.updated_at),
        ],
    )?;
    Ok(())
}

fn insert_value(conn: &Connection, crumb_id: &str, property: &Property, value: &Value) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO crumb_properties (crumb_id, property_id, value_type, value) \
         VALUES (?1, ?2, ?3, ?4)",
        params![
            crumb_id,
            property.id,
            property.value_type.as_str(),
            value.to_json().to_string(),
        ],
    )?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
//  Log lines
// ═══════════════════════════════════════════════════════════════════════

/// A line of `crumbs.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct CrumbLine {
    pub id: String,
    pub name: String,
    pub state: CrumbState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Crumb> for CrumbLine {
    fn from(crumb: &Crumb) -> Self {
        Self {
            id: crumb.id.clone(),
            name: crumb.name.clone(),
            state: crumb.state,
            created_at: crumb.created_at,
            updated_at: crumb.updated_at,
        }
    }
}

impl LogRecord for CrumbLine {
    const FILE: LogFile = LogFile::Crumbs;

    fn insert(&self, conn: &Connection) -> StoreResult<()> {
        if self.id.is_empty() {
            return Err(StoreError::InvalidId);
        }
        upsert_row(conn, self)
    }

    fn snapshot(conn: &Connection) -> StoreResult<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM crumbs ORDER BY created_at ASC, id ASC"
        ))?;
        let rows = stmt
            .query_map([], |row| hydrate(row).map(|crumb| CrumbLine::from(&crumb)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

/// A line of `crumb_properties.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct CrumbPropertyLine {
    pub crumb_id: String,
    pub property_id: String,
    pub value_type: ValueType,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl LogRecord for CrumbPropertyLine {
    const FILE: LogFile = LogFile::CrumbProperties;

    fn insert(&self, conn: &Connection) -> StoreResult<()> {
        if self.crumb_id.is_empty() || self.property_id.is_empty() {
            return Err(StoreError::InvalidId);
        }
        let declared: Option<ValueType> = conn
            .query_row(
                "SELECT value_type FROM properties WHERE id = ?1",
                [&self.property_id],
                |row| parse_column(row, 0),
            )
            .optional()?;
        if let Some(kind) = declared
            && kind != self.value_type
        {
            return Err(EntityError::TypeMismatch {
                property: self.property_id.clone(),
                expected: kind.as_str(),
                found: self.value_type.as_str(),
            }
            .into());
        }

        let value = Value::from_json(&self.property_id, self.value_type, &self.value)?;
        conn.execute(
            "INSERT INTO crumb_properties (crumb_id, property_id, value_type, value) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(crumb_id, property_id) DO UPDATE SET \
             value_type = excluded.value_type, value = excluded.value",
            params![
                self.crumb_id,
                self.property_id,
                self.value_type.as_str(),
                value.to_json().to_string(),
            ],
        )?;
        Ok(())
    }

    fn snapshot(conn: &Connection) -> StoreResult<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT crumb_id, property_id, value_type, value FROM crumb_properties \
             ORDER BY crumb_id, property_id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(CrumbPropertyLine {
                    crumb_id: row.get(0)?,
                    property_id: row.get(1)?,
                    value_type: parse_column(row, 2)?,
                    value: json_column(row, 3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        schema::apply(&conn).unwrap();
        conn
    }

    fn define(conn: &Connection, name: &str, kind: ValueType) -> String {
        properties::set(conn, "", Property::new(name, "", kind)).unwrap().0
    }

    #[test]
    fn create_forces_draft_and_defaults() {
        let conn = conn();
        let owner = define(&conn, "owner", ValueType::Text);
        let labels = define(&conn, "labels", ValueType::List);

        let mut crumb = Crumb::new("write docs");
        crumb.state = CrumbState::Taken;
        let (id, _) = set(&conn, "", crumb).unwrap();

        let stored = get(&conn, &id).unwrap();
        assert_eq!(stored.state, CrumbState::Draft);
        assert_eq!(stored.properties[&owner], Value::Text(String::new()));
        assert_eq!(stored.properties[&labels], Value::List(Vec::new()));
        assert_eq!(stored.created_at, stored.updated_at);
    }

    #[test]
    fn caller_values_are_checked() {
        let conn = conn();
        let points = define(&conn, "points", ValueType::Integer);
        let size = define(&conn, "size", ValueType::Categorical);
        let small = properties::define_category(&conn, &size, "small", 0).unwrap();

        let mut crumb = Crumb::new("x");
        crumb.properties.insert(points.clone(), Value::from("three"));
        assert!(matches!(
            set(&conn, "", crumb),
            Err(StoreError::Entity(EntityError::TypeMismatch { .. }))
        ));

        let mut crumb = Crumb::new("x");
        crumb.properties.insert("undefined".into(), Value::Integer(1));
        assert!(matches!(
            set(&conn, "", crumb),
            Err(StoreError::Entity(EntityError::PropertyNotFound(_)))
        ));

        let mut crumb = Crumb::new("x");
        crumb.properties.insert(size.clone(), Value::from("not-a-category"));
        assert!(matches!(
            set(&conn, "", crumb),
            Err(StoreError::Entity(EntityError::InvalidCategory { .. }))
        ));

        let mut crumb = Crumb::new("x");
        crumb.properties.insert(points.clone(), Value::Integer(3));
        crumb.properties.insert(size.clone(), Value::from(small.id.as_str()));
        let (id, _) = set(&conn, "", crumb).unwrap();
        let stored = get(&conn, &id).unwrap();
        assert_eq!(stored.properties[&points], Value::Integer(3));
        assert_eq!(stored.properties[&size], Value::Text(small.id));
    }

    #[test]
    fn update_keeps_created_at() {
        let conn = conn();
        let (id, _) = set(&conn, "", Crumb::new("x")).unwrap();
        let mut crumb = get(&conn, &id).unwrap();
        let created = crumb.created_at;

        crumb.name = "renamed".into();
        crumb.created_at = DateTime::<Utc>::UNIX_EPOCH;
        crumb.set_state("ready").unwrap();
        set(&conn, &id, crumb).unwrap();

        let stored = get(&conn, &id).unwrap();
        assert_eq!(stored.name, "renamed");
        assert_eq!(stored.state, CrumbState::Ready);
        assert_eq!(stored.created_at, created);
    }

    #[test]
    fn external_id_is_accepted() {
        let conn = conn();
        let (id, _) = set(&conn, "ext-42", Crumb::new("imported")).unwrap();
        assert_eq!(id, "ext-42");
        assert_eq!(get(&conn, "ext-42").unwrap().name, "imported");
    }

    #[test]
    fn backfill_reaches_existing_crumbs() {
        let conn = conn();
        let ids: Vec<String> = (0..3)
            .map(|i| set(&conn, "", Crumb::new(format!("c{i}"))).unwrap().0)
            .collect();
        let flag = define(&conn, "blocked", ValueType::Boolean);

        for id in ids {
            assert_eq!(get(&conn, &id).unwrap().properties[&flag], Value::Boolean(false));
        }
    }

    #[test]
    fn empty_name_and_missing_row() {
        let conn = conn();
        assert!(matches!(set(&conn, "", Crumb::new("")), Err(StoreError::InvalidField(_))));
        assert!(matches!(get(&conn, "nope"), Err(StoreError::NotFound { entity: "crumb", .. })));
        assert!(matches!(delete(&conn, "nope"), Err(StoreError::NotFound { .. })));
    }
}
