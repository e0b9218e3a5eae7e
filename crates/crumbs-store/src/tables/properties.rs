//! Properties, their categories, and the backfill that keeps every crumb
//! carrying an entry for every defined property.

use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

use crumbs_core::{Category, EntityError, Property, ValueType};

use super::{duplicate_name, new_id, not_found, require};
use crate::db::{from_micros, now, parse_column, to_micros};
use crate::error::{StoreError, StoreResult};
use crate::log::LogFile;
use crate::records::LogRecord;
use crate::sync::Changes;
use crate::table::Query;

const COLUMNS: &str = "id, name, description, value_type, created_at";

fn hydrate(row: &Row<'_>) -> rusqlite::Result<Property> {
    Ok(Property {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        value_type: parse_column(row, 3)?,
        created_at: from_micros(4, row.get(4)?)?,
    })
}

// ═══════════════════════════════════════════════════════════════════════
//  Properties
// ═══════════════════════════════════════════════════════════════════════

pub(crate) fn get(conn: &Connection, id: &str) -> StoreResult<Property> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM properties WHERE id = ?1"),
        [id],
        hydrate,
    )
    .map_err(not_found("property", id))
}

fn find(conn: &Connection, id: &str) -> StoreResult<Option<Property>> {
    Ok(conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM properties WHERE id = ?1"),
            [id],
            hydrate,
        )
        .optional()?)
}

/// Every defined property, oldest first.
pub(crate) fn all(conn: &Connection) -> StoreResult<Vec<Property>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM properties ORDER BY created_at ASC, id ASC"
    ))?;
    let rows = stmt.query_map([], hydrate)?.collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn fetch(conn: &Connection, query: &Query) -> StoreResult<Vec<Property>> {
    let (clause, params) = query.where_clause();
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM properties{clause} ORDER BY created_at DESC, id DESC"
    ))?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params), hydrate)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Create or update a property.
///
/// A new property is backfilled into every existing crumb. An existing
/// property keeps its value type and creation time; only name and
/// description change.
pub(crate) fn set(conn: &Connection, id: &str, mut property: Property) -> StoreResult<(String, Changes)> {
    require("property name", &property.name)?;

    let existing = if id.is_empty() { None } else { find(conn, id)? };
    if let Some(stored) = existing {
        if stored.value_type != property.value_type {
            return Err(StoreError::InvalidField(format!(
                "value_type of property {id} cannot change from {} to {}",
                stored.value_type, property.value_type
            )));
        }
        conn.execute(
            "UPDATE properties SET name = ?2, description = ?3 WHERE id = ?1",
            params![id, property.name, property.description],
        )
        .map_err(duplicate_name("property", &property.name))?;
        return Ok((id.to_string(), Changes::files([LogFile::Properties])));
    }

    if id.is_empty() {
        property.id = new_id();
        property.created_at = now();
    } else {
        property.id = id.to_string();
    }
    conn.execute(
        &format!("INSERT INTO properties ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
        params![
            property.id,
            property.name,
            property.description,
            property.value_type.as_str(),
            to_micros(&property.created_at),
        ],
    )
    .map_err(duplicate_name("property", &property.name))?;

    let backfilled = backfill(conn, &property)?;
    debug!(property_id = %property.id, name = %property.name, backfilled, "property defined");

    Ok((
        property.id,
        Changes::files([LogFile::Properties, LogFile::CrumbProperties]),
    ))
}

/// Remove a property together with its categories and every crumb's entry
/// for it.
pub(crate) fn delete(conn: &Connection, id: &str) -> StoreResult<Changes> {
    let removed = conn.execute("DELETE FROM properties WHERE id = ?1", [id])?;
    if removed == 0 {
        return Err(StoreError::NotFound {
            entity: "property",
            id: id.to_string(),
        });
    }
    Ok(Changes::files([
        LogFile::Properties,
        LogFile::Categories,
        LogFile::CrumbProperties,
    ]))
}

// ── backfill ─────────────────────────────────────────────────────────

/// Give every crumb without an entry for `property` the kind's default.
/// Returns the number of entries added.
pub(crate) fn backfill(conn: &Connection, property: &Property) -> StoreResult<usize> {
    let default = property.value_type.default_value().to_json().to_string();
    let added = conn.execute(
        "INSERT OR IGNORE INTO crumb_properties (crumb_id, property_id, value_type, value) \
         SELECT id, ?1, ?2, ?3 FROM crumbs",
        params![property.id, property.value_type.as_str(), default],
    )?;
    Ok(added)
}

/// [`backfill`] for every defined property.
pub(crate) fn backfill_all(conn: &Connection) -> StoreResult<usize> {
    let mut added = 0;
    for property in all(conn)? {
        added += backfill(conn, &property)?;
    }
    Ok(added)
}

// ═══════════════════════════════════════════════════════════════════════
//  Categories
// ═══════════════════════════════════════════════════════════════════════

const CATEGORY_COLUMNS: &str = "id, property_id, name, ordinal";

fn hydrate_category(row: &Row<'_>) -> rusqlite::Result<Category> {
    Ok(Category {
        id: row.get(0)?,
        property_id: row.get(1)?,
        name: row.get(2)?,
        ordinal: row.get(3)?,
    })
}

/// Add a category to a categorical property.
pub(crate) fn define_category(
    conn: &Connection,
    property_id: &str,
    name: &str,
    ordinal: i64,
) -> StoreResult<Category> {
    require("category name", name)?;
    let property = get(conn, property_id)?;
    ensure_categorical(&property)?;

    let category = Category::new(property_id, name, ordinal).with_id(new_id());
    conn.execute(
        &format!("INSERT INTO categories ({CATEGORY_COLUMNS}) VALUES (?1, ?2, ?3, ?4)"),
        params![category.id, category.property_id, category.name, category.ordinal],
    )
    .map_err(duplicate_name("category", name))?;

    debug!(property_id, category_id = %category.id, name, ordinal, "category defined");
    Ok(category)
}

/// Categories of `property_id` in display order.
pub(crate) fn categories(conn: &Connection, property_id: &str) -> StoreResult<Vec<Category>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CATEGORY_COLUMNS} FROM categories WHERE property_id = ?1 \
         ORDER BY ordinal ASC, name ASC"
    ))?;
    let rows = stmt
        .query_map([property_id], hydrate_category)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Whether `category_id` is one of `property_id`'s categories.
pub(crate) fn category_belongs(conn: &Connection, property_id: &str, category_id: &str) -> StoreResult<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM categories WHERE id = ?1 AND property_id = ?2",
            [category_id, property_id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn ensure_categorical(property: &Property) -> StoreResult<()> {
    if property.value_type != ValueType::Categorical {
        return Err(EntityError::TypeMismatch {
            property: property.id.clone(),
            expected: ValueType::Categorical.as_str(),
            found: property.value_type.as_str(),
        }
        .into());
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
//  Log lines
// ═══════════════════════════════════════════════════════════════════════

impl LogRecord for Property {
    const FILE: LogFile = LogFile::Properties;

    fn insert(&self, conn: &Connection) -> StoreResult<()> {
        conn.execute(
            &format!(
                "INSERT INTO properties ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name, \
                 description = excluded.description, value_type = excluded.value_type, \
                 created_at = excluded.created_at"
            ),
            params![
                self.id,
                self.name,
                self.description,
                self.value_type.as_str(),
                to_micros(&self.created_at),
            ],
        )?;
        Ok(())
    }

    fn snapshot(conn: &Connection) -> StoreResult<Vec<Self>> {
        all(conn)
    }
}

impl LogRecord for Category {
    const FILE: LogFile = LogFile::Categories;

    fn insert(&self, conn: &Connection) -> StoreResult<()> {
        if let Some(property) = find(conn, &self.property_id)? {
            ensure_categorical(&property)?;
        }
        conn.execute(
            &format!(
                "INSERT INTO categories ({CATEGORY_COLUMNS}) VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(id) DO UPDATE SET property_id = excluded.property_id, \
                 name = excluded.name, ordinal = excluded.ordinal"
            ),
            params![self.id, self.property_id, self.name, self.ordinal],
        )?;
        Ok(())
    }

    fn snapshot(conn: &Connection) -> StoreResult<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM categories ORDER BY property_id, ordinal, name"
        ))?;
        let rows = stmt
            .query_map([], hydrate_category)?
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
        set(conn, "", Property::new(name, "", kind)).unwrap().0
    }

    #[test]
    fn create_assigns_id_and_rejects_duplicates() {
        let conn = conn();
        let id = define(&conn, "owner", ValueType::Text);
        assert!(!id.is_empty());
        assert_eq!(get(&conn, &id).unwrap().name, "owner");

        let err = set(&conn, "", Property::new("owner", "", ValueType::Text)).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateName { entity: "property", .. }));

        let err = set(&conn, "", Property::new("", "", ValueType::Text)).unwrap_err();
        assert!(matches!(err, StoreError::InvalidField(_)));
    }

    #[test]
    fn value_type_is_immutable() {
        let conn = conn();
        let id = define(&conn, "points", ValueType::Integer);

        let mut changed = get(&conn, &id).unwrap();
        changed.value_type = ValueType::Text;
        assert!(matches!(set(&conn, &id, changed), Err(StoreError::InvalidField(_))));

        let mut renamed = get(&conn, &id).unwrap();
        renamed.name = "estimate".into();
        set(&conn, &id, renamed).unwrap();
        assert_eq!(get(&conn, &id).unwrap().name, "estimate");
    }

    #[test]
    fn categories_sort_by_ordinal_then_name() {
        let conn = conn();
        let id = define(&conn, "size", ValueType::Categorical);
        define_category(&conn, &id, "large", 2).unwrap();
        define_category(&conn, &id, "medium", 1).unwrap();
        define_category(&conn, &id, "mid", 1).unwrap();
        define_category(&conn, &id, "small", 0).unwrap();

        let names: Vec<String> = categories(&conn, &id)
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, ["small", "medium", "mid", "large"]);
        assert!(categories(&conn, "nope").unwrap().is_empty());
    }

    #[test]
    fn define_category_validates() {
        let conn = conn();
        let text = define(&conn, "notes", ValueType::Text);
        let cat = define(&conn, "size", ValueType::Categorical);

        assert!(matches!(
            define_category(&conn, &text, "x", 0),
            Err(StoreError::Entity(EntityError::TypeMismatch { .. }))
        ));
        assert!(matches!(
            define_category(&conn, "missing", "x", 0),
            Err(StoreError::NotFound { entity: "property", .. })
        ));
        assert!(matches!(
            define_category(&conn, &cat, "", 0),
            Err(StoreError::InvalidField(_))
        ));

        let small = define_category(&conn, &cat, "small", 0).unwrap();
        assert!(category_belongs(&conn, &cat, &small.id).unwrap());
        assert!(matches!(
            define_category(&conn, &cat, "small", 5),
            Err(StoreError::DuplicateName { entity: "category", .. })
        ));
    }

    #[test]
    fn delete_cascades_to_categories() {
        let conn = conn();
        let id = define(&conn, "size", ValueType::Categorical);
        define_category(&conn, &id, "small", 0).unwrap();
        delete(&conn, &id).unwrap();
        assert!(categories(&conn, &id).unwrap().is_empty());
        assert!(matches!(delete(&conn, &id), Err(StoreError::NotFound { .. })));
    }
}
