//! The per-table CRUD accessor.
//!
//! A [`Table`] is handed out by [`SqliteBackend::get_table`] and stays
//! valid for the attachment it was issued under. Once that attachment is
//! detached every call fails with [`StoreError::Detached`], even if the
//! backend has been attached again since.
//!
//! Writes run inside one cache transaction and then hand the touched log
//! files to the sync engine; reads go straight to the cache.
//!
//! [`SqliteBackend::get_table`]: crate::SqliteBackend

use std::sync::Weak;

use crumbs_core::{CrumbState, Record, TableName, TrailState};
use tracing::{debug, instrument};

use crate::backend::{Attached, Shared};
use crate::error::{StoreError, StoreResult};
use crate::tables::{crumbs, links, metadata, properties, stashes, trails};

/// Fetch filter: a JSON object such as `{"states": ["ready", "taken"]}` or
/// `{"name": "deploy"}`.
pub type Filter = serde_json::Map<String, serde_json::Value>;

// ═══════════════════════════════════════════════════════════════════════
//  Query
// ═══════════════════════════════════════════════════════════════════════

/// A validated [`Filter`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct Query {
    pub states: Option<Vec<String>>,
    pub name: Option<String>,
}

impl Query {
    /// Validate `filter` against what `table` supports.
    pub fn parse(table: TableName, filter: Option<&Filter>) -> StoreResult<Self> {
        let mut query = Self::default();
        let Some(filter) = filter else {
            return Ok(query);
        };

        for (key, value) in filter {
            match key.as_str() {
                "states" if matches!(table, TableName::Crumbs | TableName::Trails) => {
                    let items = value.as_array().ok_or_else(|| {
                        StoreError::InvalidFilter("states must be an array of strings".into())
                    })?;
                    let mut states = Vec::with_capacity(items.len());
                    for item in items {
                        let state = item.as_str().ok_or_else(|| {
                            StoreError::InvalidFilter("states must be an array of strings".into())
                        })?;
                        let known = match table {
                            TableName::Crumbs => state.parse::<CrumbState>().is_ok(),
                            _ => state.parse::<TrailState>().is_ok(),
                        };
                        if !known {
                            return Err(StoreError::InvalidFilter(format!(
                                "unknown {} state: {state}",
                                table.entity()
                            )));
                        }
                        states.push(state.to_string());
                    }
                    query.states = Some(states);
                }
                "name"
                    if matches!(
                        table,
                        TableName::Crumbs | TableName::Properties | TableName::Stashes
                    ) =>
                {
                    let name = value
                        .as_str()
                        .ok_or_else(|| StoreError::InvalidFilter("name must be a string".into()))?;
                    query.name = Some(name.to_string());
                }
                other => {
                    return Err(StoreError::InvalidFilter(format!(
                        "unsupported key for {table}: {other}"
                    )));
                }
            }
        }
        Ok(query)
    }

    /// An empty state set matches nothing.
    pub fn matches_nothing(&self) -> bool {
        self.states.as_ref().is_some_and(Vec::is_empty)
    }

    /// SQL `WHERE` clause (empty when unfiltered) and its parameters.
    pub fn where_clause(&self) -> (String, Vec<String>) {
        let mut clauses = Vec::new();
        let mut params = Vec::new();
        if let Some(states) = &self.states {
            let marks = vec!["?"; states.len()].join(", ");
            clauses.push(format!("state IN ({marks})"));
            params.extend(states.iter().cloned());
        }
        if let Some(name) = &self.name {
            clauses.push("name = ?".to_string());
            params.push(name.clone());
        }
        if clauses.is_empty() {
            (String::new(), params)
        } else {
            (format!(" WHERE {}", clauses.join(" AND ")), params)
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Table
// ═══════════════════════════════════════════════════════════════════════

/// CRUD accessor for one standard table.
#[derive(Debug)]
pub struct Table {
    name: TableName,
    generation: u64,
    shared: Weak<Shared>,
}

impl Table {
    pub(crate) fn new(name: TableName, generation: u64, shared: Weak<Shared>) -> Self {
        Self {
            name,
            generation,
            shared,
        }
    }

    pub fn name(&self) -> TableName {
        self.name
    }

    /// Look up one record by id.
    #[instrument(skip(self), fields(table = %self.name))]
    pub fn get(&self, id: &str) -> StoreResult<Record> {
        if id.is_empty() {
            return Err(StoreError::InvalidId);
        }
        self.read(|attached| {
            attached.db.execute(|conn| {
                Ok(match self.name {
                    TableName::Crumbs => crumbs::get(conn, id)?.into(),
                    TableName::Trails => trails::get(conn, id)?.into(),
                    TableName::Properties => properties::get(conn, id)?.into(),
                    TableName::Metadata => metadata::get(conn, id)?.into(),
                    TableName::Links => links::get(conn, id)?.into(),
                    TableName::Stashes => stashes::get(conn, id)?.into(),
                })
            })
        })
    }

    /// [`Table::get`] unwrapped into the table's entity type.
    pub fn get_as<T>(&self, id: &str) -> StoreResult<T>
    where
        T: TryFrom<Record, Error = Record>,
    {
        self.get(id)?.try_into().map_err(|other: Record| StoreError::InvalidData {
            table: self.name,
            found: other.table(),
        })
    }

    /// Create (`id` empty) or update/insert (`id` given) a record and
    /// return its id.
    #[instrument(skip(self, record), fields(table = %self.name))]
    pub fn set(&self, id: &str, record: Record) -> StoreResult<String> {
        self.write(|attached| {
            if record.table() != self.name {
                return Err(StoreError::InvalidData {
                    table: self.name,
                    found: record.table(),
                });
            }

            let (id, changes) = attached.db.execute_mut(|conn| {
                let tx = conn.transaction()?;
                let out = match record {
                    Record::Crumb(crumb) => crumbs::set(&tx, id, crumb)?,
                    Record::Trail(trail) => trails::set(&tx, id, trail)?,
                    Record::Property(property) => properties::set(&tx, id, property)?,
                    Record::Metadata(meta) => metadata::set(&tx, id, meta)?,
                    Record::Link(link) => links::set(&tx, id, link)?,
                    Record::Stash(stash) => stashes::set(&tx, id, stash)?,
                };
                tx.commit()?;
                Ok(out)
            })?;

            debug!(id = %id, "record stored");
            attached.sync.persist(&attached.db, &attached.logs, changes)?;
            Ok(id)
        })
    }

    /// Remove a record.
    #[instrument(skip(self), fields(table = %self.name))]
    pub fn delete(&self, id: &str) -> StoreResult<()> {
        if id.is_empty() {
            return Err(StoreError::InvalidId);
        }
        self.write(|attached| {
            let changes = attached.db.execute_mut(|conn| {
                let tx = conn.transaction()?;
                let changes = match self.name {
                    TableName::Crumbs => crumbs::delete(&tx, id)?,
                    TableName::Trails => trails::delete(&tx, id)?,
                    TableName::Properties => properties::delete(&tx, id)?,
                    TableName::Metadata => metadata::delete(&tx, id)?,
                    TableName::Links => links::delete(&tx, id)?,
                    TableName::Stashes => stashes::delete(&tx, id)?,
                };
                tx.commit()?;
                Ok(changes)
            })?;

            debug!(id, "record deleted");
            attached.sync.persist(&attached.db, &attached.logs, changes)
        })
    }

    /// All records matching `filter`, newest first.
    #[instrument(skip(self, filter), fields(table = %self.name))]
    pub fn fetch(&self, filter: Option<&Filter>) -> StoreResult<Vec<Record>> {
        self.read(|attached| {
            let query = Query::parse(self.name, filter)?;
            if query.matches_nothing() {
                return Ok(Vec::new());
            }
            attached.db.execute(|conn| {
                Ok(match self.name {
                    TableName::Crumbs => into_records(crumbs::fetch(conn, &query)?),
                    TableName::Trails => into_records(trails::fetch(conn, &query)?),
                    TableName::Properties => into_records(properties::fetch(conn, &query)?),
                    TableName::Metadata => into_records(metadata::fetch(conn, &query)?),
                    TableName::Links => into_records(links::fetch(conn, &query)?),
                    TableName::Stashes => into_records(stashes::fetch(conn, &query)?),
                })
            })
        })
    }

    // ── lock helpers ─────────────────────────────────────────────────

    fn read<T>(&self, f: impl FnOnce(&Attached) -> StoreResult<T>) -> StoreResult<T> {
        let shared = self.shared.upgrade().ok_or(StoreError::Detached)?;
        let guard = shared.state.read()?;
        match guard.as_ref() {
            Some(attached) if attached.generation == self.generation => f(attached),
            _ => Err(StoreError::Detached),
        }
    }

    fn write<T>(&self, f: impl FnOnce(&mut Attached) -> StoreResult<T>) -> StoreResult<T> {
        let shared = self.shared.upgrade().ok_or(StoreError::Detached)?;
        let mut guard = shared.state.write()?;
        match guard.as_mut() {
            Some(attached) if attached.generation == self.generation => f(attached),
            _ => Err(StoreError::Detached),
        }
    }
}

fn into_records<T: Into<Record>>(rows: Vec<T>) -> Vec<Record> {
    rows.into_iter().map(Into::into).collect()
}

// ── tests ────────────────────────────────────────────────────────────
