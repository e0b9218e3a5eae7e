//! Row hydration, validation and SQL for each entity type.
//!
//! Every module exposes the same shape of functions, all taking a
//! connection (or open transaction):
//!
//! - `get(conn, id)` / `fetch(conn, query)` for reads,
//! - `set(conn, id, entity)` returning the effective id and the touched
//!   log files,
//! - `delete(conn, id)` returning the touched log files,
//!
//! plus the [`LogRecord`](crate::records::LogRecord) implementation for
//! the module's log lines.

pub(crate) mod crumbs;
pub(crate) mod links;
pub(crate) mod metadata;
pub(crate) mod properties;
pub(crate) mod stashes;
pub(crate) mod trails;

use uuid::Uuid;

use crate::error::{StoreError, StoreResult, is_unique_violation};

/// A fresh time-ordered identifier.
pub(crate) fn new_id() -> String {
    Uuid::now_v7().to_string()
}

/// Map "no row" to a typed not-found error.
pub(crate) fn not_found(entity: &'static str, id: &str) -> impl FnOnce(rusqlite::Error) -> StoreError {
    let id = id.to_string();
    move |err| match err {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound { entity, id },
        other => StoreError::Sqlite(other),
    }
}

/// Fail with [`StoreError::InvalidField`] when `value` is empty.
pub(crate) fn require(field: &str, value: &str) -> StoreResult<()> {
    if value.is_empty() {
        return Err(StoreError::InvalidField(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Map a UNIQUE failure on `name` to [`StoreError::DuplicateName`].
pub(crate) fn duplicate_name(entity: &'static str, name: &str) -> impl FnOnce(rusqlite::Error) -> StoreError {
    let name = name.to_string();
    move |err| {
        if is_unique_violation(&err) {
            StoreError::DuplicateName { entity, name }
        } else {
            StoreError::Sqlite(err)
        }
    }
}
