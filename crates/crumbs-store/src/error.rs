//! Error types for the crumbs-store crate.
//!
//! All storage operations return [`StoreError`] via [`StoreResult`].
//! Validation failures are raised before any row is touched, so an error
//! from a table operation means nothing was written.

use crumbs_core::{EntityError, TableName};
use thiserror::Error;

/// Alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the storage engine.
#[derive(Debug, Error)]
pub enum StoreError {
    // -- Configuration and lifecycle ----------------------------------------
    /// The attach configuration is incomplete or inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// The configuration file is not valid TOML.
    #[error("configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// `attach` was called on an attached backend.
    #[error("backend is already attached")]
    AlreadyAttached,

    /// The backend (or the accessor's attachment) is no longer attached.
    #[error("backend is detached")]
    Detached,

    // -- Table operations ---------------------------------------------------
    /// No table with this name exists.
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// The requested record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// An empty identifier was passed where one is required.
    #[error("invalid identifier: must not be empty")]
    InvalidId,

    /// The record passed to `set` belongs to another table.
    #[error("invalid data for table {table}: got a {found} record")]
    InvalidData { table: TableName, found: TableName },

    /// A field failed validation.
    #[error("invalid field: {0}")]
    InvalidField(String),

    /// A fetch filter used an unknown key or a wrongly shaped value.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// A unique name is already taken.
    #[error("{entity} name already exists: {name}")]
    DuplicateName { entity: &'static str, name: String },

    /// An entity method or re-validation rejected the change.
    #[error(transparent)]
    Entity(#[from] EntityError),

    // -- Infrastructure -----------------------------------------------------
    /// SQLite operation failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Reading or writing a log file failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A lock was poisoned by a panicking thread.
    #[error("lock poisoned: {0}")]
    Poisoned(String),
}

impl StoreError {
    /// Whether this error rejects a single record (bad shape, failed
    /// constraint) rather than signalling a broken store. Log replay skips
    /// rejected lines and aborts on everything else.
    pub(crate) fn is_rejection(&self) -> bool {
        match self {
            Self::Entity(_)
            | Self::InvalidField(_)
            | Self::InvalidId
            | Self::Json(_)
            | Self::DuplicateName { .. } => true,
            Self::Sqlite(err) => is_constraint_violation(err),
            _ => false,
        }
    }
}

/// Whether `err` is a SQLite constraint failure of any kind.
pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Whether `err` is a UNIQUE or PRIMARY KEY failure.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    if let rusqlite::Error::SqliteFailure(e, _) = err
        && e.code == rusqlite::ErrorCode::ConstraintViolation
    {
        return e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
            || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY;
    }
    false
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Poisoned(err.to_string())
    }
}
