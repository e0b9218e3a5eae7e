//! # crumbs-store
//!
//! Storage engine for crumbs.
//!
//! The durable copy of every entity is a set of line-delimited JSON files in
//! the data directory. Queries run against a SQLite cache that is deleted
//! and rebuilt from those files on every attach, so it never needs a backup
//! or a migration.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  SqliteBackend (attach / detach)         │
//! │  Table (get / set / delete / fetch)      │
//! ├─────────────────────────────────────────┤
//! │  SyncEngine  immediate | on_close | batch│
//! │  Loader      replay + repair on attach   │
//! ├─────────────────────────────────────────┤
//! │  Database (rusqlite cache, cupboard.db)  │
//! │  LogStore (*.jsonl, atomic rewrite)      │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use crumbs_core::{Crumb, Record};
//! use crumbs_store::{Backend, Config, SqliteBackend, SyncConfig};
//!
//! let backend = SqliteBackend::new();
//! backend.attach(&Config::new("/var/lib/crumbs").with_sync(SyncConfig::immediate()))?;
//!
//! let crumbs = backend.get_table("crumbs")?;
//! let id = crumbs.set("", Record::from(Crumb::new("write docs")))?;
//! let crumb: Crumb = crumbs.get_as(&id)?;
//!
//! backend.detach()?;
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod loader;
pub mod log;
pub mod table;

mod db;
mod records;
mod schema;
mod seed;
mod sync;
mod tables;

// ── re-exports ───────────────────────────────────────────────────────

pub use backend::{Backend, SqliteBackend};
pub use config::{Config, SyncConfig, SyncStrategy};
pub use error::{StoreError, StoreResult};
pub use loader::{LoadWarning, WarningKind};
pub use log::LogFile;
pub use table::{Filter, Table};
