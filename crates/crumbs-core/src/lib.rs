//! # crumbs-core
//!
//! Domain model for the crumbs work-item tracker.
//!
//! - **[`crumb`]** -- work items with a validated lifecycle and a typed
//!   property map.
//! - **[`trail`]** -- exploration sessions with a directed state machine.
//! - **[`property`]** -- property definitions and categories.
//! - **[`value`]** -- the tagged [`Value`] type and the [`ValueType`]
//!   vocabulary with per-kind defaults.
//! - **[`link`]**, **[`metadata`]** -- edges and annotations.
//! - **[`stash`]** -- shared mutable values with counter and lock
//!   semantics, plus their history records.
//! - **[`record`]** -- the closed [`Record`] sum type and [`TableName`]
//!   vocabulary used by storage accessors.
//!
//! Entity methods only mutate memory; persisting the result is the store's
//! job, and the store re-validates before writing.

pub mod crumb;
pub mod error;
pub mod link;
pub mod metadata;
pub mod property;
pub mod record;
pub mod stash;
pub mod trail;
pub mod value;

// ── re-exports ───────────────────────────────────────────────────────

pub use crumb::{Crumb, CrumbState};
pub use error::{EntityError, EntityResult};
pub use link::{Link, LinkType};
pub use metadata::Metadata;
pub use property::{Category, Property};
pub use record::{Record, TableName};
pub use stash::{Stash, StashHistoryEntry, StashType};
pub use trail::{Trail, TrailState};
pub use value::{Value, ValueType};
