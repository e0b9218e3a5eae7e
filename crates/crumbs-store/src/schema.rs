//! Cache schema.
//!
//! The cache is recreated from scratch on every attach, so there is exactly
//! one schema and no migration history: change [`SCHEMA`] and bump
//! [`SCHEMA_VERSION`] and the next attach rebuilds under the new layout.

use rusqlite::Connection;
use tracing::debug;

use crate::error::StoreResult;

/// Recorded in `PRAGMA user_version` for diagnostics.
pub const SCHEMA_VERSION: u32 = 1;

/// Every table the schema creates, parents before children.
pub const TABLES: &[&str] = &[
    "properties",
    "categories",
    "crumbs",
    "crumb_properties",
    "trails",
    "links",
    "metadata",
    "stashes",
    "stash_history",
];

static SCHEMA: &str = r#"
    CREATE TABLE properties (
        id          TEXT PRIMARY KEY CHECK(id <> ''),
        name        TEXT NOT NULL UNIQUE CHECK(name <> ''),
        description TEXT NOT NULL DEFAULT '',
        value_type  TEXT NOT NULL CHECK(value_type IN ('categorical','text','integer','boolean','timestamp','list')),
        created_at  INTEGER NOT NULL
    );

    CREATE TABLE categories (
        id          TEXT PRIMARY KEY CHECK(id <> ''),
        property_id TEXT NOT NULL REFERENCES properties(id) ON DELETE CASCADE,
        name        TEXT NOT NULL CHECK(name <> ''),
        ordinal     INTEGER NOT NULL DEFAULT 0,
        UNIQUE(property_id, name)
    );
    CREATE INDEX idx_categories_property ON categories(property_id, ordinal, name);

    CREATE TABLE crumbs (
        id          TEXT PRIMARY KEY CHECK(id <> ''),
        name        TEXT NOT NULL CHECK(name <> ''),
        state       TEXT NOT NULL CHECK(state IN ('draft','pending','ready','taken','pebble','dust')),
        created_at  INTEGER NOT NULL,
        updated_at  INTEGER NOT NULL
    );
    CREATE INDEX idx_crumbs_state ON crumbs(state);
    CREATE INDEX idx_crumbs_name ON crumbs(name);
    CREATE INDEX idx_crumbs_created ON crumbs(created_at);

    CREATE TABLE crumb_properties (
        crumb_id    TEXT NOT NULL REFERENCES crumbs(id) ON DELETE CASCADE,
        property_id TEXT NOT NULL REFERENCES properties(id) ON DELETE CASCADE,
        value_type  TEXT NOT NULL,
        value       TEXT NOT NULL,
        PRIMARY KEY (crumb_id, property_id)
    );
    CREATE INDEX idx_crumb_properties_property ON crumb_properties(property_id);

    CREATE TABLE trails (
        id           TEXT PRIMARY KEY CHECK(id <> ''),
        state        TEXT NOT NULL CHECK(state IN ('draft','pending','active','completed','abandoned')),
        created_at   INTEGER NOT NULL,
        completed_at INTEGER
    );
    CREATE INDEX idx_trails_state ON trails(state);

    CREATE TABLE links (
        id         TEXT PRIMARY KEY CHECK(id <> ''),
        link_type  TEXT NOT NULL CHECK(link_type IN ('belongs_to','child_of','branches_from','scoped_to')),
        from_id    TEXT NOT NULL CHECK(from_id <> ''),
        to_id      TEXT NOT NULL CHECK(to_id <> ''),
        created_at INTEGER NOT NULL
    );
    CREATE INDEX idx_links_from ON links(from_id);
    CREATE INDEX idx_links_to ON links(to_id);

    CREATE TABLE metadata (
        id          TEXT PRIMARY KEY CHECK(id <> ''),
        table_name  TEXT NOT NULL CHECK(table_name <> ''),
        crumb_id    TEXT NOT NULL REFERENCES crumbs(id) ON DELETE CASCADE,
        property_id TEXT,
        content     TEXT NOT NULL,
        created_at  INTEGER NOT NULL
    );
    CREATE INDEX idx_metadata_crumb ON metadata(crumb_id);

    CREATE TABLE stashes (
        id             TEXT PRIMARY KEY CHECK(id <> ''),
        name           TEXT NOT NULL UNIQUE CHECK(name <> ''),
        stash_type     TEXT NOT NULL CHECK(stash_type IN ('resource','artifact','context','counter','lock')),
        value          TEXT NOT NULL,
        version        INTEGER NOT NULL DEFAULT 0,
        last_operation TEXT NOT NULL DEFAULT '',
        changed_by     TEXT,
        created_at     INTEGER NOT NULL,
        updated_at     INTEGER NOT NULL
    );

    CREATE TABLE stash_history (
        id         TEXT PRIMARY KEY CHECK(id <> ''),
        stash_id   TEXT NOT NULL REFERENCES stashes(id) ON DELETE CASCADE,
        version    INTEGER NOT NULL,
        value      TEXT NOT NULL,
        operation  TEXT NOT NULL,
        changed_by TEXT,
        created_at INTEGER NOT NULL,
        UNIQUE(stash_id, version)
    );
"#;

/// Create every table and index on a fresh connection.
pub fn apply(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(SCHEMA)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    debug!(version = SCHEMA_VERSION, tables = TABLES.len(), "cache schema applied");
    Ok(())
}

// ── tests ────────────────────────────────────────────────────────────
