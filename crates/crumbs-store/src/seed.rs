//! Built-in properties for a fresh data directory.

use crumbs_core::{Property, ValueType};
use tracing::info;

use crate::db::Database;
use crate::error::StoreResult;
use crate::log::{LogFile, LogStore};
use crate::records;
use crate::tables::properties;

struct Builtin {
    name: &'static str,
    description: &'static str,
    value_type: ValueType,
    /// Category names in ordinal order.
    categories: &'static [&'static str],
}

const BUILTINS: &[Builtin] = &[
    Builtin {
        name: "priority",
        description: "How urgent the work is",
        value_type: ValueType::Categorical,
        categories: &["highest", "high", "medium", "low", "lowest"],
    },
    Builtin {
        name: "type",
        description: "Kind of work",
        value_type: ValueType::Categorical,
        categories: &["task", "epic", "bug", "chore"],
    },
    Builtin {
        name: "description",
        description: "Longer explanation of the work",
        value_type: ValueType::Text,
        categories: &[],
    },
    Builtin {
        name: "owner",
        description: "Who is responsible",
        value_type: ValueType::Text,
        categories: &[],
    },
    Builtin {
        name: "labels",
        description: "Free-form tags",
        value_type: ValueType::List,
        categories: &[],
    },
];

/// Define the built-in properties and write them to the logs right away,
/// whatever the sync strategy, so the next attach finds them.
pub(crate) fn seed(db: &Database, logs: &LogStore) -> StoreResult<()> {
    db.execute_mut(|conn| {
        let tx = conn.transaction()?;
        for builtin in BUILTINS {
            let property = Property::new(builtin.name, builtin.description, builtin.value_type);
            let (id, _) = properties::set(&tx, "", property)?;
            for (ordinal, name) in builtin.categories.iter().enumerate() {
                properties::define_category(&tx, &id, name, ordinal as i64)?;
            }
        }
        tx.commit()?;

        for file in [LogFile::Properties, LogFile::Categories, LogFile::CrumbProperties] {
            records::rewrite_file(conn, logs, file)?;
        }
        Ok(())
    })?;

    info!(properties = BUILTINS.len(), "seeded built-in properties");
    Ok(())
}
