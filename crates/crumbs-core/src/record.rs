//! The closed set of table names and the records they hold.
//!
//! [`Record`] is the payload type of the generic table accessor: one
//! variant per table, so a payload of the wrong kind is an ordinary value
//! the store can reject rather than a failed downcast.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::crumb::Crumb;
use crate::link::Link;
use crate::metadata::Metadata;
use crate::property::Property;
use crate::stash::Stash;
use crate::trail::Trail;

/// The standard entity tables exposed through the accessor interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableName {
    Crumbs,
    Trails,
    Properties,
    Metadata,
    Links,
    Stashes,
}

impl TableName {
    pub const ALL: [TableName; 6] = [
        Self::Crumbs,
        Self::Trails,
        Self::Properties,
        Self::Metadata,
        Self::Links,
        Self::Stashes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Crumbs => "crumbs",
            Self::Trails => "trails",
            Self::Properties => "properties",
            Self::Metadata => "metadata",
            Self::Links => "links",
            Self::Stashes => "stashes",
        }
    }

    /// Singular noun used in error messages.
    pub fn entity(&self) -> &'static str {
        match self {
            Self::Crumbs => "crumb",
            Self::Trails => "trail",
            Self::Properties => "property",
            Self::Metadata => "metadata",
            Self::Links => "link",
            Self::Stashes => "stash",
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TableName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// One row of any standard table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", rename_all = "lowercase")]
pub enum Record {
    Crumb(Crumb),
    Trail(Trail),
    Property(Property),
    Metadata(Metadata),
    Link(Link),
    Stash(Stash),
}

impl Record {
    /// The table this record belongs in.
    pub fn table(&self) -> TableName {
        match self {
            Self::Crumb(_) => TableName::Crumbs,
            Self::Trail(_) => TableName::Trails,
            Self::Property(_) => TableName::Properties,
            Self::Metadata(_) => TableName::Metadata,
            Self::Link(_) => TableName::Links,
            Self::Stash(_) => TableName::Stashes,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Crumb(r) => &r.id,
            Self::Trail(r) => &r.id,
            Self::Property(r) => &r.id,
            Self::Metadata(r) => &r.id,
            Self::Link(r) => &r.id,
            Self::Stash(r) => &r.id,
        }
    }
}

macro_rules! record_conversions {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Record {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }

            impl TryFrom<Record> for $ty {
                type Error = Record;

                fn try_from(record: Record) -> Result<Self, Self::Error> {
                    match record {
                        Record::$variant(value) => Ok(value),
                        other => Err(other),
                    }
                }
            }
        )*
    };
}

record_conversions! {
    Crumb => Crumb,
    Trail => Trail,
    Property => Property,
    Metadata => Metadata,
    Link => Link,
    Stash => Stash,
}
