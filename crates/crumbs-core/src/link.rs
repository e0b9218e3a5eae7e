//! Typed, directed edges between entities.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EntityError;

/// The relationship a link expresses, read as "`from` <type> `to`".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    BelongsTo,
    ChildOf,
    BranchesFrom,
    ScopedTo,
}

impl LinkType {
    pub const ALL: [LinkType; 4] = [
        Self::BelongsTo,
        Self::ChildOf,
        Self::BranchesFrom,
        Self::ScopedTo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BelongsTo => "belongs_to",
            Self::ChildOf => "child_of",
            Self::BranchesFrom => "branches_from",
            Self::ScopedTo => "scoped_to",
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkType {
    type Err = EntityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| EntityError::UnknownKind {
                vocabulary: "link type",
                value: s.to_string(),
            })
    }
}

/// A directed edge. Endpoints are identifiers of any entity and are not
/// checked for existence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    #[serde(default)]
    pub id: String,
    pub link_type: LinkType,
    pub from_id: String,
    pub to_id: String,
    pub created_at: DateTime<Utc>,
}

impl Link {
    pub fn new(link_type: LinkType, from_id: impl Into<String>, to_id: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            link_type,
            from_id: from_id.into(),
            to_id: to_id.into(),
            created_at: Utc::now(),
        }
    }
}
