//! Free-text annotations attached to crumbs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A piece of content attached to a crumb, optionally about one property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub id: String,
    /// Logical collection the note annotates (e.g. `comments`, `attachments`).
    pub table_name: String,
    pub crumb_id: String,
    #[serde(default)]
    pub property_id: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Metadata {
    pub fn new(
        table_name: impl Into<String>,
        crumb_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            table_name: table_name.into(),
            crumb_id: crumb_id.into(),
            property_id: None,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn with_property(mut self, property_id: impl Into<String>) -> Self {
        self.property_id = Some(property_id.into());
        self
    }
}
