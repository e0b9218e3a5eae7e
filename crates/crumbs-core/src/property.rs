//! Property definitions and the categories of categorical properties.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value::ValueType;

/// A property every crumb carries a value for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    /// Unique identifier (UUID v7). Empty until first stored.
    #[serde(default)]
    pub id: String,
    /// Unique name.
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub value_type: ValueType,
    pub created_at: DateTime<Utc>,
}

impl Property {
    pub fn new(name: impl Into<String>, description: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            description: description.into(),
            value_type,
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// One allowed value of a categorical property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    #[serde(default)]
    pub id: String,
    /// The categorical property this category belongs to.
    pub property_id: String,
    /// Unique within the property.
    pub name: String,
    /// Display and sort position; lower sorts first.
    pub ordinal: i64,
}

impl Category {
    pub fn new(property_id: impl Into<String>, name: impl Into<String>, ordinal: i64) -> Self {
        Self {
            id: String::new(),
            property_id: property_id.into(),
            name: name.into(),
            ordinal,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Display order: ascending ordinal, ties broken by name.
    pub fn display_order(&self, other: &Self) -> Ordering {
        self.ordinal
            .cmp(&other.ordinal)
            .then_with(|| self.name.cmp(&other.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_order_breaks_ties_by_name() {
        let mut cats = vec![
            Category::new("p", "low", 3),
            Category::new("p", "beta", 1),
            Category::new("p", "alpha", 1),
            Category::new("p", "top", 0),
        ];
        cats.sort_by(Category::display_order);
        let names: Vec<_> = cats.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["top", "alpha", "beta", "low"]);
    }
}
