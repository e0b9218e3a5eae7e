//! Work items ("crumbs") and their lifecycle.
//!
//! ```text
//! draft ─┬─ pending ─ ready ─ taken ──► pebble
//!        └──────── any state ─────────► dust
//! ```
//!
//! [`Crumb::set_state`] accepts any state in the vocabulary; [`Crumb::pebble`]
//! only completes a `taken` crumb, while [`Crumb::dust`] abandons from
//! anywhere, including `dust` itself.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EntityError, EntityResult};
use crate::property::{Category, Property};
use crate::value::{Value, ValueType};

/// Lifecycle state of a crumb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrumbState {
    /// Initial state of every new crumb.
    #[default]
    Draft,
    Pending,
    Ready,
    /// Claimed by a worker.
    Taken,
    /// Completed successfully.
    Pebble,
    /// Failed or abandoned.
    Dust,
}

impl CrumbState {
    pub const ALL: [CrumbState; 6] = [
        Self::Draft,
        Self::Pending,
        Self::Ready,
        Self::Taken,
        Self::Pebble,
        Self::Dust,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Taken => "taken",
            Self::Pebble => "pebble",
            Self::Dust => "dust",
        }
    }
}

impl fmt::Display for CrumbState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CrumbState {
    type Err = EntityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| EntityError::InvalidState(s.to_string()))
    }
}

/// A work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crumb {
    /// Unique identifier (UUID v7). Empty until first stored.
    #[serde(default)]
    pub id: String,
    /// Display name; must not be empty.
    pub name: String,
    #[serde(default)]
    pub state: CrumbState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Property id → value. Always holds an entry for every defined
    /// property once stored.
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

impl Crumb {
    /// A draft crumb with the given name and no identifier yet.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            name: name.into(),
            state: CrumbState::Draft,
            created_at: now,
            updated_at: now,
            properties: BTreeMap::new(),
        }
    }

    /// Move to any state in the vocabulary.
    pub fn set_state(&mut self, state: &str) -> EntityResult<()> {
        self.state = state.parse()?;
        self.touch();
        Ok(())
    }

    /// Complete successfully. Only legal from `taken`.
    pub fn pebble(&mut self) -> EntityResult<()> {
        if self.state != CrumbState::Taken {
            return Err(EntityError::InvalidTransition {
                from: self.state.to_string(),
                to: CrumbState::Pebble.to_string(),
            });
        }
        self.state = CrumbState::Pebble;
        self.touch();
        Ok(())
    }

    /// Fail or abandon. Legal from every state.
    pub fn dust(&mut self) {
        self.state = CrumbState::Dust;
        self.touch();
    }

    /// Look up the value stored for `property_id`.
    pub fn get_property(&self, property_id: &str) -> EntityResult<&Value> {
        self.properties
            .get(property_id)
            .ok_or_else(|| EntityError::PropertyNotFound(property_id.to_string()))
    }

    /// Replace the value for `property`, checking it against the property's
    /// kind. The crumb must already carry an entry for the property.
    pub fn set_property(&mut self, property: &Property, value: Value) -> EntityResult<()> {
        if !self.properties.contains_key(&property.id) {
            return Err(EntityError::PropertyNotFound(property.id.clone()));
        }
        check_kind(property, &value)?;
        self.properties.insert(property.id.clone(), value);
        self.touch();
        Ok(())
    }

    /// Pick `category` as the value of a categorical `property`.
    pub fn set_category(&mut self, property: &Property, category: &Category) -> EntityResult<()> {
        if property.value_type != ValueType::Categorical || category.property_id != property.id {
            return Err(EntityError::InvalidCategory {
                property: property.id.clone(),
                category: category.id.clone(),
            });
        }
        self.set_property(property, Value::Text(category.id.clone()))
    }

    /// Reset `property` to its kind's default.
    pub fn clear_property(&mut self, property: &Property) -> EntityResult<()> {
        self.set_property(property, property.value_type.default_value())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Fail with [`EntityError::TypeMismatch`] unless `value` fits `property`.
pub fn check_kind(property: &Property, value: &Value) -> EntityResult<()> {
    if property.value_type.accepts(value) {
        Ok(())
    } else {
        Err(EntityError::TypeMismatch {
            property: property.id.clone(),
            expected: property.value_type.as_str(),
            found: value.kind_name(),
        })
    }
}

// ── tests ────────────────────────────────────────────────────────────
