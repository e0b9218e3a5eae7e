//! Shared mutable values ("stashes").
//!
//! A stash's type is fixed at creation and decides which operations it
//! accepts:
//!
//! | type                              | operations               |
//! |-----------------------------------|--------------------------|
//! | `resource`, `artifact`, `context` | [`Stash::set_value`]     |
//! | `counter`                         | [`Stash::increment`]     |
//! | `lock`                            | [`Stash::acquire`], [`Stash::release`] |
//!
//! Every successful operation bumps `version`, records the operation name
//! and mutator, and queues a [`StashHistoryEntry`] in
//! [`Stash::unrecorded`]. Storing the stash appends each queued entry to
//! its history.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{EntityError, EntityResult};
use crate::value::number_as_i64;

/// Operation name recorded when a stash is first stored.
pub const OP_CREATE: &str = "create";
pub const OP_SET: &str = "set";
pub const OP_INCREMENT: &str = "increment";
pub const OP_ACQUIRE: &str = "acquire";
pub const OP_RELEASE: &str = "release";

/// What kind of shared state a stash holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StashType {
    Resource,
    Artifact,
    Context,
    Counter,
    Lock,
}

impl StashType {
    pub const ALL: [StashType; 5] = [
        Self::Resource,
        Self::Artifact,
        Self::Context,
        Self::Counter,
        Self::Lock,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resource => "resource",
            Self::Artifact => "artifact",
            Self::Context => "context",
            Self::Counter => "counter",
            Self::Lock => "lock",
        }
    }

    fn accepts_set(&self) -> bool {
        matches!(self, Self::Resource | Self::Artifact | Self::Context)
    }
}

impl fmt::Display for StashType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StashType {
    type Err = EntityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| EntityError::UnknownKind {
                vocabulary: "stash type",
                value: s.to_string(),
            })
    }
}

/// A named piece of shared mutable state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stash {
    #[serde(default)]
    pub id: String,
    /// Unique name.
    pub name: String,
    pub stash_type: StashType,
    /// Opaque payload. Counters hold a number; locks hold `null` or
    /// `{"holder": .., "acquired_at": ..}`.
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub last_operation: String,
    #[serde(default)]
    pub changed_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// One entry per mutation made since this copy was loaded, oldest
    /// first. Storing the stash appends them to its history.
    #[serde(skip)]
    pub unrecorded: Vec<StashHistoryEntry>,
}

impl Stash {
    pub fn new(name: impl Into<String>, stash_type: StashType) -> Self {
        let now = Utc::now();
        let value = match stash_type {
            StashType::Counter => json!(0),
            _ => serde_json::Value::Null,
        };
        Self {
            id: String::new(),
            name: name.into(),
            stash_type,
            value,
            version: 0,
            last_operation: String::new(),
            changed_by: None,
            created_at: now,
            updated_at: now,
            unrecorded: Vec::new(),
        }
    }

    pub fn with_value(mut self, value: serde_json::Value) -> Self {
        self.value = value;
        self
    }

    /// Replace the value of a resource, artifact or context stash.
    pub fn set_value(
        &mut self,
        value: serde_json::Value,
        changed_by: Option<&str>,
    ) -> EntityResult<()> {
        if !self.stash_type.accepts_set() {
            return Err(self.unsupported(OP_SET));
        }
        self.value = value;
        self.record(OP_SET, changed_by);
        Ok(())
    }

    /// Add `delta` to a counter and return the new count.
    pub fn increment(&mut self, delta: i64, changed_by: Option<&str>) -> EntityResult<i64> {
        if self.stash_type != StashType::Counter {
            return Err(self.unsupported(OP_INCREMENT));
        }
        let next = self
            .counter_value()?
            .checked_add(delta)
            .ok_or_else(|| EntityError::CounterOverflow {
                name: self.name.clone(),
                delta,
            })?;
        self.value = json!(next);
        self.record(OP_INCREMENT, changed_by);
        Ok(next)
    }

    /// Current count of a counter stash. `null` counts as zero and integral
    /// floats are accepted, since the value may have passed through a
    /// generic JSON decode.
    pub fn counter_value(&self) -> EntityResult<i64> {
        match &self.value {
            serde_json::Value::Null => Ok(0),
            serde_json::Value::Number(n) => number_as_i64(n).ok_or_else(|| self.not_a_count()),
            _ => Err(self.not_a_count()),
        }
    }

    /// Take the lock for `holder`. Re-acquiring by the current holder
    /// succeeds and keeps the original acquisition time.
    pub fn acquire(&mut self, holder: &str) -> EntityResult<()> {
        if self.stash_type != StashType::Lock {
            return Err(self.unsupported(OP_ACQUIRE));
        }
        if holder.is_empty() {
            return Err(EntityError::EmptyHolder);
        }
        match self.lock_holder() {
            Some(current) if current == holder => {}
            Some(current) => {
                return Err(EntityError::LockHeld {
                    holder: current.to_string(),
                });
            }
            None => {
                self.value = json!({
                    "holder": holder,
                    "acquired_at": Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
                });
            }
        }
        self.record(OP_ACQUIRE, Some(holder));
        Ok(())
    }

    /// Give the lock back. Only the current holder may release it.
    pub fn release(&mut self, holder: &str) -> EntityResult<()> {
        if self.stash_type != StashType::Lock {
            return Err(self.unsupported(OP_RELEASE));
        }
        if self.lock_holder() != Some(holder) {
            return Err(EntityError::NotLockHolder {
                holder: holder.to_string(),
            });
        }
        self.value = serde_json::Value::Null;
        self.record(OP_RELEASE, Some(holder));
        Ok(())
    }

    /// Who holds the lock, if anyone.
    pub fn lock_holder(&self) -> Option<&str> {
        self.value
            .get("holder")
            .and_then(serde_json::Value::as_str)
            .filter(|h| !h.is_empty())
    }

    /// History record describing the stash's current version.
    pub fn history_entry(&self) -> StashHistoryEntry {
        StashHistoryEntry {
            id: String::new(),
            stash_id: self.id.clone(),
            version: self.version,
            value: self.value.clone(),
            operation: self.last_operation.clone(),
            changed_by: self.changed_by.clone(),
            created_at: self.updated_at,
        }
    }

    fn record(&mut self, operation: &str, changed_by: Option<&str>) {
        self.version += 1;
        self.last_operation = operation.to_string();
        self.changed_by = changed_by.map(str::to_string);
        self.updated_at = Utc::now();
        self.unrecorded.push(self.history_entry());
    }

    /// Drain the mutations not yet written to the history.
    pub fn take_unrecorded(&mut self) -> Vec<StashHistoryEntry> {
        std::mem::take(&mut self.unrecorded)
    }

    fn unsupported(&self, operation: &'static str) -> EntityError {
        EntityError::InvalidStashOperation {
            operation,
            stash_type: self.stash_type.as_str(),
        }
    }

    fn not_a_count(&self) -> EntityError {
        EntityError::TypeMismatch {
            property: self.name.clone(),
            expected: "integer",
            found: "non-integer",
        }
    }
}

/// One immutable mutation record of a stash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StashHistoryEntry {
    #[serde(default)]
    pub id: String,
    pub stash_id: String,
    pub version: i64,
    #[serde(default)]
    pub value: serde_json::Value,
    pub operation: String,
    #[serde(default)]
    pub changed_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ── tests ────────────────────────────────────────────────────────────
