//! Exploration sessions ("trails").
//!
//! ```text
//! draft ──► pending ──► active ──► completed
//!   └──────────────────►   └─────► abandoned
//! ```
//!
//! `completed` and `abandoned` are terminal; `completed_at` is set exactly
//! when a trail reaches one of them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EntityError, EntityResult};

/// Lifecycle state of a trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrailState {
    #[default]
    Draft,
    Pending,
    Active,
    Completed,
    Abandoned,
}

impl TrailState {
    pub const ALL: [TrailState; 5] = [
        Self::Draft,
        Self::Pending,
        Self::Active,
        Self::Completed,
        Self::Abandoned,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Abandoned)
    }

    /// Whether the state machine allows moving from `self` to `to`.
    pub fn can_transition_to(&self, to: TrailState) -> bool {
        matches!(
            (self, to),
            (Self::Draft, Self::Pending | Self::Active)
                | (Self::Pending, Self::Active)
                | (Self::Active, Self::Completed | Self::Abandoned)
        )
    }
}

impl fmt::Display for TrailState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrailState {
    type Err = EntityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| EntityError::InvalidState(s.to_string()))
    }
}

/// An exploration session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trail {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub state: TrailState,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Trail {
    pub fn new() -> Self {
        Self {
            id: String::new(),
            state: TrailState::Draft,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Follow one edge of the state machine.
    pub fn transition(&mut self, to: &str) -> EntityResult<()> {
        let to: TrailState = to.parse()?;
        if !self.state.can_transition_to(to) {
            return Err(EntityError::InvalidTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        self.state = to;
        if to.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Finish an active trail successfully.
    pub fn complete(&mut self) -> EntityResult<()> {
        self.finish(TrailState::Completed)
    }

    /// Give up on an active trail.
    pub fn abandon(&mut self) -> EntityResult<()> {
        self.finish(TrailState::Abandoned)
    }

    fn finish(&mut self, to: TrailState) -> EntityResult<()> {
        if self.state != TrailState::Active {
            return Err(EntityError::InvalidTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        self.transition(to.as_str())
    }
}

impl Default for Trail {
    fn default() -> Self {
        Self::new()
    }
}
