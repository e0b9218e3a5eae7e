//! Typed property values.
//!
//! A crumb's property map holds one [`Value`] per defined property. The
//! variant set mirrors the fixed [`ValueType`] vocabulary so defaults and
//! kind checks are exhaustive. In JSON a value is written in its natural
//! shape (string, number, bool, array, `null`); timestamps are RFC 3339
//! strings, so decoding needs the property's kind to be exact
//! ([`Value::from_json`]).
//!
//! List elements carry no kind, so a timestamp inside a list is written as
//! `{"timestamp": "<rfc3339>"}` to keep it apart from text.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Key of the object wrapping a timestamp list element.
const TIMESTAMP_KEY: &str = "timestamp";

use crate::error::{EntityError, EntityResult};

// ── value kinds ──────────────────────────────────────────────────────

/// The kind of value a property holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// One of the property's categories (by category id), or absent.
    Categorical,
    /// Free text.
    Text,
    /// Signed 64-bit integer.
    Integer,
    /// True or false.
    Boolean,
    /// A UTC instant.
    Timestamp,
    /// An ordered list of values.
    List,
}

impl ValueType {
    /// Every value kind, in declaration order.
    pub const ALL: [ValueType; 6] = [
        Self::Categorical,
        Self::Text,
        Self::Integer,
        Self::Boolean,
        Self::Timestamp,
        Self::List,
    ];

    /// Database and log representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Categorical => "categorical",
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Timestamp => "timestamp",
            Self::List => "list",
        }
    }

    /// The value a crumb receives for a property of this kind until someone
    /// sets it.
    pub fn default_value(&self) -> Value {
        match self {
            Self::Categorical => Value::Absent,
            Self::Text => Value::Text(String::new()),
            Self::Integer => Value::Integer(0),
            Self::Boolean => Value::Boolean(false),
            Self::Timestamp => Value::Timestamp(DateTime::<Utc>::UNIX_EPOCH),
            Self::List => Value::List(Vec::new()),
        }
    }

    /// Whether `value` may be stored under a property of this kind.
    ///
    /// [`Value::Absent`] is accepted by every kind.
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Absent)
                | (Self::Categorical, Value::Text(_))
                | (Self::Text, Value::Text(_))
                | (Self::Integer, Value::Integer(_))
                | (Self::Boolean, Value::Boolean(_))
                | (Self::Timestamp, Value::Timestamp(_))
                | (Self::List, Value::List(_))
        )
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueType {
    type Err = EntityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| EntityError::UnknownKind {
                vocabulary: "value type",
                value: s.to_string(),
            })
    }
}

// ── values ───────────────────────────────────────────────────────────

/// A single property value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// No value (categorical default, or explicitly cleared).
    Absent,
    Text(String),
    Integer(i64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    List(Vec<Value>),
}

impl Value {
    /// Short name of the variant, used in mismatch errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Text(_) => "text",
            Self::Integer(_) => "integer",
            Self::Boolean(_) => "boolean",
            Self::Timestamp(_) => "timestamp",
            Self::List(_) => "list",
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Render as plain JSON.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Absent => serde_json::Value::Null,
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::Integer(n) => serde_json::Value::from(*n),
            Self::Boolean(b) => serde_json::Value::Bool(*b),
            Self::Timestamp(ts) => serde_json::Value::String(rfc3339(ts)),
            Self::List(items) => {
                serde_json::Value::Array(items.iter().map(Self::element_json).collect())
            }
        }
    }

    /// JSON for a list element. Timestamps are wrapped so they decode back
    /// as timestamps.
    fn element_json(&self) -> serde_json::Value {
        match self {
            Self::Timestamp(ts) => {
                let mut wrapped = serde_json::Map::new();
                wrapped.insert(TIMESTAMP_KEY.to_string(), serde_json::Value::String(rfc3339(ts)));
                serde_json::Value::Object(wrapped)
            }
            other => other.to_json(),
        }
    }

    /// Reverse of [`Value::element_json`].
    fn from_element(json: &serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = json
            && map.len() == 1
            && let Some(serde_json::Value::String(s)) = map.get(TIMESTAMP_KEY)
            && let Ok(ts) = DateTime::parse_from_rfc3339(s)
        {
            return Self::Timestamp(ts.with_timezone(&Utc));
        }
        Self::from_untyped(json)
    }

    /// Decode JSON written for a property of kind `kind`.
    ///
    /// Integral floats (`3.0`) decode as integers; anything else that does
    /// not fit the kind is a [`EntityError::TypeMismatch`] attributed to
    /// `property`.
    pub fn from_json(
        property: &str,
        kind: ValueType,
        json: &serde_json::Value,
    ) -> EntityResult<Self> {
        use serde_json::Value as Json;

        let mismatch = || EntityError::TypeMismatch {
            property: property.to_string(),
            expected: kind.as_str(),
            found: json_kind(json),
        };

        match (kind, json) {
            (_, Json::Null) => Ok(Self::Absent),
            (ValueType::Categorical | ValueType::Text, Json::String(s)) => {
                Ok(Self::Text(s.clone()))
            }
            (ValueType::Integer, Json::Number(n)) => {
                number_as_i64(n).map(Self::Integer).ok_or_else(mismatch)
            }
            (ValueType::Boolean, Json::Bool(b)) => Ok(Self::Boolean(*b)),
            (ValueType::Timestamp, Json::String(s)) => DateTime::parse_from_rfc3339(s)
                .map(|ts| Self::Timestamp(ts.with_timezone(&Utc)))
                .map_err(|_| mismatch()),
            (ValueType::List, Json::Array(items)) => {
                Ok(Self::List(items.iter().map(Self::from_element).collect()))
            }
            _ => Err(mismatch()),
        }
    }

    /// Decode JSON with no kind information, picking the natural variant.
    ///
    /// Strings always decode as text; objects, which have no counterpart,
    /// decode as their JSON text.
    pub fn from_untyped(json: &serde_json::Value) -> Self {
        use serde_json::Value as Json;

        match json {
            Json::Null => Self::Absent,
            Json::Bool(b) => Self::Boolean(*b),
            Json::Number(n) => match number_as_i64(n) {
                Some(i) => Self::Integer(i),
                None => Self::Text(n.to_string()),
            },
            Json::String(s) => Self::Text(s.clone()),
            Json::Array(items) => Self::List(items.iter().map(Self::from_element).collect()),
            Json::Object(_) => Self::Text(json.to_string()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Self::Timestamp(ts)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Ok(Self::from_untyped(&json))
    }
}

fn rfc3339(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Read a JSON number as an integer, accepting integral floats.
pub fn number_as_i64(n: &serde_json::Number) -> Option<i64> {
    if let Some(i) = n.as_i64() {
        return Some(i);
    }
    let f = n.as_f64()?;
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

fn json_kind(json: &serde_json::Value) -> &'static str {
    match json {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

// ── tests ────────────────────────────────────────────────────────────
