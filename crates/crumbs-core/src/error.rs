//! Entity-method error types.
//!
//! Every in-memory state transition and property mutation on a domain entity
//! reports failure through [`EntityError`]. The storage layer wraps these
//! errors unchanged so callers can match on the precise failure.

/// Alias for `Result<T, EntityError>`.
pub type EntityResult<T> = Result<T, EntityError>;

/// Errors raised by entity methods before anything is persisted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntityError {
    // -- State machines -----------------------------------------------------
    /// The state name is not part of the entity's vocabulary.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The state exists but cannot be reached from the current state.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    // -- Properties ---------------------------------------------------------
    /// A name outside one of the fixed vocabularies (value types, link
    /// types, stash types).
    #[error("unknown {vocabulary}: {value}")]
    UnknownKind {
        vocabulary: &'static str,
        value: String,
    },

    /// The item carries no entry for the requested property.
    #[error("property not found: {0}")]
    PropertyNotFound(String),

    /// A value does not match the property's value kind.
    #[error("type mismatch for property {property}: expected {expected}, found {found}")]
    TypeMismatch {
        property: String,
        expected: &'static str,
        found: &'static str,
    },

    /// The category does not belong to the property, or the property is not
    /// categorical.
    #[error("invalid category {category} for property {property}")]
    InvalidCategory { property: String, category: String },

    // -- Stashes ------------------------------------------------------------
    /// The operation is not supported by this stash type.
    #[error("operation {operation} is not valid for a {stash_type} stash")]
    InvalidStashOperation {
        operation: &'static str,
        stash_type: &'static str,
    },

    /// Incrementing the counter would leave the `i64` range.
    #[error("counter {name} overflows when adding {delta}")]
    CounterOverflow { name: String, delta: i64 },

    /// Lock operations require a holder identifier.
    #[error("lock holder must not be empty")]
    EmptyHolder,

    /// The lock is held by someone else.
    #[error("lock is held by {holder}")]
    LockHeld { holder: String },

    /// Release was attempted by a caller that does not hold the lock.
    #[error("{holder} does not hold the lock")]
    NotLockHolder { holder: String },
}
