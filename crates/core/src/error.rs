//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic business failures (validation,
/// invariants, quantity bounds). Infrastructure concerns belong elsewhere.
/// Every variant carries enough context to produce a stable, descriptive
/// message for the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed or empty input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A referenced entity does not exist (or is soft-deleted).
    #[error("not found: {0}")]
    NotFound(String),

    /// A state-machine edge outside the transition table.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidStatusTransition { from: String, to: String },

    /// An outbound movement would drive stock below zero.
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    /// Receiving more than the outstanding ordered quantity.
    #[error("over-receipt: requested {requested}, outstanding {outstanding}")]
    OverReceipt { requested: i64, outstanding: i64 },

    /// Returning more than the received-minus-returned quantity.
    #[error("over-return: requested {requested}, returnable {returnable}")]
    OverReturn { requested: i64, returnable: i64 },

    /// A conflict occurred (e.g. stale version / optimistic concurrency).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidStatusTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}
