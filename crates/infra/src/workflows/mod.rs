//! Workflow services: one public operation per state-machine transition.
//!
//! Each operation runs `load → validate → decide → persist` inside a single
//! store transaction and returns either the updated aggregate or a
//! [`WorkflowError`]. Nothing else crosses the boundary: domain failures map
//! variant-for-variant, store conflicts surface only after the retry budget
//! is spent, and store faults flatten to `Unexpected` after being logged.

pub mod catalog;
pub mod receiving;
pub mod returns;
pub mod sales;

use thiserror::Error;

use tallyerp_core::DomainError;

use crate::store::StoreError;

pub use catalog::CatalogService;
pub use receiving::ReceivingService;
pub use returns::ReturnsService;
pub use sales::{OrderLineRequest, SalesService};

pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// The one failure shape callers see.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidStatusTransition { from: String, to: String },

    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    #[error("over-receipt: requested {requested}, outstanding {outstanding}")]
    OverReceipt { requested: i64, outstanding: i64 },

    #[error("over-return: requested {requested}, returnable {returnable}")]
    OverReturn { requested: i64, returnable: i64 },

    /// Optimistic retries exhausted; the caller may try again.
    #[error("conflict: {0}")]
    Conflict(String),

    /// An internal fault, logged with context and flattened so callers get
    /// one failure contract regardless of cause.
    #[error("unexpected failure: {0}")]
    Unexpected(String),
}

impl From<DomainError> for WorkflowError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::NotFound(what) => WorkflowError::NotFound(what),
            DomainError::Validation(msg) => WorkflowError::Validation(msg),
            DomainError::InvalidStatusTransition { from, to } => {
                WorkflowError::InvalidStatusTransition { from, to }
            }
            DomainError::InsufficientStock {
                requested,
                available,
            } => WorkflowError::InsufficientStock {
                requested,
                available,
            },
            DomainError::OverReceipt {
                requested,
                outstanding,
            } => WorkflowError::OverReceipt {
                requested,
                outstanding,
            },
            DomainError::OverReturn {
                requested,
                returnable,
            } => WorkflowError::OverReturn {
                requested,
                returnable,
            },
            DomainError::Conflict(msg) => WorkflowError::Conflict(msg),
        }
    }
}

impl From<StoreError> for WorkflowError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict(msg) => WorkflowError::Conflict(msg),
            StoreError::Fault(msg) => {
                tracing::error!(error = %msg, "store fault crossed the workflow boundary");
                WorkflowError::Unexpected(msg)
            }
        }
    }
}
