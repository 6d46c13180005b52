//! `tallyerp-infra` — the transactional store, ledger posting, and the
//! workflow services that drive the order state machines.

pub mod config;
pub mod ledger;
pub mod store;
pub mod workflows;

#[cfg(test)]
mod integration_tests;

pub use config::InfraConfig;
pub use ledger::{apply_movement, MovementRequest};
pub use store::{MemoryStore, StoreError, Transaction};
pub use workflows::{
    CatalogService, OrderLineRequest, ReceivingService, ReturnsService, SalesService,
    WorkflowError, WorkflowResult,
};
