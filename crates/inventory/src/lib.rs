//! `tallyerp-inventory` — the per-product stock ledger.
//!
//! A [`movement::StockMovement`] is one immutable inventory change carrying
//! before/after snapshots; the product's `current_stock` is the projection
//! derivable from replaying the ledger.

pub mod movement;

pub use movement::{replay, MovementKind, StockMovement};
