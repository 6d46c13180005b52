//! `tallyerp-products` — product master data and the stock projection field.

pub mod product;

pub use product::{Product, ProductId};
