//! Stock-ledger posting against the transactional store.

use chrono::{DateTime, Utc};

use tallyerp_core::{DomainError, DomainResult, UserId};
use tallyerp_inventory::{MovementKind, StockMovement};
use tallyerp_products::ProductId;

use crate::store::Transaction;

/// One requested inventory change.
#[derive(Debug, Clone)]
pub struct MovementRequest {
    pub product_id: ProductId,
    /// Signed quantity: positive = inbound, negative = outbound.
    pub quantity: i64,
    pub kind: MovementKind,
    /// Order/return number the movement belongs to.
    pub reference: String,
    pub reason: String,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Post one movement: append the ledger row and move the product's
/// `current_stock` to the row's `stock_after`, both staged in the same
/// transaction so they commit or vanish together.
///
/// This is the only path that changes `current_stock`. Fails with
/// `NotFound` for a missing or deleted product and `InsufficientStock`
/// when an outbound quantity would drive stock below zero; a failed call
/// stages nothing.
pub fn apply_movement(
    tx: &mut Transaction<'_>,
    request: MovementRequest,
) -> DomainResult<StockMovement> {
    let mut product = tx
        .product(request.product_id)
        .ok_or_else(|| DomainError::not_found(format!("product {}", request.product_id)))?;

    let movement = StockMovement::post(
        &mut product,
        request.quantity,
        request.kind,
        request.reference,
        request.reason,
        request.actor,
        request.occurred_at,
    )?;

    if movement.quantity() < 0 && product.is_below_minimum() {
        tracing::warn!(
            product = %product.id_typed(),
            sku = product.sku(),
            stock = product.current_stock(),
            minimum = ?product.minimum_stock(),
            reference = movement.reference(),
            "stock at or below minimum"
        );
    }

    tx.put_product(product);
    tx.append_movement(movement.clone());
    Ok(movement)
}
