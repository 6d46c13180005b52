use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tallyerp_core::{DomainError, DomainResult, Entity, MovementId, SoftDeletable, UserId};
use tallyerp_products::{Product, ProductId};

/// Why a movement happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    /// Goods received against a purchase order.
    StockIn,
    /// Goods shipped against a sales order.
    StockOut,
    /// Manual correction outside any order workflow.
    Adjustment,
    /// Goods restocked from a returned sales order.
    CustomerReturn,
    /// Goods sent back to a supplier from a processed purchase-order return.
    SupplierReturn,
}

impl MovementKind {
    /// Stable label used in logs and exports.
    pub fn label(self) -> &'static str {
        match self {
            MovementKind::StockIn => "stock_in",
            MovementKind::StockOut => "stock_out",
            MovementKind::Adjustment => "adjustment",
            MovementKind::CustomerReturn => "customer_return",
            MovementKind::SupplierReturn => "supplier_return",
        }
    }
}

impl core::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

/// One stock-ledger entry. Immutable once posted.
///
/// `stock_after = stock_before + quantity` always holds; replaying all
/// movements of a product in timestamp order from zero reproduces its
/// `current_stock` exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    id: MovementId,
    product_id: ProductId,
    /// Signed quantity: positive = inbound, negative = outbound.
    quantity: i64,
    stock_before: i64,
    stock_after: i64,
    kind: MovementKind,
    /// Order/return number this movement belongs to.
    reference: String,
    reason: String,
    actor: UserId,
    occurred_at: DateTime<Utc>,
}

impl StockMovement {
    /// Post a movement against the live product row.
    ///
    /// This is the only legal way any workflow changes `current_stock`: the
    /// returned ledger entry and the projection update on `product` come out
    /// of one call, and the caller's transaction commits or discards them
    /// together. Fails without touching the product when the product is
    /// soft-deleted, the quantity is zero, or an outbound quantity would
    /// drive stock below zero.
    #[allow(clippy::too_many_arguments)]
    pub fn post(
        product: &mut Product,
        quantity: i64,
        kind: MovementKind,
        reference: impl Into<String>,
        reason: impl Into<String>,
        actor: UserId,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if product.is_deleted() {
            return Err(DomainError::not_found(format!(
                "product {}",
                product.id_typed()
            )));
        }
        if quantity == 0 {
            return Err(DomainError::validation("movement quantity cannot be zero"));
        }

        let stock_before = product.current_stock();
        let stock_after = stock_before.checked_add(quantity).ok_or_else(|| {
            DomainError::validation("movement quantity overflows stock level")
        })?;

        if stock_after < 0 {
            return Err(DomainError::InsufficientStock {
                requested: -quantity,
                available: stock_before,
            });
        }

        product.commit_stock_level(stock_after, occurred_at)?;

        Ok(Self {
            id: MovementId::new(),
            product_id: product.id_typed(),
            quantity,
            stock_before,
            stock_after,
            kind,
            reference: reference.into(),
            reason: reason.into(),
            actor,
            occurred_at,
        })
    }

    pub fn id_typed(&self) -> MovementId {
        self.id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn stock_before(&self) -> i64 {
        self.stock_before
    }

    pub fn stock_after(&self) -> i64 {
        self.stock_after
    }

    pub fn kind(&self) -> MovementKind {
        self.kind
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn actor(&self) -> UserId {
        self.actor
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn is_inbound(&self) -> bool {
        self.quantity > 0
    }
}

impl Entity for StockMovement {
    type Id = MovementId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Replay a product's ledger from zero.
///
/// Movements are folded in timestamp order (movement id breaks ties, which
/// is stable because ids are time-ordered). The result must equal the
/// product's `current_stock`; a mismatch means a movement bypassed the
/// posting path.
pub fn replay<'a>(movements: impl IntoIterator<Item = &'a StockMovement>) -> i64 {
    let mut sorted: Vec<&StockMovement> = movements.into_iter().collect();
    sorted.sort_by_key(|m| (m.occurred_at, m.id));
    sorted.iter().map(|m| m.quantity).sum()
}
