use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tallyerp_core::{DomainError, DomainResult, Entity, EntityId, SoftDeletable};
use tallyerp_parties::PartyId;
use tallyerp_products::ProductId;

/// Sales order identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SalesOrderId(pub EntityId);

impl SalesOrderId {
    pub fn new(id: EntityId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for SalesOrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Sales order line identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SalesOrderItemId(pub EntityId);

impl SalesOrderItemId {
    pub fn new(id: EntityId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for SalesOrderItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Sales order fulfillment lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SalesOrderStatus {
    New,
    Processing,
    OnHold,
    Shipped,
    Completed,
    Cancelled,
    Returned,
}

impl SalesOrderStatus {
    /// Every status, for exhaustive transition checks.
    pub const ALL: [SalesOrderStatus; 7] = [
        SalesOrderStatus::New,
        SalesOrderStatus::Processing,
        SalesOrderStatus::OnHold,
        SalesOrderStatus::Shipped,
        SalesOrderStatus::Completed,
        SalesOrderStatus::Cancelled,
        SalesOrderStatus::Returned,
    ];

    /// The fulfillment transition table. Everything not listed here is an
    /// invalid edge.
    pub fn can_transition_to(self, next: SalesOrderStatus) -> bool {
        use SalesOrderStatus::*;
        matches!(
            (self, next),
            (New, Processing)
                | (New, OnHold)
                | (New, Cancelled)
                | (Processing, Shipped)
                | (Processing, OnHold)
                | (Processing, Cancelled)
                | (OnHold, Processing)
                | (OnHold, Cancelled)
                | (Shipped, Completed)
                | (Shipped, Returned)
                | (Completed, Returned)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SalesOrderStatus::Cancelled | SalesOrderStatus::Returned)
    }

    pub fn label(self) -> &'static str {
        match self {
            SalesOrderStatus::New => "new",
            SalesOrderStatus::Processing => "processing",
            SalesOrderStatus::OnHold => "on_hold",
            SalesOrderStatus::Shipped => "shipped",
            SalesOrderStatus::Completed => "completed",
            SalesOrderStatus::Cancelled => "cancelled",
            SalesOrderStatus::Returned => "returned",
        }
    }
}

impl core::fmt::Display for SalesOrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

/// Side effect the workflow layer must perform for an accepted transition.
///
/// The aggregate decides *that* a transition is legal and stamps its own
/// state; the workflow matches on this exhaustively and drives the ledger
/// and the invoice collaborator. Adding a variant forces every call site to
/// handle it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FulfillmentAction {
    /// First entry into `Processing`: validate stock for every line, then
    /// trigger invoice creation (best effort, after commit).
    BeginProcessing,
    /// Re-entry into `Processing` from `OnHold`: re-validate stock only.
    ResumeProcessing,
    /// Park the order. No ledger effect.
    Hold,
    /// Post one outbound `StockOut` movement per line, all-or-nothing.
    Ship,
    /// Stamp delivery. No ledger effect.
    Complete,
    /// Pre-shipment cancellation releases the validation-only reservation;
    /// no ledger rows were ever written for this order.
    CancelBeforeShipment,
    /// Post one inbound `CustomerReturn` movement per line; per-line
    /// failures are logged and skipped (partial-success tolerant).
    RestockReturn,
}

/// One ordered line. The unit price is captured from the product at order
/// time and never re-read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesOrderItem {
    id: SalesOrderItemId,
    product_id: ProductId,
    quantity: i64,
    /// Price snapshot in smallest currency unit (e.g., cents).
    unit_price: u64,
}

impl SalesOrderItem {
    pub fn id_typed(&self) -> SalesOrderItemId {
        self.id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn unit_price(&self) -> u64 {
        self.unit_price
    }

    pub fn line_total(&self) -> u64 {
        (self.quantity as u64).saturating_mul(self.unit_price)
    }
}

/// Input line for order creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderLine {
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: u64,
}

/// Aggregate root: SalesOrder (header + items, owned as a unit).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesOrder {
    id: SalesOrderId,
    customer_id: PartyId,
    status: SalesOrderStatus,
    items: Vec<SalesOrderItem>,
    /// Unique generated reference, e.g. "SO-000042".
    reference: String,
    /// Set once the first entry into `Processing` has triggered invoice
    /// creation; resume from hold must not invoice twice.
    invoice_requested: bool,
    shipped_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    deleted: bool,
    created_at: DateTime<Utc>,
}

impl SalesOrder {
    pub fn create(
        id: SalesOrderId,
        customer_id: PartyId,
        lines: Vec<NewOrderLine>,
        reference: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if lines.is_empty() {
            return Err(DomainError::validation(
                "sales order must have at least one line",
            ));
        }

        let mut items = Vec::with_capacity(lines.len());
        for line in lines {
            if line.quantity <= 0 {
                return Err(DomainError::validation("quantity must be positive"));
            }
            if line.unit_price == 0 {
                return Err(DomainError::validation("unit_price must be positive"));
            }
            items.push(SalesOrderItem {
                id: SalesOrderItemId::new(EntityId::new()),
                product_id: line.product_id,
                quantity: line.quantity,
                unit_price: line.unit_price,
            });
        }

        Ok(Self {
            id,
            customer_id,
            status: SalesOrderStatus::New,
            items,
            reference: reference.into(),
            invoice_requested: false,
            shipped_at: None,
            delivered_at: None,
            deleted: false,
            created_at,
        })
    }

    pub fn id_typed(&self) -> SalesOrderId {
        self.id
    }

    pub fn customer_id(&self) -> PartyId {
        self.customer_id
    }

    pub fn status(&self) -> SalesOrderStatus {
        self.status
    }

    pub fn items(&self) -> &[SalesOrderItem] {
        &self.items
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn invoice_requested(&self) -> bool {
        self.invoice_requested
    }

    pub fn shipped_at(&self) -> Option<DateTime<Utc>> {
        self.shipped_at
    }

    pub fn delivered_at(&self) -> Option<DateTime<Utc>> {
        self.delivered_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn order_total(&self) -> u64 {
        self.items.iter().map(SalesOrderItem::line_total).sum()
    }

    /// Move the order to `target`, or fail with `InvalidStatusTransition`
    /// and zero state change.
    ///
    /// On success the order's own state (status, timestamps, invoice flag)
    /// is already updated and the returned action tells the caller which
    /// external effects the transition requires.
    pub fn transition(
        &mut self,
        target: SalesOrderStatus,
        now: DateTime<Utc>,
    ) -> DomainResult<FulfillmentAction> {
        if !self.status.can_transition_to(target) {
            return Err(DomainError::invalid_transition(self.status, target));
        }

        let action = match target {
            SalesOrderStatus::Processing => {
                if self.invoice_requested {
                    FulfillmentAction::ResumeProcessing
                } else {
                    self.invoice_requested = true;
                    FulfillmentAction::BeginProcessing
                }
            }
            SalesOrderStatus::OnHold => FulfillmentAction::Hold,
            SalesOrderStatus::Shipped => {
                self.shipped_at = Some(now);
                FulfillmentAction::Ship
            }
            SalesOrderStatus::Completed => {
                self.delivered_at = Some(now);
                FulfillmentAction::Complete
            }
            SalesOrderStatus::Cancelled => FulfillmentAction::CancelBeforeShipment,
            SalesOrderStatus::Returned => FulfillmentAction::RestockReturn,
            // Unreachable: nothing transitions back into `New`.
            SalesOrderStatus::New => {
                return Err(DomainError::invalid_transition(self.status, target));
            }
        };

        self.status = target;
        Ok(action)
    }
}

impl Entity for SalesOrder {
    type Id = SalesOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl SoftDeletable for SalesOrder {
    fn is_deleted(&self) -> bool {
        self.deleted
    }

    fn mark_deleted(&mut self) {
        self.deleted = true;
    }

    fn restore(&mut self) {
        self.deleted = false;
    }
}
