use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tallyerp_core::{DomainError, DomainResult, Entity, EntityId, SoftDeletable, UserId};
use tallyerp_parties::PartyId;
use tallyerp_products::ProductId;

/// Purchase order identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurchaseOrderId(pub EntityId);

impl PurchaseOrderId {
    pub fn new(id: EntityId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PurchaseOrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Purchase order line identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurchaseOrderItemId(pub EntityId);

impl PurchaseOrderItemId {
    pub fn new(id: EntityId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PurchaseOrderItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Purchase order receiving lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseOrderStatus {
    Draft,
    Pending,
    Approved,
    Sent,
    PartiallyReceived,
    Received,
    Cancelled,
}

impl PurchaseOrderStatus {
    /// Every status, for exhaustive transition checks.
    pub const ALL: [PurchaseOrderStatus; 7] = [
        PurchaseOrderStatus::Draft,
        PurchaseOrderStatus::Pending,
        PurchaseOrderStatus::Approved,
        PurchaseOrderStatus::Sent,
        PurchaseOrderStatus::PartiallyReceived,
        PurchaseOrderStatus::Received,
        PurchaseOrderStatus::Cancelled,
    ];

    /// The receiving transition table. `Cancelled` is reachable from every
    /// state except `Received` (and itself); `Received` is terminal.
    pub fn can_transition_to(self, next: PurchaseOrderStatus) -> bool {
        use PurchaseOrderStatus::*;
        matches!(
            (self, next),
            (Draft, Pending)
                | (Pending, Approved)
                | (Approved, Sent)
                | (Sent, PartiallyReceived)
                | (Sent, Received)
                | (PartiallyReceived, Received)
                | (Draft, Cancelled)
                | (Pending, Cancelled)
                | (Approved, Cancelled)
                | (Sent, Cancelled)
                | (PartiallyReceived, Cancelled)
        )
    }

    /// Whether goods may be booked in while the order is in this state.
    pub fn is_receivable(self) -> bool {
        matches!(
            self,
            PurchaseOrderStatus::Sent | PurchaseOrderStatus::PartiallyReceived
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PurchaseOrderStatus::Received | PurchaseOrderStatus::Cancelled
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            PurchaseOrderStatus::Draft => "draft",
            PurchaseOrderStatus::Pending => "pending",
            PurchaseOrderStatus::Approved => "approved",
            PurchaseOrderStatus::Sent => "sent",
            PurchaseOrderStatus::PartiallyReceived => "partially_received",
            PurchaseOrderStatus::Received => "received",
            PurchaseOrderStatus::Cancelled => "cancelled",
        }
    }
}

impl core::fmt::Display for PurchaseOrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

/// One ordered line. `received_quantity` never exceeds `ordered_quantity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderItem {
    id: PurchaseOrderItemId,
    product_id: ProductId,
    ordered_quantity: i64,
    received_quantity: i64,
    /// Price in smallest currency unit (e.g., cents).
    unit_price: u64,
}

impl PurchaseOrderItem {
    pub fn id_typed(&self) -> PurchaseOrderItemId {
        self.id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn ordered_quantity(&self) -> i64 {
        self.ordered_quantity
    }

    pub fn received_quantity(&self) -> i64 {
        self.received_quantity
    }

    pub fn unit_price(&self) -> u64 {
        self.unit_price
    }

    pub fn outstanding_quantity(&self) -> i64 {
        self.ordered_quantity - self.received_quantity
    }

    pub fn is_fully_received(&self) -> bool {
        self.received_quantity >= self.ordered_quantity
    }
}

/// Input line for purchase order creation / draft editing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPurchaseLine {
    pub product_id: ProductId,
    pub ordered_quantity: i64,
    pub unit_price: u64,
}

/// Ledger instruction produced by a receipt: book `quantity` of
/// `product_id` in. The workflow posts one `StockIn` movement per posting
/// inside the same transaction that persists the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptPosting {
    pub product_id: ProductId,
    pub quantity: i64,
}

/// Aggregate root: PurchaseOrder (header + items, owned as a unit).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    id: PurchaseOrderId,
    supplier_id: PartyId,
    status: PurchaseOrderStatus,
    items: Vec<PurchaseOrderItem>,
    /// Unique generated number, e.g. "PO-000042".
    number: String,
    approved_by: Option<UserId>,
    approved_at: Option<DateTime<Utc>>,
    actual_delivery_at: Option<DateTime<Utc>>,
    cancelled_reason: Option<String>,
    cancelled_at: Option<DateTime<Utc>>,
    deleted: bool,
    created_at: DateTime<Utc>,
}

impl PurchaseOrder {
    pub fn create(
        id: PurchaseOrderId,
        supplier_id: PartyId,
        lines: Vec<NewPurchaseLine>,
        number: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let mut order = Self {
            id,
            supplier_id,
            status: PurchaseOrderStatus::Draft,
            items: Vec::new(),
            number: number.into(),
            approved_by: None,
            approved_at: None,
            actual_delivery_at: None,
            cancelled_reason: None,
            cancelled_at: None,
            deleted: false,
            created_at,
        };

        for line in lines {
            order.add_line(line)?;
        }

        Ok(order)
    }

    pub fn id_typed(&self) -> PurchaseOrderId {
        self.id
    }

    pub fn supplier_id(&self) -> PartyId {
        self.supplier_id
    }

    pub fn status(&self) -> PurchaseOrderStatus {
        self.status
    }

    pub fn items(&self) -> &[PurchaseOrderItem] {
        &self.items
    }

    pub fn item(&self, item_id: PurchaseOrderItemId) -> Option<&PurchaseOrderItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn approved_by(&self) -> Option<UserId> {
        self.approved_by
    }

    pub fn approved_at(&self) -> Option<DateTime<Utc>> {
        self.approved_at
    }

    pub fn actual_delivery_at(&self) -> Option<DateTime<Utc>> {
        self.actual_delivery_at
    }

    pub fn cancelled_reason(&self) -> Option<&str> {
        self.cancelled_reason.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Add a line while the order is still a draft.
    pub fn add_line(&mut self, line: NewPurchaseLine) -> DomainResult<()> {
        if self.status != PurchaseOrderStatus::Draft {
            return Err(DomainError::validation(
                "lines can only be added to draft purchase orders",
            ));
        }
        if line.ordered_quantity <= 0 {
            return Err(DomainError::validation("ordered_quantity must be positive"));
        }
        if line.unit_price == 0 {
            return Err(DomainError::validation("unit_price must be positive"));
        }

        self.items.push(PurchaseOrderItem {
            id: PurchaseOrderItemId::new(EntityId::new()),
            product_id: line.product_id,
            ordered_quantity: line.ordered_quantity,
            received_quantity: 0,
            unit_price: line.unit_price,
        });
        Ok(())
    }

    /// `Draft → Pending`. Requires at least one line.
    pub fn submit(&mut self) -> DomainResult<()> {
        self.ensure_edge(PurchaseOrderStatus::Pending)?;
        if self.items.is_empty() {
            return Err(DomainError::validation(
                "cannot submit purchase order without lines",
            ));
        }
        self.status = PurchaseOrderStatus::Pending;
        Ok(())
    }

    /// `Pending → Approved`. Records approver and timestamp.
    pub fn approve(&mut self, approver: UserId, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_edge(PurchaseOrderStatus::Approved)?;
        self.approved_by = Some(approver);
        self.approved_at = Some(now);
        self.status = PurchaseOrderStatus::Approved;
        Ok(())
    }

    /// `Approved → Sent`.
    pub fn send(&mut self) -> DomainResult<()> {
        if self.status != PurchaseOrderStatus::Approved {
            return Err(DomainError::invalid_transition(
                self.status,
                PurchaseOrderStatus::Sent,
            ));
        }
        self.status = PurchaseOrderStatus::Sent;
        Ok(())
    }

    /// Book a partial or full receipt against one line.
    ///
    /// Caps the quantity at the line's outstanding amount (`OverReceipt`),
    /// recomputes the parent status and stamps the actual delivery date once
    /// every line is fully received. Returns the ledger instruction for the
    /// received quantity.
    pub fn receive_item(
        &mut self,
        item_id: PurchaseOrderItemId,
        quantity: i64,
        now: DateTime<Utc>,
    ) -> DomainResult<ReceiptPosting> {
        if !self.status.is_receivable() {
            return Err(DomainError::invalid_transition(
                self.status,
                PurchaseOrderStatus::PartiallyReceived,
            ));
        }
        if quantity <= 0 {
            return Err(DomainError::validation("receipt quantity must be positive"));
        }

        let item = self
            .items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or_else(|| DomainError::not_found(format!("purchase order item {item_id}")))?;

        let outstanding = item.outstanding_quantity();
        if quantity > outstanding {
            return Err(DomainError::OverReceipt {
                requested: quantity,
                outstanding,
            });
        }

        item.received_quantity += quantity;
        let posting = ReceiptPosting {
            product_id: item.product_id,
            quantity,
        };

        self.recompute_receipt_status(now);
        Ok(posting)
    }

    /// Receive every line's outstanding quantity at once.
    ///
    /// Returns one ledger instruction per line that still had an
    /// outstanding quantity.
    pub fn receive_outstanding(&mut self, now: DateTime<Utc>) -> DomainResult<Vec<ReceiptPosting>> {
        if !self.status.is_receivable() {
            return Err(DomainError::invalid_transition(
                self.status,
                PurchaseOrderStatus::Received,
            ));
        }

        let mut postings = Vec::new();
        for item in &mut self.items {
            let outstanding = item.outstanding_quantity();
            if outstanding > 0 {
                item.received_quantity = item.ordered_quantity;
                postings.push(ReceiptPosting {
                    product_id: item.product_id,
                    quantity: outstanding,
                });
            }
        }

        self.recompute_receipt_status(now);
        Ok(postings)
    }

    /// Cancel the order, recording why.
    ///
    /// Illegal once fully received. Ledger entries posted by earlier partial
    /// receipts stay valid history; cancellation does not reverse them.
    pub fn cancel(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> DomainResult<()> {
        if !self.status.can_transition_to(PurchaseOrderStatus::Cancelled) {
            return Err(DomainError::invalid_transition(
                self.status,
                PurchaseOrderStatus::Cancelled,
            ));
        }
        self.cancelled_reason = Some(reason.into());
        self.cancelled_at = Some(now);
        self.status = PurchaseOrderStatus::Cancelled;
        Ok(())
    }

    fn ensure_edge(&self, target: PurchaseOrderStatus) -> DomainResult<()> {
        if self.status.can_transition_to(target) {
            Ok(())
        } else {
            Err(DomainError::invalid_transition(self.status, target))
        }
    }

    fn recompute_receipt_status(&mut self, now: DateTime<Utc>) {
        if self.items.iter().all(PurchaseOrderItem::is_fully_received) {
            self.status = PurchaseOrderStatus::Received;
            self.actual_delivery_at = Some(now);
        } else {
            self.status = PurchaseOrderStatus::PartiallyReceived;
        }
    }
}

impl Entity for PurchaseOrder {
    type Id = PurchaseOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl SoftDeletable for PurchaseOrder {
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
