use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tallyerp_core::{DomainError, DomainResult, Entity, EntityId, SoftDeletable, UserId};
use tallyerp_products::ProductId;

use crate::order::{PurchaseOrder, PurchaseOrderId, PurchaseOrderItemId};

/// Purchase-order return identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurchaseOrderReturnId(pub EntityId);

impl PurchaseOrderReturnId {
    pub fn new(id: EntityId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PurchaseOrderReturnId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Return line identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReturnItemId(pub EntityId);

impl ReturnItemId {
    pub fn new(id: EntityId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ReturnItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Return lifecycle. Creation and approval are paperwork steps; stock only
/// moves at `Processed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseReturnStatus {
    Pending,
    Approved,
    Processed,
    Cancelled,
}

impl PurchaseReturnStatus {
    /// Every status, for exhaustive transition checks.
    pub const ALL: [PurchaseReturnStatus; 4] = [
        PurchaseReturnStatus::Pending,
        PurchaseReturnStatus::Approved,
        PurchaseReturnStatus::Processed,
        PurchaseReturnStatus::Cancelled,
    ];

    pub fn can_transition_to(self, next: PurchaseReturnStatus) -> bool {
        use PurchaseReturnStatus::*;
        matches!(
            (self, next),
            (Pending, Approved) | (Pending, Cancelled) | (Approved, Processed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PurchaseReturnStatus::Processed | PurchaseReturnStatus::Cancelled
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            PurchaseReturnStatus::Pending => "pending",
            PurchaseReturnStatus::Approved => "approved",
            PurchaseReturnStatus::Processed => "processed",
            PurchaseReturnStatus::Cancelled => "cancelled",
        }
    }
}

impl core::fmt::Display for PurchaseReturnStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

/// Requested return of one purchase-order line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnRequest {
    pub source_item_id: PurchaseOrderItemId,
    pub quantity: i64,
    /// Whether a refund should be processed when this return is processed.
    pub refund_requested: bool,
}

/// One return line, bound to the purchase-order line it reverses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseReturnItem {
    id: ReturnItemId,
    source_item_id: PurchaseOrderItemId,
    product_id: ProductId,
    quantity: i64,
    /// Price snapshot from the source line (smallest currency unit).
    unit_price: u64,
    refund_requested: bool,
    refund_processed: bool,
}

impl PurchaseReturnItem {
    pub fn id_typed(&self) -> ReturnItemId {
        self.id
    }

    pub fn source_item_id(&self) -> PurchaseOrderItemId {
        self.source_item_id
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

    pub fn refund_requested(&self) -> bool {
        self.refund_requested
    }

    pub fn refund_processed(&self) -> bool {
        self.refund_processed
    }
}

/// Ledger instruction produced by processing: book `quantity` of
/// `product_id` back out to the supplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReturnPosting {
    pub product_id: ProductId,
    pub quantity: i64,
}

/// Aggregate root: PurchaseOrderReturn (header + items, owned as a unit).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderReturn {
    id: PurchaseOrderReturnId,
    purchase_order_id: PurchaseOrderId,
    status: PurchaseReturnStatus,
    items: Vec<PurchaseReturnItem>,
    /// Unique generated number, e.g. "PR-000042".
    number: String,
    approved_by: Option<UserId>,
    approved_at: Option<DateTime<Utc>>,
    processed_at: Option<DateTime<Utc>>,
    deleted: bool,
    created_at: DateTime<Utc>,
}

impl PurchaseOrderReturn {
    /// Open a return against a received (or partially received) purchase
    /// order.
    ///
    /// Each request is bounded by the source line's received quantity minus
    /// what **processed** returns of that line already consumed
    /// (`processed_by_source`); pending and approved siblings do not count
    /// here — approval re-checks against them (see [`Self::approve`]). No
    /// ledger movement happens at creation.
    pub fn create(
        id: PurchaseOrderReturnId,
        purchase_order: &PurchaseOrder,
        requests: &[ReturnRequest],
        processed_by_source: &HashMap<PurchaseOrderItemId, i64>,
        number: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if !matches!(
            purchase_order.status(),
            crate::order::PurchaseOrderStatus::Received
                | crate::order::PurchaseOrderStatus::PartiallyReceived
        ) {
            return Err(DomainError::validation(format!(
                "purchase order {} must be received or partially received to open a return",
                purchase_order.number()
            )));
        }
        if requests.is_empty() {
            return Err(DomainError::validation(
                "return must have at least one line",
            ));
        }

        let mut items = Vec::with_capacity(requests.len());
        // Requests within this call also count against the bound, so two
        // lines for the same source item cannot overshoot together.
        let mut requested_so_far: HashMap<PurchaseOrderItemId, i64> = HashMap::new();

        for request in requests {
            if request.quantity <= 0 {
                return Err(DomainError::validation("return quantity must be positive"));
            }

            let source = purchase_order.item(request.source_item_id).ok_or_else(|| {
                DomainError::not_found(format!(
                    "purchase order item {}",
                    request.source_item_id
                ))
            })?;

            let consumed = processed_by_source
                .get(&request.source_item_id)
                .copied()
                .unwrap_or(0)
                + requested_so_far
                    .get(&request.source_item_id)
                    .copied()
                    .unwrap_or(0);
            let returnable = source.received_quantity() - consumed;

            if request.quantity > returnable {
                return Err(DomainError::OverReturn {
                    requested: request.quantity,
                    returnable: returnable.max(0),
                });
            }

            *requested_so_far.entry(request.source_item_id).or_insert(0) += request.quantity;

            items.push(PurchaseReturnItem {
                id: ReturnItemId::new(EntityId::new()),
                source_item_id: request.source_item_id,
                product_id: source.product_id(),
                quantity: request.quantity,
                unit_price: source.unit_price(),
                refund_requested: request.refund_requested,
                refund_processed: false,
            });
        }

        Ok(Self {
            id,
            purchase_order_id: purchase_order.id_typed(),
            status: PurchaseReturnStatus::Pending,
            items,
            number: number.into(),
            approved_by: None,
            approved_at: None,
            processed_at: None,
            deleted: false,
            created_at,
        })
    }

    pub fn id_typed(&self) -> PurchaseOrderReturnId {
        self.id
    }

    pub fn purchase_order_id(&self) -> PurchaseOrderId {
        self.purchase_order_id
    }

    pub fn status(&self) -> PurchaseReturnStatus {
        self.status
    }

    pub fn items(&self) -> &[PurchaseReturnItem] {
        &self.items
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn approved_by(&self) -> Option<UserId> {
        self.approved_by
    }

    pub fn processed_at(&self) -> Option<DateTime<Utc>> {
        self.processed_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Quantity this return claims per source line. Used by sibling
    /// approvals and process-time bookkeeping.
    pub fn quantities_by_source(&self) -> HashMap<PurchaseOrderItemId, i64> {
        let mut map: HashMap<PurchaseOrderItemId, i64> = HashMap::new();
        for item in &self.items {
            *map.entry(item.source_item_id).or_insert(0) += item.quantity;
        }
        map
    }

    /// `Pending → Approved`.
    ///
    /// `committed_by_source` is the per-line quantity already claimed by
    /// sibling returns of the same purchase order that are processed *or*
    /// approved-but-unprocessed. Counting approvals here reserves the
    /// quantity at the paperwork step, so two overlapping returns cannot
    /// both be approved for the same goods.
    pub fn approve(
        &mut self,
        purchase_order: &PurchaseOrder,
        committed_by_source: &HashMap<PurchaseOrderItemId, i64>,
        approver: UserId,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_edge(PurchaseReturnStatus::Approved)?;

        for item in &self.items {
            let source = purchase_order.item(item.source_item_id).ok_or_else(|| {
                DomainError::not_found(format!("purchase order item {}", item.source_item_id))
            })?;
            let committed = committed_by_source
                .get(&item.source_item_id)
                .copied()
                .unwrap_or(0);
            let returnable = source.received_quantity() - committed;

            if item.quantity > returnable {
                return Err(DomainError::OverReturn {
                    requested: item.quantity,
                    returnable: returnable.max(0),
                });
            }
        }

        self.approved_by = Some(approver);
        self.approved_at = Some(now);
        self.status = PurchaseReturnStatus::Approved;
        Ok(())
    }

    /// `Pending → Cancelled`.
    pub fn cancel(&mut self) -> DomainResult<()> {
        self.ensure_edge(PurchaseReturnStatus::Cancelled)?;
        self.status = PurchaseReturnStatus::Cancelled;
        Ok(())
    }

    /// `Approved → Processed`: flip refund flags as requested, stamp the
    /// processed time and hand back one ledger instruction per line.
    ///
    /// The caller posts the outbound movements in the same transaction;
    /// stock re-validation happens there, and any failure rolls this state
    /// change back with the rest of the call.
    pub fn process(&mut self, now: DateTime<Utc>) -> DomainResult<Vec<ReturnPosting>> {
        self.ensure_edge(PurchaseReturnStatus::Processed)?;

        let mut postings = Vec::with_capacity(self.items.len());
        for item in &mut self.items {
            item.refund_processed = item.refund_requested;
            postings.push(ReturnPosting {
                product_id: item.product_id,
                quantity: item.quantity,
            });
        }

        self.processed_at = Some(now);
        self.status = PurchaseReturnStatus::Processed;
        Ok(postings)
    }

    fn ensure_edge(&self, target: PurchaseReturnStatus) -> DomainResult<()> {
        if self.status.can_transition_to(target) {
            Ok(())
        } else {
            Err(DomainError::invalid_transition(self.status, target))
        }
    }
}

impl Entity for PurchaseOrderReturn {
    type Id = PurchaseOrderReturnId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl SoftDeletable for PurchaseOrderReturn {
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
