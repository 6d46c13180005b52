//! Purchase-order receiving: `Draft → Pending → Approved → Sent →
//! {PartiallyReceived ⇄ Received}`, with goods receipts posting stock-in
//! movements as they are booked.

use std::sync::Arc;

use chrono::Utc;

use tallyerp_core::{EntityId, UserId};
use tallyerp_inventory::MovementKind;
use tallyerp_parties::PartyId;
use tallyerp_purchasing::{
    NewPurchaseLine, PurchaseOrder, PurchaseOrderId, PurchaseOrderItemId, ReceiptPosting,
};

use crate::config::InfraConfig;
use crate::ledger::{apply_movement, MovementRequest};
use crate::store::{MemoryStore, Transaction};
use crate::workflows::{WorkflowError, WorkflowResult};

#[derive(Debug, Clone)]
pub struct ReceivingService {
    store: Arc<MemoryStore>,
    config: InfraConfig,
}

impl ReceivingService {
    pub fn new(store: Arc<MemoryStore>, config: InfraConfig) -> Self {
        Self { store, config }
    }

    pub fn create_order(
        &self,
        supplier_id: PartyId,
        lines: Vec<NewPurchaseLine>,
    ) -> WorkflowResult<PurchaseOrder> {
        self.store.transact(self.config.conflict_retries, |tx| {
            tx.party(supplier_id)
                .ok_or_else(|| WorkflowError::NotFound(format!("supplier {supplier_id}")))?;
            for line in &lines {
                tx.product(line.product_id).ok_or_else(|| {
                    WorkflowError::NotFound(format!("product {}", line.product_id))
                })?;
            }

            let number = tx.next_reference("PO");
            let order = PurchaseOrder::create(
                PurchaseOrderId::new(EntityId::new()),
                supplier_id,
                lines.clone(),
                number,
                Utc::now(),
            )?;
            tx.put_purchase_order(order.clone());
            Ok(order)
        })
    }

    pub fn submit(&self, order_id: PurchaseOrderId) -> WorkflowResult<PurchaseOrder> {
        self.store.transact(self.config.conflict_retries, |tx| {
            let mut order = load_order(tx, order_id)?;
            order.submit()?;
            tx.put_purchase_order(order.clone());
            Ok(order)
        })
    }

    pub fn approve(
        &self,
        order_id: PurchaseOrderId,
        approver: UserId,
    ) -> WorkflowResult<PurchaseOrder> {
        self.store.transact(self.config.conflict_retries, |tx| {
            let mut order = load_order(tx, order_id)?;
            order.approve(approver, Utc::now())?;
            tx.put_purchase_order(order.clone());
            Ok(order)
        })
    }

    pub fn send(&self, order_id: PurchaseOrderId) -> WorkflowResult<PurchaseOrder> {
        self.store.transact(self.config.conflict_retries, |tx| {
            let mut order = load_order(tx, order_id)?;
            order.send()?;
            tx.put_purchase_order(order.clone());
            Ok(order)
        })
    }

    /// Book a receipt against one line and post its stock-in movement, both
    /// in one transaction.
    pub fn receive_item(
        &self,
        order_id: PurchaseOrderId,
        item_id: PurchaseOrderItemId,
        quantity: i64,
        actor: UserId,
    ) -> WorkflowResult<PurchaseOrder> {
        self.store.transact(self.config.conflict_retries, |tx| {
            let mut order = load_order(tx, order_id)?;
            let posting = order.receive_item(item_id, quantity, Utc::now())?;
            post_receipt(tx, &order, posting, actor)?;
            tx.put_purchase_order(order.clone());
            Ok(order)
        })
    }

    /// Receive every line's outstanding quantity: one movement per open
    /// line, all-or-nothing.
    pub fn receive_full_order(
        &self,
        order_id: PurchaseOrderId,
        actor: UserId,
    ) -> WorkflowResult<PurchaseOrder> {
        self.store.transact(self.config.conflict_retries, |tx| {
            let mut order = load_order(tx, order_id)?;
            let postings = order.receive_outstanding(Utc::now())?;
            for posting in postings {
                post_receipt(tx, &order, posting, actor)?;
            }
            tx.put_purchase_order(order.clone());
            Ok(order)
        })
    }

    /// Cancel the order. Stock already booked in by partial receipts stays
    /// on the ledger; cancellation is not a reversal.
    pub fn cancel(&self, order_id: PurchaseOrderId, reason: &str) -> WorkflowResult<PurchaseOrder> {
        self.store.transact(self.config.conflict_retries, |tx| {
            let mut order = load_order(tx, order_id)?;
            order.cancel(reason, Utc::now())?;
            tx.put_purchase_order(order.clone());
            Ok(order)
        })
    }
}

fn load_order(
    tx: &mut Transaction<'_>,
    order_id: PurchaseOrderId,
) -> WorkflowResult<PurchaseOrder> {
    tx.purchase_order(order_id)
        .ok_or_else(|| WorkflowError::NotFound(format!("purchase order {order_id}")))
}

fn post_receipt(
    tx: &mut Transaction<'_>,
    order: &PurchaseOrder,
    posting: ReceiptPosting,
    actor: UserId,
) -> WorkflowResult<()> {
    apply_movement(
        tx,
        MovementRequest {
            product_id: posting.product_id,
            quantity: posting.quantity,
            kind: MovementKind::StockIn,
            reference: order.number().to_string(),
            reason: "purchase order receipt".to_string(),
            actor,
            occurred_at: Utc::now(),
        },
    )?;
    Ok(())
}
