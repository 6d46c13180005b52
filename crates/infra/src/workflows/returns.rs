//! Purchase-order returns: the deferred-mutation machine. Creation and
//! approval are paperwork; stock leaves only when a return is processed.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use tallyerp_core::{EntityId, UserId};
use tallyerp_inventory::MovementKind;
use tallyerp_purchasing::{
    PurchaseOrderId, PurchaseOrderItemId, PurchaseOrderReturn, PurchaseOrderReturnId,
    PurchaseReturnStatus, ReturnRequest,
};

use crate::config::InfraConfig;
use crate::ledger::{apply_movement, MovementRequest};
use crate::store::{MemoryStore, Transaction};
use crate::workflows::{WorkflowError, WorkflowResult};

#[derive(Debug, Clone)]
pub struct ReturnsService {
    store: Arc<MemoryStore>,
    config: InfraConfig,
}

impl ReturnsService {
    pub fn new(store: Arc<MemoryStore>, config: InfraConfig) -> Self {
        Self { store, config }
    }

    /// Open a return against a received or partially received purchase
    /// order. Bounded by received quantity minus what processed sibling
    /// returns already consumed; touches no stock.
    pub fn create_return(
        &self,
        order_id: PurchaseOrderId,
        requests: Vec<ReturnRequest>,
    ) -> WorkflowResult<PurchaseOrderReturn> {
        self.store.transact(self.config.conflict_retries, |tx| {
            let order = tx
                .purchase_order(order_id)
                .ok_or_else(|| WorkflowError::NotFound(format!("purchase order {order_id}")))?;

            let processed = claimed_by_source(tx, order_id, None, &[PurchaseReturnStatus::Processed]);

            let number = tx.next_reference("PR");
            let ret = PurchaseOrderReturn::create(
                PurchaseOrderReturnId::new(EntityId::new()),
                &order,
                &requests,
                &processed,
                number,
                Utc::now(),
            )?;
            tx.put_purchase_return(ret.clone());
            Ok(ret)
        })
    }

    /// Approve a pending return, reserving its quantities: the bound here
    /// also counts sibling returns that are approved but not yet processed,
    /// so two overlapping returns cannot both get through the paperwork.
    pub fn approve(
        &self,
        return_id: PurchaseOrderReturnId,
        approver: UserId,
    ) -> WorkflowResult<PurchaseOrderReturn> {
        self.store.transact(self.config.conflict_retries, |tx| {
            let mut ret = load_return(tx, return_id)?;
            let order = tx.purchase_order(ret.purchase_order_id()).ok_or_else(|| {
                WorkflowError::NotFound(format!("purchase order {}", ret.purchase_order_id()))
            })?;

            let committed = claimed_by_source(
                tx,
                ret.purchase_order_id(),
                Some(return_id),
                &[PurchaseReturnStatus::Processed, PurchaseReturnStatus::Approved],
            );

            ret.approve(&order, &committed, approver, Utc::now())?;
            tx.put_purchase_return(ret.clone());
            Ok(ret)
        })
    }

    pub fn cancel(&self, return_id: PurchaseOrderReturnId) -> WorkflowResult<PurchaseOrderReturn> {
        self.store.transact(self.config.conflict_retries, |tx| {
            let mut ret = load_return(tx, return_id)?;
            ret.cancel()?;
            tx.put_purchase_return(ret.clone());
            Ok(ret)
        })
    }

    /// Process an approved return: one outbound movement per line. The
    /// ledger's non-negative check re-validates current stock at process
    /// time, and any failure aborts the whole call — no item is marked
    /// processed unless all are.
    pub fn process(
        &self,
        return_id: PurchaseOrderReturnId,
        actor: UserId,
    ) -> WorkflowResult<PurchaseOrderReturn> {
        self.store.transact(self.config.conflict_retries, |tx| {
            let mut ret = load_return(tx, return_id)?;
            let postings = ret.process(Utc::now())?;

            for posting in postings {
                apply_movement(
                    tx,
                    MovementRequest {
                        product_id: posting.product_id,
                        quantity: -posting.quantity,
                        kind: MovementKind::SupplierReturn,
                        reference: ret.number().to_string(),
                        reason: "return to supplier".to_string(),
                        actor,
                        occurred_at: Utc::now(),
                    },
                )?;
            }

            tx.put_purchase_return(ret.clone());
            Ok(ret)
        })
    }
}

fn load_return(
    tx: &mut Transaction<'_>,
    return_id: PurchaseOrderReturnId,
) -> WorkflowResult<PurchaseOrderReturn> {
    tx.purchase_return(return_id)
        .ok_or_else(|| WorkflowError::NotFound(format!("purchase order return {return_id}")))
}

/// Per-source-line quantity claimed by sibling returns in the given
/// statuses, excluding `skip` (the return being decided on).
fn claimed_by_source(
    tx: &mut Transaction<'_>,
    order_id: PurchaseOrderId,
    skip: Option<PurchaseOrderReturnId>,
    statuses: &[PurchaseReturnStatus],
) -> HashMap<PurchaseOrderItemId, i64> {
    let mut claimed: HashMap<PurchaseOrderItemId, i64> = HashMap::new();
    for sibling in tx.returns_for_order(order_id) {
        if Some(sibling.id_typed()) == skip || !statuses.contains(&sibling.status()) {
            continue;
        }
        for (source, quantity) in sibling.quantities_by_source() {
            *claimed.entry(source).or_insert(0) += quantity;
        }
    }
    claimed
}
