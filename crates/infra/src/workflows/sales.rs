//! Sales-order fulfillment. The aggregate decides which transitions are
//! legal; its `FulfillmentAction` forces this module to handle every side
//! effect exhaustively.

use std::sync::Arc;

use chrono::Utc;

use tallyerp_core::{EntityId, UserId};
use tallyerp_inventory::MovementKind;
use tallyerp_invoicing::InvoiceService;
use tallyerp_parties::PartyId;
use tallyerp_products::ProductId;
use tallyerp_sales::{
    FulfillmentAction, NewOrderLine, SalesOrder, SalesOrderId, SalesOrderStatus,
};

use crate::config::InfraConfig;
use crate::ledger::{apply_movement, MovementRequest};
use crate::store::{MemoryStore, Transaction};
use crate::workflows::{WorkflowError, WorkflowResult};

/// Requested order line; the unit price is snapshotted from the product at
/// creation time, not supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderLineRequest {
    pub product_id: ProductId,
    pub quantity: i64,
}

#[derive(Clone)]
pub struct SalesService {
    store: Arc<MemoryStore>,
    invoicing: Arc<dyn InvoiceService>,
    config: InfraConfig,
}

impl SalesService {
    pub fn new(
        store: Arc<MemoryStore>,
        invoicing: Arc<dyn InvoiceService>,
        config: InfraConfig,
    ) -> Self {
        Self {
            store,
            invoicing,
            config,
        }
    }

    pub fn create_order(
        &self,
        customer_id: PartyId,
        lines: Vec<OrderLineRequest>,
    ) -> WorkflowResult<SalesOrder> {
        self.store.transact(self.config.conflict_retries, |tx| {
            let customer = tx
                .party(customer_id)
                .ok_or_else(|| WorkflowError::NotFound(format!("customer {customer_id}")))?;
            if !customer.can_transact() {
                return Err(WorkflowError::NotFound(format!("customer {customer_id}")));
            }

            let mut order_lines = Vec::with_capacity(lines.len());
            for line in &lines {
                let product = tx.product(line.product_id).ok_or_else(|| {
                    WorkflowError::NotFound(format!("product {}", line.product_id))
                })?;
                order_lines.push(NewOrderLine {
                    product_id: line.product_id,
                    quantity: line.quantity,
                    unit_price: product.unit_price(),
                });
            }

            let reference = tx.next_reference("SO");
            let order = SalesOrder::create(
                SalesOrderId::new(EntityId::new()),
                customer_id,
                order_lines,
                reference,
                Utc::now(),
            )?;
            tx.put_sales_order(order.clone());
            Ok(order)
        })
    }

    /// Drive the order to `target`, running the transition's side effects
    /// in the same transaction. Invoice creation is the one effect that
    /// happens after commit: it belongs to an external collaborator, and
    /// its failure must not undo the transition.
    pub fn update_status(
        &self,
        order_id: SalesOrderId,
        target: SalesOrderStatus,
        actor: UserId,
    ) -> WorkflowResult<SalesOrder> {
        let (order, action) = self.store.transact(self.config.conflict_retries, |tx| {
            let mut order = tx
                .sales_order(order_id)
                .ok_or_else(|| WorkflowError::NotFound(format!("sales order {order_id}")))?;
            let action = order.transition(target, Utc::now())?;

            match action {
                FulfillmentAction::BeginProcessing | FulfillmentAction::ResumeProcessing => {
                    ensure_stock_available(tx, &order)?;
                }
                FulfillmentAction::Hold
                | FulfillmentAction::Complete
                | FulfillmentAction::CancelBeforeShipment => {}
                FulfillmentAction::Ship => {
                    ship_items(tx, &order, actor)?;
                }
                FulfillmentAction::RestockReturn => {
                    restock_items(tx, &order, actor);
                }
            }

            tx.put_sales_order(order.clone());
            Ok::<_, WorkflowError>((order, action))
        })?;

        if action == FulfillmentAction::BeginProcessing {
            if let Err(err) = self
                .invoicing
                .create_invoice_from_sales_order(&order, actor)
            {
                tracing::warn!(
                    order = order.reference(),
                    error = %err,
                    "invoice creation failed; fulfillment continues"
                );
            }
        }

        Ok(order)
    }
}

/// Availability check on entering processing. Reads the projection only;
/// deduction waits for shipment.
fn ensure_stock_available(tx: &mut Transaction<'_>, order: &SalesOrder) -> WorkflowResult<()> {
    for item in order.items() {
        let product = tx
            .product(item.product_id())
            .ok_or_else(|| WorkflowError::NotFound(format!("product {}", item.product_id())))?;
        if product.current_stock() < item.quantity() {
            return Err(WorkflowError::InsufficientStock {
                requested: item.quantity(),
                available: product.current_stock(),
            });
        }
    }
    Ok(())
}

/// One outbound movement per line. A failure on any line aborts the
/// transaction, rolling back the movements already staged.
fn ship_items(tx: &mut Transaction<'_>, order: &SalesOrder, actor: UserId) -> WorkflowResult<()> {
    for item in order.items() {
        apply_movement(
            tx,
            MovementRequest {
                product_id: item.product_id(),
                quantity: -item.quantity(),
                kind: MovementKind::StockOut,
                reference: order.reference().to_string(),
                reason: "sales order shipment".to_string(),
                actor,
                occurred_at: Utc::now(),
            },
        )?;
    }
    Ok(())
}

/// One inbound movement per line, partial-success tolerant: a line that
/// cannot be restocked is logged and skipped, the rest still land.
fn restock_items(tx: &mut Transaction<'_>, order: &SalesOrder, actor: UserId) {
    for item in order.items() {
        let result = apply_movement(
            tx,
            MovementRequest {
                product_id: item.product_id(),
                quantity: item.quantity(),
                kind: MovementKind::CustomerReturn,
                reference: order.reference().to_string(),
                reason: "customer return restock".to_string(),
                actor,
                occurred_at: Utc::now(),
            },
        );
        if let Err(err) = result {
            tracing::warn!(
                order = order.reference(),
                product = %item.product_id(),
                quantity = item.quantity(),
                error = %err,
                "restock failed for returned line; continuing with the rest"
            );
        }
    }
}
