//! Master-data operations: products, customers, suppliers, manual stock
//! adjustments.

use std::sync::Arc;

use chrono::Utc;

use tallyerp_core::{EntityId, SoftDeletable, UserId};
use tallyerp_inventory::{MovementKind, StockMovement};
use tallyerp_parties::{ContactInfo, Party, PartyId, PartyKind};
use tallyerp_products::{Product, ProductId};

use crate::config::InfraConfig;
use crate::ledger::{apply_movement, MovementRequest};
use crate::store::MemoryStore;
use crate::workflows::{WorkflowError, WorkflowResult};

#[derive(Debug, Clone)]
pub struct CatalogService {
    store: Arc<MemoryStore>,
    config: InfraConfig,
}

impl CatalogService {
    pub fn new(store: Arc<MemoryStore>, config: InfraConfig) -> Self {
        Self { store, config }
    }

    pub fn create_product(
        &self,
        sku: &str,
        name: &str,
        unit_price: u64,
        minimum_stock: Option<i64>,
    ) -> WorkflowResult<Product> {
        self.store.transact(self.config.conflict_retries, |tx| {
            let product = Product::new(
                ProductId::new(EntityId::new()),
                sku,
                name,
                unit_price,
                minimum_stock,
                Utc::now(),
            )?;
            tx.put_product(product.clone());
            Ok(product)
        })
    }

    /// Soft-delete: the row stays for audit and restore, default reads skip
    /// it from here on.
    pub fn delete_product(&self, id: ProductId) -> WorkflowResult<Product> {
        self.store.transact(self.config.conflict_retries, |tx| {
            let mut product = tx
                .product_any(id)
                .ok_or_else(|| WorkflowError::NotFound(format!("product {id}")))?;
            product.mark_deleted();
            tx.put_product(product.clone());
            Ok(product)
        })
    }

    pub fn restore_product(&self, id: ProductId) -> WorkflowResult<Product> {
        self.store.transact(self.config.conflict_retries, |tx| {
            let mut product = tx
                .product_any(id)
                .ok_or_else(|| WorkflowError::NotFound(format!("product {id}")))?;
            product.restore();
            tx.put_product(product.clone());
            Ok(product)
        })
    }

    pub fn create_customer(&self, name: &str, contact: Option<ContactInfo>) -> WorkflowResult<Party> {
        self.create_party(PartyKind::Customer, name, contact)
    }

    pub fn create_supplier(&self, name: &str, contact: Option<ContactInfo>) -> WorkflowResult<Party> {
        self.create_party(PartyKind::Supplier, name, contact)
    }

    fn create_party(
        &self,
        kind: PartyKind,
        name: &str,
        contact: Option<ContactInfo>,
    ) -> WorkflowResult<Party> {
        self.store.transact(self.config.conflict_retries, |tx| {
            let party = Party::new(
                PartyId::new(EntityId::new()),
                kind,
                name,
                contact.clone(),
                Utc::now(),
            )?;
            tx.put_party(party.clone());
            Ok(party)
        })
    }

    /// Manual stock correction outside any order workflow. Goes through the
    /// ledger like everything else, under its own reference sequence.
    pub fn adjust_stock(
        &self,
        product_id: ProductId,
        quantity: i64,
        reason: &str,
        actor: UserId,
    ) -> WorkflowResult<StockMovement> {
        self.store.transact(self.config.conflict_retries, |tx| {
            let reference = tx.next_reference("ADJ");
            let movement = apply_movement(
                tx,
                MovementRequest {
                    product_id,
                    quantity,
                    kind: MovementKind::Adjustment,
                    reference,
                    reason: reason.to_string(),
                    actor,
                    occurred_at: Utc::now(),
                },
            )
            .map_err(WorkflowError::from)?;
            Ok(movement)
        })
    }

    pub fn get_product(&self, id: ProductId) -> WorkflowResult<Product> {
        self.store.transact(self.config.conflict_retries, |tx| {
            tx.product(id)
                .ok_or_else(|| WorkflowError::NotFound(format!("product {id}")))
        })
    }
}
