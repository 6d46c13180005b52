use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tallyerp_core::{DomainError, DomainResult, Entity, EntityId, SoftDeletable};

/// Product identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub EntityId);

impl ProductId {
    pub fn new(id: EntityId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Product master data plus the live stock projection.
///
/// `current_stock` is derivable by replaying the stock ledger; the field is
/// the projection the order workflows read. It changes only through
/// [`Product::commit_stock_level`], called by the ledger when a movement is
/// posted in the same transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    id: ProductId,
    sku: String,
    name: String,
    /// Price in smallest currency unit (e.g., cents). Order lines snapshot
    /// this value at creation time.
    unit_price: u64,
    current_stock: i64,
    minimum_stock: Option<i64>,
    deleted: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Product {
    pub fn new(
        id: ProductId,
        sku: impl Into<String>,
        name: impl Into<String>,
        unit_price: u64,
        minimum_stock: Option<i64>,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let sku = sku.into();
        let name = name.into();

        if sku.trim().is_empty() {
            return Err(DomainError::validation("sku cannot be empty"));
        }
        if name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if unit_price == 0 {
            return Err(DomainError::validation("unit_price must be positive"));
        }
        if matches!(minimum_stock, Some(m) if m < 0) {
            return Err(DomainError::validation("minimum_stock cannot be negative"));
        }

        Ok(Self {
            id,
            sku,
            name,
            unit_price,
            current_stock: 0,
            minimum_stock,
            deleted: false,
            created_at,
            updated_at: created_at,
        })
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit_price(&self) -> u64 {
        self.unit_price
    }

    pub fn current_stock(&self) -> i64 {
        self.current_stock
    }

    pub fn minimum_stock(&self) -> Option<i64> {
        self.minimum_stock
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Whether stock has reached the reorder threshold.
    pub fn is_below_minimum(&self) -> bool {
        matches!(self.minimum_stock, Some(min) if self.current_stock <= min)
    }

    pub fn set_unit_price(&mut self, unit_price: u64, now: DateTime<Utc>) -> DomainResult<()> {
        if unit_price == 0 {
            return Err(DomainError::validation("unit_price must be positive"));
        }
        self.unit_price = unit_price;
        self.updated_at = now;
        Ok(())
    }

    /// Install the stock level computed by a posted ledger movement.
    ///
    /// Only the stock ledger calls this; everything else goes through
    /// `apply_movement`. The level has already been validated against the
    /// non-negative invariant, so a negative value here is rejected outright.
    pub fn commit_stock_level(&mut self, stock_after: i64, now: DateTime<Utc>) -> DomainResult<()> {
        if stock_after < 0 {
            return Err(DomainError::validation(
                "stock level cannot be committed below zero",
            ));
        }
        self.current_stock = stock_after;
        self.updated_at = now;
        Ok(())
    }
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl SoftDeletable for Product {
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
