use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tallyerp_core::{Entity, EntityId, UserId};
use tallyerp_parties::PartyId;
use tallyerp_products::ProductId;
use tallyerp_sales::{SalesOrder, SalesOrderId};

/// Invoice identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(pub EntityId);

impl InvoiceId {
    pub fn new(id: EntityId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Failure issuing an invoice.
///
/// The sales workflow logs these and moves on; nothing in the fulfillment
/// path depends on invoicing having succeeded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvoiceError {
    #[error("invoice validation failed: {0}")]
    Validation(String),

    /// The invoicing backend could not take the request.
    #[error("invoicing unavailable: {0}")]
    Unavailable(String),
}

/// Invoice line derived from one sales-order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub line_no: u32,
    pub product_id: ProductId,
    pub quantity: i64,
    /// Price snapshot in smallest currency unit (e.g., cents), carried over
    /// from the order line.
    pub unit_price: u64,
    pub line_total: u64,
}

/// An issued invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    id: InvoiceId,
    /// Unique generated number, e.g. "INV-000042".
    number: String,
    sales_order_id: SalesOrderId,
    customer_id: PartyId,
    lines: Vec<InvoiceLine>,
    total_amount: u64,
    issued_by: UserId,
    issued_at: DateTime<Utc>,
}

impl Invoice {
    pub fn id_typed(&self) -> InvoiceId {
        self.id
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn sales_order_id(&self) -> SalesOrderId {
        self.sales_order_id
    }

    pub fn customer_id(&self) -> PartyId {
        self.customer_id
    }

    pub fn lines(&self) -> &[InvoiceLine] {
        &self.lines
    }

    pub fn total_amount(&self) -> u64 {
        self.total_amount
    }

    pub fn issued_by(&self) -> UserId {
        self.issued_by
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }
}

impl Entity for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// External invoice collaborator.
///
/// Implementations must not mutate order or inventory state; they only
/// record the billing side of an order entering processing.
pub trait InvoiceService: Send + Sync {
    fn create_invoice_from_sales_order(
        &self,
        order: &SalesOrder,
        actor: UserId,
    ) -> Result<Invoice, InvoiceError>;
}

/// In-memory invoicing backend.
///
/// Intended for tests/dev. Numbers invoices sequentially and keeps every
/// issued invoice for inspection.
#[derive(Debug, Default)]
pub struct InMemoryInvoicing {
    issued: Mutex<Vec<Invoice>>,
}

impl InMemoryInvoicing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every invoice issued so far, in issue order.
    pub fn issued(&self) -> Vec<Invoice> {
        self.issued
            .lock()
            .map(|invoices| invoices.clone())
            .unwrap_or_default()
    }
}

impl InvoiceService for InMemoryInvoicing {
    fn create_invoice_from_sales_order(
        &self,
        order: &SalesOrder,
        actor: UserId,
    ) -> Result<Invoice, InvoiceError> {
        if order.items().is_empty() {
            return Err(InvoiceError::Validation(
                "cannot issue invoice without lines".to_string(),
            ));
        }

        let mut lines = Vec::with_capacity(order.items().len());
        let mut total: u64 = 0;
        for (idx, item) in order.items().iter().enumerate() {
            if item.quantity() <= 0 {
                return Err(InvoiceError::Validation(
                    "invoice line quantity must be positive".to_string(),
                ));
            }
            if item.unit_price() == 0 {
                return Err(InvoiceError::Validation(
                    "invoice line unit_price must be positive".to_string(),
                ));
            }
            let line_total = (item.quantity() as i128)
                .checked_mul(item.unit_price() as i128)
                .filter(|t| *t > 0 && *t <= u64::MAX as i128)
                .ok_or_else(|| {
                    InvoiceError::Validation("invoice line amount overflow".to_string())
                })?;
            total = total.checked_add(line_total as u64).ok_or_else(|| {
                InvoiceError::Validation("invoice total overflow".to_string())
            })?;
            lines.push(InvoiceLine {
                line_no: idx as u32 + 1,
                product_id: item.product_id(),
                quantity: item.quantity(),
                unit_price: item.unit_price(),
                line_total: line_total as u64,
            });
        }

        let mut issued = self
            .issued
            .lock()
            .map_err(|_| InvoiceError::Unavailable("invoice store lock poisoned".to_string()))?;

        let invoice = Invoice {
            id: InvoiceId::new(EntityId::new()),
            number: format!("INV-{:06}", issued.len() + 1),
            sales_order_id: order.id_typed(),
            customer_id: order.customer_id(),
            lines,
            total_amount: total,
            issued_by: actor,
            issued_at: Utc::now(),
        };
        issued.push(invoice.clone());

        Ok(invoice)
    }
}
