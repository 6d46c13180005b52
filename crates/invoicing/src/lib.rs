//! `tallyerp-invoicing` — the invoice collaborator.
//!
//! Order fulfillment treats invoicing as an external party: the sales
//! workflow asks for an invoice when an order enters processing and carries
//! on if the request fails. This crate holds the collaborator trait and an
//! in-memory implementation used in tests and development.

pub mod invoice;

pub use invoice::{
    InMemoryInvoicing, Invoice, InvoiceError, InvoiceId, InvoiceLine, InvoiceService,
};
