//! `tallyerp-purchasing` — purchase-order receiving and return processing.
//!
//! Two state machines share this crate: the receiving lifecycle
//! (`Draft → Pending → Approved → Sent → {PartiallyReceived ⇄ Received}`)
//! and the deferred-mutation return lifecycle
//! (`Pending → Approved → Processed`), where approval is paperwork and the
//! ledger is only touched at process time.

pub mod order;
pub mod returns;

pub use order::{
    NewPurchaseLine, PurchaseOrder, PurchaseOrderId, PurchaseOrderItem, PurchaseOrderItemId,
    PurchaseOrderStatus, ReceiptPosting,
};
pub use returns::{
    PurchaseOrderReturn, PurchaseOrderReturnId, PurchaseReturnStatus, ReturnItemId, ReturnPosting,
    PurchaseReturnItem, ReturnRequest,
};
