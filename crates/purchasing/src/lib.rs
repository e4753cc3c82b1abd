//! Purchasing domain module (event-sourced).
//!
//! Purchase orders with per-line receipt tracking: goods arrive in one or
//! more receipts, over-receipt is rejected, and the order completes when
//! every line is fully received.

pub mod order;

pub use order::{
    AddLine, ApproveOrder, CancelOrder, CreatePurchaseOrder, OrderLine, PurchaseOrder,
    PurchaseOrderCommand, PurchaseOrderEvent, PurchaseOrderId, PurchaseOrderStatus, ReceiptLine,
    RecordGoodsReceipt, SubmitOrder,
};
