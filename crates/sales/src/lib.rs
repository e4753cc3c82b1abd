//! Sales domain module (event-sourced).
//!
//! Sales orders (with cumulative payments and coupon-aware totals) and the
//! delivery lifecycle for dispatched orders.

pub mod delivery;
pub mod order;

pub use delivery::{
    CompleteDelivery, Delivery, DeliveryCommand, DeliveryEvent, DeliveryId, DeliveryStatus,
    FailDelivery, RetryDelivery, ScheduleDelivery, StartDelivery,
};
pub use order::{
    AddLine, CancelOrder, ConfirmOrder, CreateSalesOrder, DispatchOrder, LineAdded, LineRemoved,
    MarkDelivered, MarkPaid, OrderCancelled, OrderConfirmed, OrderDelivered, OrderDispatched,
    OrderLine, OrderPaid, PaymentMethod, PaymentRegistered, RegisterPayment, RemoveLine,
    SalesOrder, SalesOrderCommand, SalesOrderCreated, SalesOrderEvent, SalesOrderId,
    SalesOrderStatus,
};
