//! `stockpile-alerts`
//!
//! **Responsibility:** operational alerting over read models.
//!
//! This crate is intentionally **not** part of the domain model:
//! - It must not depend on domain aggregates (inventory/sales/etc).
//! - It must not mutate domain state.
//! - It emits **alert reports**, not domain events.

pub mod job;
pub mod low_stock;
pub mod report;
pub mod scheduler;

pub use job::AlertJob;
pub use low_stock::{LowStockAlert, LowStockJob};
pub use report::{AlertError, AlertReport};
pub use scheduler::{
    AlertScheduler, LocalAlertScheduler, ReadModelReader, StockBucketSnapshot, StockSnapshot,
    TenantScope,
};
