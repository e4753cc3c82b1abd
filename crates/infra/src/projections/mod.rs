//! Read-model projections, one per queryable view.
//!
//! All projections share the same discipline: tenant-isolated stores,
//! per-stream cursors for idempotency under at-least-once delivery, and
//! `rebuild_from_scratch` support (read models are disposable).

pub mod catalog;
pub mod coupons;
pub mod cursor;
pub mod deliveries;
pub mod locations;
pub mod parties;
pub mod purchase_orders;
pub mod sales_orders;
pub mod serials;
pub mod settings;
pub mod stock_levels;
pub mod stock_takes;
pub mod users;
