use axum::{Router, routing::get};

pub mod admin;
pub mod catalog;
pub mod common;
pub mod coupons;
pub mod customers;
pub mod deliveries;
pub mod events;
pub mod inventory;
pub mod locations;
pub mod purchases;
pub mod sales;
pub mod serials;
pub mod settings;
pub mod stock_takes;
pub mod suppliers;
pub mod system;

/// Router for all authenticated (tenant-scoped) endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/stream", get(system::stream))
        .nest("/catalog", catalog::router())
        .nest("/locations", locations::router())
        .nest("/inventory", inventory::router())
        .nest("/purchases", purchases::router())
        .nest("/sales", sales::router())
        .nest("/deliveries", deliveries::router())
        .nest("/customers", customers::router())
        .nest("/suppliers", suppliers::router())
        .nest("/coupons", coupons::router())
        .nest("/settings", settings::router())
        .nest("/admin", admin::router())
        .nest("/events", events::router())
}
