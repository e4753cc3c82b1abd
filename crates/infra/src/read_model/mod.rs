mod tenant_store;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use tenant_store::{InMemoryTenantStore, TenantStore};

#[cfg(feature = "postgres")]
pub use postgres::PostgresStockStore;
