//! Tenant settings domain module (event-sourced).
//!
//! One settings stream per tenant; the API derives the aggregate id
//! deterministically from the tenant id so the stream acts as a singleton.

pub mod tenant_settings;

pub use tenant_settings::{
    ChangeCurrency, InitializeSettings, SettingsCommand, SettingsEvent, TenantSettings,
    TenantSettingsId, UpdateSettings,
};
