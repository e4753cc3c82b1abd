//! Infrastructure layer: event store, event bus, command dispatch, read
//! models, projections, and alert runners.
//!
//! Everything here composes the domain crates through traits; no business
//! rules live in this crate.

pub mod alerts;
pub mod command_dispatcher;
pub mod event_bus;
pub mod event_store;
pub mod projections;
pub mod read_model;
