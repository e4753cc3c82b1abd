//! `stockpile-events` — domain event contracts and pub/sub mechanics.
//!
//! Everything here is transport-agnostic: the `Event` trait and
//! `EventEnvelope` describe facts, `EventBus` distributes them, and
//! `Projection` consumes them into read models.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;
pub mod projection;
pub mod tenant;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use projection::Projection;
pub use tenant::TenantScoped;
