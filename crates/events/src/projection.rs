use crate::{Event, EventEnvelope};

/// A projection builds a read model from an append-only event stream.
///
/// Projections implement the CQRS read-model pattern: events (write model)
/// are folded into queryable state (read model). Read models are
/// **disposable**: they can be deleted and rebuilt from events at any
/// time; events are the source of truth.
///
/// Implementations must be **idempotent**: applying the same event more
/// than once must produce the same result (at-least-once delivery, crash
/// recovery, replays). Common strategies are per-stream sequence cursors
/// and naturally idempotent upserts.
///
/// Persistence is out of scope here; a projection may keep its state in a
/// HashMap (tests), Postgres tables (production), or anything else.
pub trait Projection {
    type Ev: Event;

    /// Apply a single event to the projection, updating the read model.
    ///
    /// The envelope carries `tenant_id`; implementations must scope every
    /// update to that tenant to prevent cross-tenant leaks.
    fn apply(&mut self, envelope: &EventEnvelope<Self::Ev>);
}
