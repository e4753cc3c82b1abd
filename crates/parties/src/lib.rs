//! Parties domain module (event-sourced).
//!
//! Customers and suppliers share one aggregate shape; the `kind`
//! discriminator decides which side of trade they sit on.

pub mod party;

pub use party::{
    ContactInfo, Party, PartyCommand, PartyEvent, PartyId, PartyKind, PartyReactivated,
    PartyRegistered, PartyStatus, PartySuspended, PartyUpdated, ReactivateParty, RegisterParty,
    SuspendParty, UpdateDetails,
};
