use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockpile_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use stockpile_events::Event;

/// Party identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartyId(pub AggregateId);

impl PartyId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PartyId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Party kind: customer or supplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartyKind {
    Customer,
    Supplier,
}

/// Party status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartyStatus {
    Active,
    Suspended,
}

/// Contact information for a party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ContactInfo {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

/// Aggregate root: Party (customer or supplier).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Party {
    id: PartyId,
    tenant_id: Option<TenantId>,
    kind: PartyKind,
    name: String,
    contact: ContactInfo,
    status: PartyStatus,
    version: u64,
    created: bool,
}

impl Party {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: PartyId) -> Self {
        Self {
            id,
            tenant_id: None,
            kind: PartyKind::Customer,
            name: String::new(),
            contact: ContactInfo::default(),
            status: PartyStatus::Active,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PartyId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn kind(&self) -> PartyKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contact(&self) -> &ContactInfo {
        &self.contact
    }

    pub fn status(&self) -> PartyStatus {
        self.status
    }

    /// Invariant helper: whether this party is allowed to transact.
    ///
    /// Suspended parties cannot appear on new orders.
    pub fn can_transact(&self) -> bool {
        self.status == PartyStatus::Active
    }
}

impl AggregateRoot for Party {
    type Id = PartyId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterParty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterParty {
    pub tenant_id: TenantId,
    pub party_id: PartyId,
    pub kind: PartyKind,
    pub name: String,
    pub contact: Option<ContactInfo>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateDetails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDetails {
    pub tenant_id: TenantId,
    pub party_id: PartyId,
    /// Optional new name (if None, keep existing).
    pub name: Option<String>,
    /// Optional new contact info (if None, keep existing).
    pub contact: Option<ContactInfo>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SuspendParty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspendParty {
    pub tenant_id: TenantId,
    pub party_id: PartyId,
    /// Optional human-readable reason for suspension.
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReactivateParty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactivateParty {
    pub tenant_id: TenantId,
    pub party_id: PartyId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartyCommand {
    RegisterParty(RegisterParty),
    UpdateDetails(UpdateDetails),
    SuspendParty(SuspendParty),
    ReactivateParty(ReactivateParty),
}

/// Event: PartyRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyRegistered {
    pub tenant_id: TenantId,
    pub party_id: PartyId,
    pub kind: PartyKind,
    pub name: String,
    pub contact: ContactInfo,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PartyUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyUpdated {
    pub tenant_id: TenantId,
    pub party_id: PartyId,
    pub name: String,
    pub contact: ContactInfo,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PartySuspended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartySuspended {
    pub tenant_id: TenantId,
    pub party_id: PartyId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PartyReactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyReactivated {
    pub tenant_id: TenantId,
    pub party_id: PartyId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartyEvent {
    PartyRegistered(PartyRegistered),
    PartyUpdated(PartyUpdated),
    PartySuspended(PartySuspended),
    PartyReactivated(PartyReactivated),
}

impl Event for PartyEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PartyEvent::PartyRegistered(_) => "parties.party.registered",
            PartyEvent::PartyUpdated(_) => "parties.party.updated",
            PartyEvent::PartySuspended(_) => "parties.party.suspended",
            PartyEvent::PartyReactivated(_) => "parties.party.reactivated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PartyEvent::PartyRegistered(e) => e.occurred_at,
            PartyEvent::PartyUpdated(e) => e.occurred_at,
            PartyEvent::PartySuspended(e) => e.occurred_at,
            PartyEvent::PartyReactivated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Party {
    type Command = PartyCommand;
    type Event = PartyEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PartyEvent::PartyRegistered(e) => {
                self.id = e.party_id;
                self.tenant_id = Some(e.tenant_id);
                self.kind = e.kind;
                self.name = e.name.clone();
                self.contact = e.contact.clone();
                self.status = PartyStatus::Active;
                self.created = true;
            }
            PartyEvent::PartyUpdated(e) => {
                self.name = e.name.clone();
                self.contact = e.contact.clone();
            }
            PartyEvent::PartySuspended(_) => {
                self.status = PartyStatus::Suspended;
            }
            PartyEvent::PartyReactivated(_) => {
                self.status = PartyStatus::Active;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PartyCommand::RegisterParty(cmd) => self.handle_register(cmd),
            PartyCommand::UpdateDetails(cmd) => self.handle_update(cmd),
            PartyCommand::SuspendParty(cmd) => self.handle_suspend(cmd),
            PartyCommand::ReactivateParty(cmd) => self.handle_reactivate(cmd),
        }
    }
}

impl Party {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_party_id(&self, party_id: PartyId) -> Result<(), DomainError> {
        if self.id != party_id {
            return Err(DomainError::invariant("party_id mismatch"));
        }
        Ok(())
    }

    fn validate_contact(contact: &ContactInfo) -> Result<(), DomainError> {
        if let Some(email) = &contact.email {
            if !email.contains('@') {
                return Err(DomainError::validation("invalid contact email"));
            }
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterParty) -> Result<Vec<PartyEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("party already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        let contact = cmd.contact.clone().unwrap_or_default();
        Self::validate_contact(&contact)?;

        Ok(vec![PartyEvent::PartyRegistered(PartyRegistered {
            tenant_id: cmd.tenant_id,
            party_id: cmd.party_id,
            kind: cmd.kind,
            name: cmd.name.trim().to_string(),
            contact,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateDetails) -> Result<Vec<PartyEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_party_id(cmd.party_id)?;

        if cmd.name.is_none() && cmd.contact.is_none() {
            return Err(DomainError::validation("nothing to update"));
        }

        let name = match &cmd.name {
            Some(n) if n.trim().is_empty() => {
                return Err(DomainError::validation("name cannot be empty"));
            }
            Some(n) => n.trim().to_string(),
            None => self.name.clone(),
        };
        let contact = cmd.contact.clone().unwrap_or_else(|| self.contact.clone());
        Self::validate_contact(&contact)?;

        Ok(vec![PartyEvent::PartyUpdated(PartyUpdated {
            tenant_id: cmd.tenant_id,
            party_id: cmd.party_id,
            name,
            contact,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_suspend(&self, cmd: &SuspendParty) -> Result<Vec<PartyEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_party_id(cmd.party_id)?;

        if self.status == PartyStatus::Suspended {
            return Err(DomainError::invariant("party already suspended"));
        }

        Ok(vec![PartyEvent::PartySuspended(PartySuspended {
            tenant_id: cmd.tenant_id,
            party_id: cmd.party_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reactivate(&self, cmd: &ReactivateParty) -> Result<Vec<PartyEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_party_id(cmd.party_id)?;

        if self.status == PartyStatus::Active {
            return Err(DomainError::invariant("party already active"));
        }

        Ok(vec![PartyEvent::PartyReactivated(PartyReactivated {
            tenant_id: cmd.tenant_id,
            party_id: cmd.party_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    fn test_party_id() -> PartyId {
        PartyId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn registered(tenant_id: TenantId, party_id: PartyId, kind: PartyKind) -> Party {
        let mut party = Party::empty(party_id);
        let cmd = RegisterParty {
            tenant_id,
            party_id,
            kind,
            name: "Acme Wholesale".to_string(),
            contact: None,
            occurred_at: test_time(),
        };
        let events = party.handle(&PartyCommand::RegisterParty(cmd)).unwrap();
        party.apply(&events[0]);
        party
    }

    #[test]
    fn register_emits_party_registered() {
        let party = Party::empty(test_party_id());
        let tenant_id = test_tenant_id();
        let party_id = test_party_id();

        let cmd = RegisterParty {
            tenant_id,
            party_id,
            kind: PartyKind::Supplier,
            name: " Acme Wholesale ".to_string(),
            contact: Some(ContactInfo {
                email: Some("sales@acme.example".to_string()),
                phone: None,
                address: None,
            }),
            occurred_at: test_time(),
        };

        let events = party.handle(&PartyCommand::RegisterParty(cmd)).unwrap();
        match &events[0] {
            PartyEvent::PartyRegistered(e) => {
                assert_eq!(e.name, "Acme Wholesale");
                assert_eq!(e.kind, PartyKind::Supplier);
            }
            _ => panic!("Expected PartyRegistered event"),
        }
    }

    #[test]
    fn register_rejects_bad_contact_email() {
        let party = Party::empty(test_party_id());
        let cmd = RegisterParty {
            tenant_id: test_tenant_id(),
            party_id: test_party_id(),
            kind: PartyKind::Customer,
            name: "Jane".to_string(),
            contact: Some(ContactInfo {
                email: Some("no-at-sign".to_string()),
                phone: None,
                address: None,
            }),
            occurred_at: test_time(),
        };
        assert!(party.handle(&PartyCommand::RegisterParty(cmd)).is_err());
    }

    #[test]
    fn update_with_nothing_to_change_is_rejected() {
        let tenant_id = test_tenant_id();
        let party_id = test_party_id();
        let party = registered(tenant_id, party_id, PartyKind::Customer);

        let cmd = UpdateDetails {
            tenant_id,
            party_id,
            name: None,
            contact: None,
            occurred_at: test_time(),
        };
        assert!(party.handle(&PartyCommand::UpdateDetails(cmd)).is_err());
    }

    #[test]
    fn suspend_and_reactivate_round_trip() {
        let tenant_id = test_tenant_id();
        let party_id = test_party_id();
        let mut party = registered(tenant_id, party_id, PartyKind::Customer);
        assert!(party.can_transact());

        let events = party
            .handle(&PartyCommand::SuspendParty(SuspendParty {
                tenant_id,
                party_id,
                reason: Some("unpaid balance".to_string()),
                occurred_at: test_time(),
            }))
            .unwrap();
        party.apply(&events[0]);
        assert!(!party.can_transact());

        // Double suspend is an invariant violation.
        assert!(party
            .handle(&PartyCommand::SuspendParty(SuspendParty {
                tenant_id,
                party_id,
                reason: None,
                occurred_at: test_time(),
            }))
            .is_err());

        let events = party
            .handle(&PartyCommand::ReactivateParty(ReactivateParty {
                tenant_id,
                party_id,
                occurred_at: test_time(),
            }))
            .unwrap();
        party.apply(&events[0]);
        assert!(party.can_transact());
    }

    #[test]
    fn cross_tenant_update_is_rejected() {
        let tenant_id = test_tenant_id();
        let party_id = test_party_id();
        let party = registered(tenant_id, party_id, PartyKind::Supplier);

        let cmd = UpdateDetails {
            tenant_id: test_tenant_id(),
            party_id,
            name: Some("Evil Corp".to_string()),
            contact: None,
            occurred_at: test_time(),
        };
        let err = party.handle(&PartyCommand::UpdateDetails(cmd)).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }
}
