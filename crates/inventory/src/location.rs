use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockpile_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use stockpile_events::Event;

/// Location identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationId(pub AggregateId);

impl LocationId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for LocationId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// What kind of stock-holding site this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationKind {
    Warehouse,
    Store,
}

/// Aggregate root: Location (warehouse or retail store).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    id: LocationId,
    tenant_id: Option<TenantId>,
    kind: LocationKind,
    name: String,
    closed: bool,
    version: u64,
    created: bool,
}

impl Location {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: LocationId) -> Self {
        Self {
            id,
            tenant_id: None,
            kind: LocationKind::Warehouse,
            name: String::new(),
            closed: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> LocationId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn kind(&self) -> LocationKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        self.created && !self.closed
    }
}

impl AggregateRoot for Location {
    type Id = LocationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateLocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateLocation {
    pub tenant_id: TenantId,
    pub location_id: LocationId,
    pub kind: LocationKind,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RenameLocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameLocation {
    pub tenant_id: TenantId,
    pub location_id: LocationId,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CloseLocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseLocation {
    pub tenant_id: TenantId,
    pub location_id: LocationId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocationCommand {
    CreateLocation(CreateLocation),
    RenameLocation(RenameLocation),
    CloseLocation(CloseLocation),
}

/// Event: LocationCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationCreated {
    pub tenant_id: TenantId,
    pub location_id: LocationId,
    pub kind: LocationKind,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LocationRenamed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationRenamed {
    pub tenant_id: TenantId,
    pub location_id: LocationId,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LocationClosed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationClosed {
    pub tenant_id: TenantId,
    pub location_id: LocationId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocationEvent {
    LocationCreated(LocationCreated),
    LocationRenamed(LocationRenamed),
    LocationClosed(LocationClosed),
}

impl Event for LocationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LocationEvent::LocationCreated(_) => "inventory.location.created",
            LocationEvent::LocationRenamed(_) => "inventory.location.renamed",
            LocationEvent::LocationClosed(_) => "inventory.location.closed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LocationEvent::LocationCreated(e) => e.occurred_at,
            LocationEvent::LocationRenamed(e) => e.occurred_at,
            LocationEvent::LocationClosed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Location {
    type Command = LocationCommand;
    type Event = LocationEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            LocationEvent::LocationCreated(e) => {
                self.id = e.location_id;
                self.tenant_id = Some(e.tenant_id);
                self.kind = e.kind;
                self.name = e.name.clone();
                self.closed = false;
                self.created = true;
            }
            LocationEvent::LocationRenamed(e) => {
                self.name = e.name.clone();
            }
            LocationEvent::LocationClosed(_) => {
                self.closed = true;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            LocationCommand::CreateLocation(cmd) => self.handle_create(cmd),
            LocationCommand::RenameLocation(cmd) => self.handle_rename(cmd),
            LocationCommand::CloseLocation(cmd) => self.handle_close(cmd),
        }
    }
}

impl Location {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateLocation) -> Result<Vec<LocationEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("location already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }

        Ok(vec![LocationEvent::LocationCreated(LocationCreated {
            tenant_id: cmd.tenant_id,
            location_id: cmd.location_id,
            kind: cmd.kind,
            name: cmd.name.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_rename(&self, cmd: &RenameLocation) -> Result<Vec<LocationEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;

        if self.closed {
            return Err(DomainError::invariant("cannot rename closed location"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }

        Ok(vec![LocationEvent::LocationRenamed(LocationRenamed {
            tenant_id: cmd.tenant_id,
            location_id: cmd.location_id,
            name: cmd.name.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_close(&self, cmd: &CloseLocation) -> Result<Vec<LocationEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;

        if self.closed {
            return Err(DomainError::invariant("location already closed"));
        }

        Ok(vec![LocationEvent::LocationClosed(LocationClosed {
            tenant_id: cmd.tenant_id,
            location_id: cmd.location_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn create_rename_close_lifecycle() {
        let tenant_id = TenantId::new();
        let location_id = LocationId::new(AggregateId::new());
        let mut location = Location::empty(location_id);

        let events = location
            .handle(&LocationCommand::CreateLocation(CreateLocation {
                tenant_id,
                location_id,
                kind: LocationKind::Store,
                name: "Main Street Store".to_string(),
                occurred_at: test_time(),
            }))
            .unwrap();
        location.apply(&events[0]);
        assert!(location.is_open());

        let events = location
            .handle(&LocationCommand::RenameLocation(RenameLocation {
                tenant_id,
                location_id,
                name: "Flagship Store".to_string(),
                occurred_at: test_time(),
            }))
            .unwrap();
        location.apply(&events[0]);
        assert_eq!(location.name(), "Flagship Store");

        let events = location
            .handle(&LocationCommand::CloseLocation(CloseLocation {
                tenant_id,
                location_id,
                occurred_at: test_time(),
            }))
            .unwrap();
        location.apply(&events[0]);
        assert!(!location.is_open());

        // Closed locations cannot be renamed or re-closed.
        assert!(location
            .handle(&LocationCommand::RenameLocation(RenameLocation {
                tenant_id,
                location_id,
                name: "Zombie Store".to_string(),
                occurred_at: test_time(),
            }))
            .is_err());
        assert!(location
            .handle(&LocationCommand::CloseLocation(CloseLocation {
                tenant_id,
                location_id,
                occurred_at: test_time(),
            }))
            .is_err());
    }
}
