//! Serial-number lifecycle (event-sourced state machine).
//!
//! Each serialized unit walks a fixed transition table:
//!
//! ```text
//! Received → InStock → Reserved → Sold → Returned → InStock
//!               │                            │
//!               └────────→ Scrapped ←────────┘
//! ```
//!
//! `Reserved` can fall back to `InStock` when the holding order is
//! cancelled. Any move outside the table is an invariant violation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockpile_catalog::ProductId;
use stockpile_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use stockpile_events::Event;

use crate::location::LocationId;

/// Serial unit identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SerialUnitId(pub AggregateId);

impl SerialUnitId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for SerialUnitId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Lifecycle state of a serialized unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialState {
    Received,
    InStock,
    Reserved,
    Sold,
    Returned,
    Scrapped,
}

impl SerialState {
    /// The full transition table, in one place.
    pub fn can_move_to(self, next: SerialState) -> bool {
        use SerialState::*;
        matches!(
            (self, next),
            (Received, InStock)
                | (InStock, Reserved)
                | (InStock, Scrapped)
                | (Reserved, InStock)
                | (Reserved, Sold)
                | (Sold, Returned)
                | (Returned, InStock)
                | (Returned, Scrapped)
        )
    }
}

impl core::fmt::Display for SerialState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            SerialState::Received => "received",
            SerialState::InStock => "in_stock",
            SerialState::Reserved => "reserved",
            SerialState::Sold => "sold",
            SerialState::Returned => "returned",
            SerialState::Scrapped => "scrapped",
        };
        f.write_str(s)
    }
}

/// Aggregate root: SerialUnit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialUnit {
    id: SerialUnitId,
    tenant_id: Option<TenantId>,
    serial_no: String,
    product_id: Option<ProductId>,
    location_id: Option<LocationId>,
    state: SerialState,
    /// Sales order currently holding this unit (while Reserved/Sold).
    order_ref: Option<AggregateId>,
    version: u64,
    created: bool,
}

impl SerialUnit {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: SerialUnitId) -> Self {
        Self {
            id,
            tenant_id: None,
            serial_no: String::new(),
            product_id: None,
            location_id: None,
            state: SerialState::Received,
            order_ref: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> SerialUnitId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn serial_no(&self) -> &str {
        &self.serial_no
    }

    pub fn product_id(&self) -> Option<ProductId> {
        self.product_id
    }

    pub fn state(&self) -> SerialState {
        self.state
    }

    pub fn order_ref(&self) -> Option<AggregateId> {
        self.order_ref
    }
}

impl AggregateRoot for SerialUnit {
    type Id = SerialUnitId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterSerial (unit arrives with a goods receipt).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterSerial {
    pub tenant_id: TenantId,
    pub unit_id: SerialUnitId,
    pub serial_no: String,
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: PutInStock (inspection passed, sellable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutInStock {
    pub tenant_id: TenantId,
    pub unit_id: SerialUnitId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReserveSerial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveSerial {
    pub tenant_id: TenantId,
    pub unit_id: SerialUnitId,
    pub order_ref: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkSold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkSold {
    pub tenant_id: TenantId,
    pub unit_id: SerialUnitId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AcceptReturn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptReturn {
    pub tenant_id: TenantId,
    pub unit_id: SerialUnitId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RestockSerial (returned unit back to stock, or cancelled
/// reservation back to stock).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestockSerial {
    pub tenant_id: TenantId,
    pub unit_id: SerialUnitId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ScrapSerial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapSerial {
    pub tenant_id: TenantId,
    pub unit_id: SerialUnitId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SerialCommand {
    RegisterSerial(RegisterSerial),
    PutInStock(PutInStock),
    ReserveSerial(ReserveSerial),
    MarkSold(MarkSold),
    AcceptReturn(AcceptReturn),
    RestockSerial(RestockSerial),
    ScrapSerial(ScrapSerial),
}

/// Event: SerialRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialRegistered {
    pub tenant_id: TenantId,
    pub unit_id: SerialUnitId,
    pub serial_no: String,
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SerialStateChanged.
///
/// All moves after registration share one event shape; `from`/`to` record
/// the transition taken, `order_ref` is set while an order holds the unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialStateChanged {
    pub tenant_id: TenantId,
    pub unit_id: SerialUnitId,
    pub from: SerialState,
    pub to: SerialState,
    pub order_ref: Option<AggregateId>,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SerialEvent {
    SerialRegistered(SerialRegistered),
    SerialStateChanged(SerialStateChanged),
}

impl Event for SerialEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SerialEvent::SerialRegistered(_) => "inventory.serial.registered",
            SerialEvent::SerialStateChanged(_) => "inventory.serial.state_changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SerialEvent::SerialRegistered(e) => e.occurred_at,
            SerialEvent::SerialStateChanged(e) => e.occurred_at,
        }
    }
}

impl Aggregate for SerialUnit {
    type Command = SerialCommand;
    type Event = SerialEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SerialEvent::SerialRegistered(e) => {
                self.id = e.unit_id;
                self.tenant_id = Some(e.tenant_id);
                self.serial_no = e.serial_no.clone();
                self.product_id = Some(e.product_id);
                self.location_id = Some(e.location_id);
                self.state = SerialState::Received;
                self.order_ref = None;
                self.created = true;
            }
            SerialEvent::SerialStateChanged(e) => {
                self.state = e.to;
                self.order_ref = e.order_ref;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SerialCommand::RegisterSerial(cmd) => self.handle_register(cmd),
            SerialCommand::PutInStock(cmd) => {
                self.transition(cmd.tenant_id, SerialState::InStock, None, None, cmd.occurred_at)
            }
            SerialCommand::ReserveSerial(cmd) => self.transition(
                cmd.tenant_id,
                SerialState::Reserved,
                Some(cmd.order_ref),
                None,
                cmd.occurred_at,
            ),
            SerialCommand::MarkSold(cmd) => self.transition(
                cmd.tenant_id,
                SerialState::Sold,
                self.order_ref,
                None,
                cmd.occurred_at,
            ),
            SerialCommand::AcceptReturn(cmd) => {
                self.transition(cmd.tenant_id, SerialState::Returned, None, None, cmd.occurred_at)
            }
            SerialCommand::RestockSerial(cmd) => {
                self.transition(cmd.tenant_id, SerialState::InStock, None, None, cmd.occurred_at)
            }
            SerialCommand::ScrapSerial(cmd) => self.transition(
                cmd.tenant_id,
                SerialState::Scrapped,
                None,
                Some(cmd.reason.clone()),
                cmd.occurred_at,
            ),
        }
    }
}

impl SerialUnit {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterSerial) -> Result<Vec<SerialEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("serial unit already registered"));
        }
        if cmd.serial_no.trim().is_empty() {
            return Err(DomainError::validation("serial number cannot be empty"));
        }

        Ok(vec![SerialEvent::SerialRegistered(SerialRegistered {
            tenant_id: cmd.tenant_id,
            unit_id: cmd.unit_id,
            serial_no: cmd.serial_no.trim().to_string(),
            product_id: cmd.product_id,
            location_id: cmd.location_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn transition(
        &self,
        tenant_id: TenantId,
        to: SerialState,
        order_ref: Option<AggregateId>,
        reason: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<SerialEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(tenant_id)?;

        if !self.state.can_move_to(to) {
            return Err(DomainError::invariant(format!(
                "serial unit cannot move from {} to {}",
                self.state, to
            )));
        }

        Ok(vec![SerialEvent::SerialStateChanged(SerialStateChanged {
            tenant_id,
            unit_id: self.id,
            from: self.state,
            to,
            order_ref,
            reason,
            occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockpile_events::execute;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn registered_unit(tenant_id: TenantId, unit_id: SerialUnitId) -> SerialUnit {
        let mut unit = SerialUnit::empty(unit_id);
        execute(
            &mut unit,
            &SerialCommand::RegisterSerial(RegisterSerial {
                tenant_id,
                unit_id,
                serial_no: "SN-0001".to_string(),
                product_id: ProductId::new(AggregateId::new()),
                location_id: LocationId::new(AggregateId::new()),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        unit
    }

    #[test]
    fn transition_table_is_exactly_the_spec() {
        use SerialState::*;
        let allowed = [
            (Received, InStock),
            (InStock, Reserved),
            (InStock, Scrapped),
            (Reserved, InStock),
            (Reserved, Sold),
            (Sold, Returned),
            (Returned, InStock),
            (Returned, Scrapped),
        ];
        let all = [Received, InStock, Reserved, Sold, Returned, Scrapped];

        for from in all {
            for to in all {
                let expected = allowed.contains(&(from, to));
                assert_eq!(
                    from.can_move_to(to),
                    expected,
                    "transition {from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn full_happy_path_received_to_returned_to_stock() {
        let tenant_id = TenantId::new();
        let unit_id = SerialUnitId::new(AggregateId::new());
        let mut unit = registered_unit(tenant_id, unit_id);
        let order = AggregateId::new();

        let cmds = [
            SerialCommand::PutInStock(PutInStock {
                tenant_id,
                unit_id,
                occurred_at: test_time(),
            }),
            SerialCommand::ReserveSerial(ReserveSerial {
                tenant_id,
                unit_id,
                order_ref: order,
                occurred_at: test_time(),
            }),
            SerialCommand::MarkSold(MarkSold {
                tenant_id,
                unit_id,
                occurred_at: test_time(),
            }),
            SerialCommand::AcceptReturn(AcceptReturn {
                tenant_id,
                unit_id,
                occurred_at: test_time(),
            }),
            SerialCommand::RestockSerial(RestockSerial {
                tenant_id,
                unit_id,
                occurred_at: test_time(),
            }),
        ];
        for cmd in cmds {
            execute(&mut unit, &cmd).unwrap();
        }
        assert_eq!(unit.state(), SerialState::InStock);
        assert_eq!(unit.order_ref(), None);
    }

    #[test]
    fn sold_retains_holding_order() {
        let tenant_id = TenantId::new();
        let unit_id = SerialUnitId::new(AggregateId::new());
        let mut unit = registered_unit(tenant_id, unit_id);
        let order = AggregateId::new();

        execute(
            &mut unit,
            &SerialCommand::PutInStock(PutInStock {
                tenant_id,
                unit_id,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        execute(
            &mut unit,
            &SerialCommand::ReserveSerial(ReserveSerial {
                tenant_id,
                unit_id,
                order_ref: order,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        execute(
            &mut unit,
            &SerialCommand::MarkSold(MarkSold {
                tenant_id,
                unit_id,
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        assert_eq!(unit.state(), SerialState::Sold);
        assert_eq!(unit.order_ref(), Some(order));
    }

    #[test]
    fn cannot_sell_unreserved_unit() {
        let tenant_id = TenantId::new();
        let unit_id = SerialUnitId::new(AggregateId::new());
        let mut unit = registered_unit(tenant_id, unit_id);

        execute(
            &mut unit,
            &SerialCommand::PutInStock(PutInStock {
                tenant_id,
                unit_id,
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        let err = unit
            .handle(&SerialCommand::MarkSold(MarkSold {
                tenant_id,
                unit_id,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn scrapped_is_terminal() {
        let tenant_id = TenantId::new();
        let unit_id = SerialUnitId::new(AggregateId::new());
        let mut unit = registered_unit(tenant_id, unit_id);

        execute(
            &mut unit,
            &SerialCommand::PutInStock(PutInStock {
                tenant_id,
                unit_id,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        execute(
            &mut unit,
            &SerialCommand::ScrapSerial(ScrapSerial {
                tenant_id,
                unit_id,
                reason: "water damage".to_string(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(unit.state(), SerialState::Scrapped);

        assert!(unit
            .handle(&SerialCommand::RestockSerial(RestockSerial {
                tenant_id,
                unit_id,
                occurred_at: test_time(),
            }))
            .is_err());
    }
}
