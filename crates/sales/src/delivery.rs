//! Delivery lifecycle for dispatched orders.
//!
//! `Scheduled → InTransit → Delivered | Failed`, with `Failed → InTransit`
//! on retry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockpile_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use stockpile_events::Event;

use crate::order::SalesOrderId;

/// Delivery identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryId(pub AggregateId);

impl DeliveryId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Delivery status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Scheduled,
    InTransit,
    Delivered,
    Failed,
}

/// Aggregate root: Delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    id: DeliveryId,
    tenant_id: Option<TenantId>,
    sales_order_id: Option<SalesOrderId>,
    address: String,
    status: DeliveryStatus,
    carrier: Option<String>,
    tracking_ref: Option<String>,
    attempts: u32,
    version: u64,
    created: bool,
}

impl Delivery {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: DeliveryId) -> Self {
        Self {
            id,
            tenant_id: None,
            sales_order_id: None,
            address: String::new(),
            status: DeliveryStatus::Scheduled,
            carrier: None,
            tracking_ref: None,
            attempts: 0,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> DeliveryId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn sales_order_id(&self) -> Option<SalesOrderId> {
        self.sales_order_id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn status(&self) -> DeliveryStatus {
        self.status
    }

    pub fn carrier(&self) -> Option<&str> {
        self.carrier.as_deref()
    }

    pub fn tracking_ref(&self) -> Option<&str> {
        self.tracking_ref.as_deref()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl AggregateRoot for Delivery {
    type Id = DeliveryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: ScheduleDelivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleDelivery {
    pub tenant_id: TenantId,
    pub delivery_id: DeliveryId,
    pub sales_order_id: SalesOrderId,
    pub address: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: StartDelivery (Scheduled → InTransit).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartDelivery {
    pub tenant_id: TenantId,
    pub delivery_id: DeliveryId,
    pub carrier: String,
    pub tracking_ref: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CompleteDelivery (InTransit → Delivered).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteDelivery {
    pub tenant_id: TenantId,
    pub delivery_id: DeliveryId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: FailDelivery (InTransit → Failed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailDelivery {
    pub tenant_id: TenantId,
    pub delivery_id: DeliveryId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RetryDelivery (Failed → InTransit).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryDelivery {
    pub tenant_id: TenantId,
    pub delivery_id: DeliveryId,
    pub carrier: String,
    pub tracking_ref: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryCommand {
    ScheduleDelivery(ScheduleDelivery),
    StartDelivery(StartDelivery),
    CompleteDelivery(CompleteDelivery),
    FailDelivery(FailDelivery),
    RetryDelivery(RetryDelivery),
}

/// Event: DeliveryScheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryScheduled {
    pub tenant_id: TenantId,
    pub delivery_id: DeliveryId,
    pub sales_order_id: SalesOrderId,
    pub address: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DeliveryStarted (also emitted on retry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStarted {
    pub tenant_id: TenantId,
    pub delivery_id: DeliveryId,
    pub carrier: String,
    pub tracking_ref: String,
    pub attempt: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DeliveryCompleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryCompleted {
    pub tenant_id: TenantId,
    pub delivery_id: DeliveryId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DeliveryFailed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryFailed {
    pub tenant_id: TenantId,
    pub delivery_id: DeliveryId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryEvent {
    DeliveryScheduled(DeliveryScheduled),
    DeliveryStarted(DeliveryStarted),
    DeliveryCompleted(DeliveryCompleted),
    DeliveryFailed(DeliveryFailed),
}

impl Event for DeliveryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DeliveryEvent::DeliveryScheduled(_) => "sales.delivery.scheduled",
            DeliveryEvent::DeliveryStarted(_) => "sales.delivery.started",
            DeliveryEvent::DeliveryCompleted(_) => "sales.delivery.completed",
            DeliveryEvent::DeliveryFailed(_) => "sales.delivery.failed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DeliveryEvent::DeliveryScheduled(e) => e.occurred_at,
            DeliveryEvent::DeliveryStarted(e) => e.occurred_at,
            DeliveryEvent::DeliveryCompleted(e) => e.occurred_at,
            DeliveryEvent::DeliveryFailed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Delivery {
    type Command = DeliveryCommand;
    type Event = DeliveryEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            DeliveryEvent::DeliveryScheduled(e) => {
                self.id = e.delivery_id;
                self.tenant_id = Some(e.tenant_id);
                self.sales_order_id = Some(e.sales_order_id);
                self.address = e.address.clone();
                self.status = DeliveryStatus::Scheduled;
                self.created = true;
            }
            DeliveryEvent::DeliveryStarted(e) => {
                self.status = DeliveryStatus::InTransit;
                self.carrier = Some(e.carrier.clone());
                self.tracking_ref = Some(e.tracking_ref.clone());
                self.attempts = e.attempt;
            }
            DeliveryEvent::DeliveryCompleted(_) => {
                self.status = DeliveryStatus::Delivered;
            }
            DeliveryEvent::DeliveryFailed(_) => {
                self.status = DeliveryStatus::Failed;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            DeliveryCommand::ScheduleDelivery(cmd) => self.handle_schedule(cmd),
            DeliveryCommand::StartDelivery(cmd) => {
                self.handle_start(cmd.tenant_id, &cmd.carrier, &cmd.tracking_ref, DeliveryStatus::Scheduled, cmd.occurred_at)
            }
            DeliveryCommand::CompleteDelivery(cmd) => self.handle_complete(cmd),
            DeliveryCommand::FailDelivery(cmd) => self.handle_fail(cmd),
            DeliveryCommand::RetryDelivery(cmd) => {
                self.handle_start(cmd.tenant_id, &cmd.carrier, &cmd.tracking_ref, DeliveryStatus::Failed, cmd.occurred_at)
            }
        }
    }
}

impl Delivery {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn handle_schedule(&self, cmd: &ScheduleDelivery) -> Result<Vec<DeliveryEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("delivery already scheduled"));
        }
        if cmd.address.trim().is_empty() {
            return Err(DomainError::validation("address cannot be empty"));
        }

        Ok(vec![DeliveryEvent::DeliveryScheduled(DeliveryScheduled {
            tenant_id: cmd.tenant_id,
            delivery_id: cmd.delivery_id,
            sales_order_id: cmd.sales_order_id,
            address: cmd.address.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_start(
        &self,
        tenant_id: TenantId,
        carrier: &str,
        tracking_ref: &str,
        expected_status: DeliveryStatus,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<DeliveryEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(tenant_id)?;

        if self.status != expected_status {
            return Err(DomainError::invariant(match expected_status {
                DeliveryStatus::Scheduled => "delivery can only start from scheduled",
                _ => "delivery can only be retried after a failure",
            }));
        }
        if carrier.trim().is_empty() {
            return Err(DomainError::validation("carrier cannot be empty"));
        }

        Ok(vec![DeliveryEvent::DeliveryStarted(DeliveryStarted {
            tenant_id,
            delivery_id: self.id,
            carrier: carrier.trim().to_string(),
            tracking_ref: tracking_ref.trim().to_string(),
            attempt: self.attempts + 1,
            occurred_at,
        })])
    }

    fn handle_complete(&self, cmd: &CompleteDelivery) -> Result<Vec<DeliveryEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;

        if self.status != DeliveryStatus::InTransit {
            return Err(DomainError::invariant(
                "only in-transit deliveries can complete",
            ));
        }

        Ok(vec![DeliveryEvent::DeliveryCompleted(DeliveryCompleted {
            tenant_id: cmd.tenant_id,
            delivery_id: cmd.delivery_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_fail(&self, cmd: &FailDelivery) -> Result<Vec<DeliveryEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;

        if self.status != DeliveryStatus::InTransit {
            return Err(DomainError::invariant(
                "only in-transit deliveries can fail",
            ));
        }
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("failure reason cannot be empty"));
        }

        Ok(vec![DeliveryEvent::DeliveryFailed(DeliveryFailed {
            tenant_id: cmd.tenant_id,
            delivery_id: cmd.delivery_id,
            reason: cmd.reason.trim().to_string(),
            occurred_at: cmd.occurred_at,
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

    fn scheduled_delivery(tenant_id: TenantId, delivery_id: DeliveryId) -> Delivery {
        let mut delivery = Delivery::empty(delivery_id);
        execute(
            &mut delivery,
            &DeliveryCommand::ScheduleDelivery(ScheduleDelivery {
                tenant_id,
                delivery_id,
                sales_order_id: SalesOrderId::new(AggregateId::new()),
                address: "1 Main St".to_string(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        delivery
    }

    #[test]
    fn fail_then_retry_increments_attempt() {
        let tenant_id = TenantId::new();
        let delivery_id = DeliveryId::new(AggregateId::new());
        let mut delivery = scheduled_delivery(tenant_id, delivery_id);

        execute(
            &mut delivery,
            &DeliveryCommand::StartDelivery(StartDelivery {
                tenant_id,
                delivery_id,
                carrier: "FastShip".to_string(),
                tracking_ref: "T-1".to_string(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(delivery.attempts(), 1);

        execute(
            &mut delivery,
            &DeliveryCommand::FailDelivery(FailDelivery {
                tenant_id,
                delivery_id,
                reason: "nobody home".to_string(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(delivery.status(), DeliveryStatus::Failed);

        execute(
            &mut delivery,
            &DeliveryCommand::RetryDelivery(RetryDelivery {
                tenant_id,
                delivery_id,
                carrier: "FastShip".to_string(),
                tracking_ref: "T-2".to_string(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(delivery.status(), DeliveryStatus::InTransit);
        assert_eq!(delivery.attempts(), 2);
        assert_eq!(delivery.tracking_ref(), Some("T-2"));
    }

    #[test]
    fn cannot_complete_before_start() {
        let tenant_id = TenantId::new();
        let delivery_id = DeliveryId::new(AggregateId::new());
        let delivery = scheduled_delivery(tenant_id, delivery_id);

        assert!(delivery
            .handle(&DeliveryCommand::CompleteDelivery(CompleteDelivery {
                tenant_id,
                delivery_id,
                occurred_at: test_time(),
            }))
            .is_err());
    }

    #[test]
    fn cannot_retry_scheduled_delivery() {
        let tenant_id = TenantId::new();
        let delivery_id = DeliveryId::new(AggregateId::new());
        let delivery = scheduled_delivery(tenant_id, delivery_id);

        assert!(delivery
            .handle(&DeliveryCommand::RetryDelivery(RetryDelivery {
                tenant_id,
                delivery_id,
                carrier: "FastShip".to_string(),
                tracking_ref: "T-9".to_string(),
                occurred_at: test_time(),
            }))
            .is_err());
    }

    #[test]
    fn delivered_is_terminal() {
        let tenant_id = TenantId::new();
        let delivery_id = DeliveryId::new(AggregateId::new());
        let mut delivery = scheduled_delivery(tenant_id, delivery_id);

        execute(
            &mut delivery,
            &DeliveryCommand::StartDelivery(StartDelivery {
                tenant_id,
                delivery_id,
                carrier: "FastShip".to_string(),
                tracking_ref: "T-1".to_string(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        execute(
            &mut delivery,
            &DeliveryCommand::CompleteDelivery(CompleteDelivery {
                tenant_id,
                delivery_id,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(delivery.status(), DeliveryStatus::Delivered);

        assert!(delivery
            .handle(&DeliveryCommand::FailDelivery(FailDelivery {
                tenant_id,
                delivery_id,
                reason: "late".to_string(),
                occurred_at: test_time(),
            }))
            .is_err());
    }
}
