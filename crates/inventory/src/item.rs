//! Per-product stock buckets across locations.
//!
//! One `StockItem` stream per tracked product. Keeping every location of a
//! product in a single stream makes multi-location movements (transfers,
//! reservation commits) atomic under the event store's optimistic
//! concurrency check: either the whole movement commits or none of it does.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockpile_catalog::ProductId;
use stockpile_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use stockpile_events::Event;

use crate::location::LocationId;

/// Stock item identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StockItemId(pub AggregateId);

impl StockItemId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for StockItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Why stock was adjusted outside of receiving/selling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentReason {
    Recount,
    Damage,
    Loss,
    Correction,
    StockTake,
}

/// Stock counters for one location bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LocationStock {
    pub on_hand: i64,
    pub reserved: i64,
    pub reorder_point: i64,
}

impl LocationStock {
    /// Units that can still be promised to new orders.
    pub fn available(&self) -> i64 {
        self.on_hand - self.reserved
    }
}

/// A live reservation held for a sales order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub location_id: LocationId,
    pub quantity: i64,
}

/// Aggregate root: StockItem (all stock of one product, across locations).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockItem {
    id: StockItemId,
    tenant_id: Option<TenantId>,
    product_id: Option<ProductId>,
    buckets: HashMap<LocationId, LocationStock>,
    /// Live reservations, keyed by the sales order that holds them.
    reservations: HashMap<AggregateId, Reservation>,
    version: u64,
    created: bool,
}

impl StockItem {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: StockItemId) -> Self {
        Self {
            id,
            tenant_id: None,
            product_id: None,
            buckets: HashMap::new(),
            reservations: HashMap::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> StockItemId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn product_id(&self) -> Option<ProductId> {
        self.product_id
    }

    /// Counters for a location; unknown locations read as an empty bucket.
    pub fn bucket(&self, location_id: LocationId) -> LocationStock {
        self.buckets.get(&location_id).copied().unwrap_or_default()
    }

    pub fn reservation_for(&self, order_ref: AggregateId) -> Option<Reservation> {
        self.reservations.get(&order_ref).copied()
    }

    /// Total on-hand units across all locations.
    pub fn total_on_hand(&self) -> i64 {
        self.buckets.values().map(|b| b.on_hand).sum()
    }
}

impl AggregateRoot for StockItem {
    type Id = StockItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: TrackProduct (start keeping stock for a product).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackProduct {
    pub tenant_id: TenantId,
    pub item_id: StockItemId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReceiveStock (goods receipt lands units at a location).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveStock {
    pub tenant_id: TenantId,
    pub item_id: StockItemId,
    pub location_id: LocationId,
    pub quantity: i64,
    /// Human-readable reference (purchase order / receipt number).
    pub reference: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdjustStock (manual correction with a reason).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustStock {
    pub tenant_id: TenantId,
    pub item_id: StockItemId,
    pub location_id: LocationId,
    pub delta: i64,
    pub reason: AdjustmentReason,
    pub occurred_at: DateTime<Utc>,
}

/// Command: TransferStock (atomic move between two locations).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStock {
    pub tenant_id: TenantId,
    pub item_id: StockItemId,
    pub from: LocationId,
    pub to: LocationId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReserveStock (hold units for a sales order).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveStock {
    pub tenant_id: TenantId,
    pub item_id: StockItemId,
    pub location_id: LocationId,
    pub quantity: i64,
    pub order_ref: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReleaseReservation (order cancelled).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseReservation {
    pub tenant_id: TenantId,
    pub item_id: StockItemId,
    pub order_ref: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CommitReservation (order dispatched; units leave the building).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReservation {
    pub tenant_id: TenantId,
    pub item_id: StockItemId,
    pub order_ref: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetReorderPoint (low-stock threshold for a location).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetReorderPoint {
    pub tenant_id: TenantId,
    pub item_id: StockItemId,
    pub location_id: LocationId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockCommand {
    TrackProduct(TrackProduct),
    ReceiveStock(ReceiveStock),
    AdjustStock(AdjustStock),
    TransferStock(TransferStock),
    ReserveStock(ReserveStock),
    ReleaseReservation(ReleaseReservation),
    CommitReservation(CommitReservation),
    SetReorderPoint(SetReorderPoint),
}

/// Event: ProductTracked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductTracked {
    pub tenant_id: TenantId,
    pub item_id: StockItemId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReceived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReceived {
    pub tenant_id: TenantId,
    pub item_id: StockItemId,
    pub location_id: LocationId,
    pub quantity: i64,
    pub reference: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockAdjusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjusted {
    pub tenant_id: TenantId,
    pub item_id: StockItemId,
    pub location_id: LocationId,
    pub delta: i64,
    pub reason: AdjustmentReason,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockTransferred.
///
/// A single event moves units out of `from` and into `to`; there is no
/// intermediate state where the units exist in both places or neither.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTransferred {
    pub tenant_id: TenantId,
    pub item_id: StockItemId,
    pub from: LocationId,
    pub to: LocationId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReserved {
    pub tenant_id: TenantId,
    pub item_id: StockItemId,
    pub location_id: LocationId,
    pub quantity: i64,
    pub order_ref: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReservationReleased.
///
/// Carries the resolved location/quantity so consumers do not need to track
/// reservation state themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationReleased {
    pub tenant_id: TenantId,
    pub item_id: StockItemId,
    pub location_id: LocationId,
    pub quantity: i64,
    pub order_ref: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReservationCommitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationCommitted {
    pub tenant_id: TenantId,
    pub item_id: StockItemId,
    pub location_id: LocationId,
    pub quantity: i64,
    pub order_ref: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReorderPointSet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorderPointSet {
    pub tenant_id: TenantId,
    pub item_id: StockItemId,
    pub location_id: LocationId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockEvent {
    ProductTracked(ProductTracked),
    StockReceived(StockReceived),
    StockAdjusted(StockAdjusted),
    StockTransferred(StockTransferred),
    StockReserved(StockReserved),
    ReservationReleased(ReservationReleased),
    ReservationCommitted(ReservationCommitted),
    ReorderPointSet(ReorderPointSet),
}

impl Event for StockEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockEvent::ProductTracked(_) => "inventory.stock.product_tracked",
            StockEvent::StockReceived(_) => "inventory.stock.received",
            StockEvent::StockAdjusted(_) => "inventory.stock.adjusted",
            StockEvent::StockTransferred(_) => "inventory.stock.transferred",
            StockEvent::StockReserved(_) => "inventory.stock.reserved",
            StockEvent::ReservationReleased(_) => "inventory.stock.reservation_released",
            StockEvent::ReservationCommitted(_) => "inventory.stock.reservation_committed",
            StockEvent::ReorderPointSet(_) => "inventory.stock.reorder_point_set",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockEvent::ProductTracked(e) => e.occurred_at,
            StockEvent::StockReceived(e) => e.occurred_at,
            StockEvent::StockAdjusted(e) => e.occurred_at,
            StockEvent::StockTransferred(e) => e.occurred_at,
            StockEvent::StockReserved(e) => e.occurred_at,
            StockEvent::ReservationReleased(e) => e.occurred_at,
            StockEvent::ReservationCommitted(e) => e.occurred_at,
            StockEvent::ReorderPointSet(e) => e.occurred_at,
        }
    }
}

impl Aggregate for StockItem {
    type Command = StockCommand;
    type Event = StockEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            StockEvent::ProductTracked(e) => {
                self.id = e.item_id;
                self.tenant_id = Some(e.tenant_id);
                self.product_id = Some(e.product_id);
                self.buckets.clear();
                self.reservations.clear();
                self.created = true;
            }
            StockEvent::StockReceived(e) => {
                self.buckets.entry(e.location_id).or_default().on_hand += e.quantity;
            }
            StockEvent::StockAdjusted(e) => {
                self.buckets.entry(e.location_id).or_default().on_hand += e.delta;
            }
            StockEvent::StockTransferred(e) => {
                self.buckets.entry(e.from).or_default().on_hand -= e.quantity;
                self.buckets.entry(e.to).or_default().on_hand += e.quantity;
            }
            StockEvent::StockReserved(e) => {
                self.buckets.entry(e.location_id).or_default().reserved += e.quantity;
                self.reservations.insert(
                    e.order_ref,
                    Reservation {
                        location_id: e.location_id,
                        quantity: e.quantity,
                    },
                );
            }
            StockEvent::ReservationReleased(e) => {
                self.buckets.entry(e.location_id).or_default().reserved -= e.quantity;
                self.reservations.remove(&e.order_ref);
            }
            StockEvent::ReservationCommitted(e) => {
                let bucket = self.buckets.entry(e.location_id).or_default();
                bucket.on_hand -= e.quantity;
                bucket.reserved -= e.quantity;
                self.reservations.remove(&e.order_ref);
            }
            StockEvent::ReorderPointSet(e) => {
                self.buckets.entry(e.location_id).or_default().reorder_point = e.quantity;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            StockCommand::TrackProduct(cmd) => self.handle_track(cmd),
            StockCommand::ReceiveStock(cmd) => self.handle_receive(cmd),
            StockCommand::AdjustStock(cmd) => self.handle_adjust(cmd),
            StockCommand::TransferStock(cmd) => self.handle_transfer(cmd),
            StockCommand::ReserveStock(cmd) => self.handle_reserve(cmd),
            StockCommand::ReleaseReservation(cmd) => self.handle_release(cmd),
            StockCommand::CommitReservation(cmd) => self.handle_commit(cmd),
            StockCommand::SetReorderPoint(cmd) => self.handle_set_reorder_point(cmd),
        }
    }
}

impl StockItem {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_item_id(&self, item_id: StockItemId) -> Result<(), DomainError> {
        if self.id != item_id {
            return Err(DomainError::invariant("item_id mismatch"));
        }
        Ok(())
    }

    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn handle_track(&self, cmd: &TrackProduct) -> Result<Vec<StockEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("product already tracked"));
        }

        Ok(vec![StockEvent::ProductTracked(ProductTracked {
            tenant_id: cmd.tenant_id,
            item_id: cmd.item_id,
            product_id: cmd.product_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_receive(&self, cmd: &ReceiveStock) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_item_id(cmd.item_id)?;

        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }

        Ok(vec![StockEvent::StockReceived(StockReceived {
            tenant_id: cmd.tenant_id,
            item_id: cmd.item_id,
            location_id: cmd.location_id,
            quantity: cmd.quantity,
            reference: cmd.reference.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_adjust(&self, cmd: &AdjustStock) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_item_id(cmd.item_id)?;

        if cmd.delta == 0 {
            return Err(DomainError::validation("delta cannot be zero"));
        }

        let bucket = self.bucket(cmd.location_id);
        let new_on_hand = bucket.on_hand + cmd.delta;
        if new_on_hand < 0 {
            return Err(DomainError::invariant("stock cannot go negative"));
        }
        if new_on_hand < bucket.reserved {
            return Err(DomainError::invariant(
                "adjustment would drop stock below reserved quantity",
            ));
        }

        Ok(vec![StockEvent::StockAdjusted(StockAdjusted {
            tenant_id: cmd.tenant_id,
            item_id: cmd.item_id,
            location_id: cmd.location_id,
            delta: cmd.delta,
            reason: cmd.reason,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_transfer(&self, cmd: &TransferStock) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_item_id(cmd.item_id)?;

        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if cmd.from == cmd.to {
            return Err(DomainError::validation(
                "transfer source and destination must differ",
            ));
        }

        // Reserved units stay pinned to their location: only available
        // stock may leave.
        if self.bucket(cmd.from).available() < cmd.quantity {
            return Err(DomainError::invariant(
                "insufficient available stock at source location",
            ));
        }

        Ok(vec![StockEvent::StockTransferred(StockTransferred {
            tenant_id: cmd.tenant_id,
            item_id: cmd.item_id,
            from: cmd.from,
            to: cmd.to,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reserve(&self, cmd: &ReserveStock) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_item_id(cmd.item_id)?;

        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if self.reservations.contains_key(&cmd.order_ref) {
            return Err(DomainError::conflict(
                "order already holds a reservation for this product",
            ));
        }
        if self.bucket(cmd.location_id).available() < cmd.quantity {
            return Err(DomainError::invariant("insufficient available stock"));
        }

        Ok(vec![StockEvent::StockReserved(StockReserved {
            tenant_id: cmd.tenant_id,
            item_id: cmd.item_id,
            location_id: cmd.location_id,
            quantity: cmd.quantity,
            order_ref: cmd.order_ref,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_release(&self, cmd: &ReleaseReservation) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_item_id(cmd.item_id)?;

        let Some(res) = self.reservation_for(cmd.order_ref) else {
            return Err(DomainError::not_found());
        };

        Ok(vec![StockEvent::ReservationReleased(ReservationReleased {
            tenant_id: cmd.tenant_id,
            item_id: cmd.item_id,
            location_id: res.location_id,
            quantity: res.quantity,
            order_ref: cmd.order_ref,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_commit(&self, cmd: &CommitReservation) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_item_id(cmd.item_id)?;

        let Some(res) = self.reservation_for(cmd.order_ref) else {
            return Err(DomainError::not_found());
        };

        Ok(vec![StockEvent::ReservationCommitted(ReservationCommitted {
            tenant_id: cmd.tenant_id,
            item_id: cmd.item_id,
            location_id: res.location_id,
            quantity: res.quantity,
            order_ref: cmd.order_ref,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_reorder_point(
        &self,
        cmd: &SetReorderPoint,
    ) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_item_id(cmd.item_id)?;

        if cmd.quantity < 0 {
            return Err(DomainError::validation("reorder point cannot be negative"));
        }

        Ok(vec![StockEvent::ReorderPointSet(ReorderPointSet {
            tenant_id: cmd.tenant_id,
            item_id: cmd.item_id,
            location_id: cmd.location_id,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use stockpile_events::execute;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    fn test_item_id() -> StockItemId {
        StockItemId::new(AggregateId::new())
    }

    fn test_location_id() -> LocationId {
        LocationId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn tracked_item(tenant_id: TenantId, item_id: StockItemId) -> StockItem {
        let mut item = StockItem::empty(item_id);
        execute(
            &mut item,
            &StockCommand::TrackProduct(TrackProduct {
                tenant_id,
                item_id,
                product_id: ProductId::new(AggregateId::new()),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        item
    }

    fn receive(item: &mut StockItem, location_id: LocationId, quantity: i64) {
        let tenant_id = item.tenant_id().unwrap();
        let item_id = item.id_typed();
        execute(
            item,
            &StockCommand::ReceiveStock(ReceiveStock {
                tenant_id,
                item_id,
                location_id,
                quantity,
                reference: "PO-1".to_string(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
    }

    #[test]
    fn receive_increases_on_hand() {
        let tenant_id = test_tenant_id();
        let item_id = test_item_id();
        let location = test_location_id();
        let mut item = tracked_item(tenant_id, item_id);

        receive(&mut item, location, 25);
        assert_eq!(item.bucket(location).on_hand, 25);
        assert_eq!(item.bucket(location).available(), 25);
    }

    #[test]
    fn adjust_cannot_go_below_reserved() {
        let tenant_id = test_tenant_id();
        let item_id = test_item_id();
        let location = test_location_id();
        let mut item = tracked_item(tenant_id, item_id);
        receive(&mut item, location, 10);

        execute(
            &mut item,
            &StockCommand::ReserveStock(ReserveStock {
                tenant_id,
                item_id,
                location_id: location,
                quantity: 6,
                order_ref: AggregateId::new(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        // 10 on hand, 6 reserved: removing 5 would leave 5 < 6 reserved.
        let err = item
            .handle(&StockCommand::AdjustStock(AdjustStock {
                tenant_id,
                item_id,
                location_id: location,
                delta: -5,
                reason: AdjustmentReason::Damage,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));

        // Removing 4 is fine (leaves exactly the reserved quantity).
        assert!(item
            .handle(&StockCommand::AdjustStock(AdjustStock {
                tenant_id,
                item_id,
                location_id: location,
                delta: -4,
                reason: AdjustmentReason::Damage,
                occurred_at: test_time(),
            }))
            .is_ok());
    }

    #[test]
    fn transfer_moves_units_atomically() {
        let tenant_id = test_tenant_id();
        let item_id = test_item_id();
        let warehouse = test_location_id();
        let store = test_location_id();
        let mut item = tracked_item(tenant_id, item_id);
        receive(&mut item, warehouse, 40);

        let events = execute(
            &mut item,
            &StockCommand::TransferStock(TransferStock {
                tenant_id,
                item_id,
                from: warehouse,
                to: store,
                quantity: 15,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(events.len(), 1);

        assert_eq!(item.bucket(warehouse).on_hand, 25);
        assert_eq!(item.bucket(store).on_hand, 15);
        assert_eq!(item.total_on_hand(), 40);
    }

    #[test]
    fn transfer_cannot_take_reserved_units() {
        let tenant_id = test_tenant_id();
        let item_id = test_item_id();
        let warehouse = test_location_id();
        let store = test_location_id();
        let mut item = tracked_item(tenant_id, item_id);
        receive(&mut item, warehouse, 10);

        execute(
            &mut item,
            &StockCommand::ReserveStock(ReserveStock {
                tenant_id,
                item_id,
                location_id: warehouse,
                quantity: 8,
                order_ref: AggregateId::new(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        let err = item
            .handle(&StockCommand::TransferStock(TransferStock {
                tenant_id,
                item_id,
                from: warehouse,
                to: store,
                quantity: 3,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn transfer_to_same_location_is_rejected() {
        let tenant_id = test_tenant_id();
        let item_id = test_item_id();
        let location = test_location_id();
        let mut item = tracked_item(tenant_id, item_id);
        receive(&mut item, location, 10);

        let err = item
            .handle(&StockCommand::TransferStock(TransferStock {
                tenant_id,
                item_id,
                from: location,
                to: location,
                quantity: 1,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn reserve_release_commit_lifecycle() {
        let tenant_id = test_tenant_id();
        let item_id = test_item_id();
        let location = test_location_id();
        let order = AggregateId::new();
        let mut item = tracked_item(tenant_id, item_id);
        receive(&mut item, location, 20);

        execute(
            &mut item,
            &StockCommand::ReserveStock(ReserveStock {
                tenant_id,
                item_id,
                location_id: location,
                quantity: 5,
                order_ref: order,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(item.bucket(location).available(), 15);
        assert_eq!(item.bucket(location).on_hand, 20);

        // The same order cannot double-reserve.
        assert!(matches!(
            item.handle(&StockCommand::ReserveStock(ReserveStock {
                tenant_id,
                item_id,
                location_id: location,
                quantity: 1,
                order_ref: order,
                occurred_at: test_time(),
            })),
            Err(DomainError::Conflict(_))
        ));

        execute(
            &mut item,
            &StockCommand::CommitReservation(CommitReservation {
                tenant_id,
                item_id,
                order_ref: order,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(item.bucket(location).on_hand, 15);
        assert_eq!(item.bucket(location).reserved, 0);
        assert!(item.reservation_for(order).is_none());

        // Nothing left to release.
        assert!(matches!(
            item.handle(&StockCommand::ReleaseReservation(ReleaseReservation {
                tenant_id,
                item_id,
                order_ref: order,
                occurred_at: test_time(),
            })),
            Err(DomainError::NotFound)
        ));
    }

    #[test]
    fn release_returns_units_to_available() {
        let tenant_id = test_tenant_id();
        let item_id = test_item_id();
        let location = test_location_id();
        let order = AggregateId::new();
        let mut item = tracked_item(tenant_id, item_id);
        receive(&mut item, location, 8);

        execute(
            &mut item,
            &StockCommand::ReserveStock(ReserveStock {
                tenant_id,
                item_id,
                location_id: location,
                quantity: 8,
                order_ref: order,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(item.bucket(location).available(), 0);

        execute(
            &mut item,
            &StockCommand::ReleaseReservation(ReleaseReservation {
                tenant_id,
                item_id,
                order_ref: order,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(item.bucket(location).available(), 8);
        assert_eq!(item.bucket(location).on_hand, 8);
    }

    #[test]
    fn over_reservation_is_rejected() {
        let tenant_id = test_tenant_id();
        let item_id = test_item_id();
        let location = test_location_id();
        let mut item = tracked_item(tenant_id, item_id);
        receive(&mut item, location, 3);

        let err = item
            .handle(&StockCommand::ReserveStock(ReserveStock {
                tenant_id,
                item_id,
                location_id: location,
                quantity: 4,
                order_ref: AggregateId::new(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let tenant_id = test_tenant_id();
        let item_id = test_item_id();
        let location = test_location_id();
        let mut item = tracked_item(tenant_id, item_id);
        receive(&mut item, location, 10);

        let before = item.clone();
        let cmd = StockCommand::ReserveStock(ReserveStock {
            tenant_id,
            item_id,
            location_id: location,
            quantity: 2,
            order_ref: AggregateId::new(),
            occurred_at: test_time(),
        });
        let events1 = item.handle(&cmd).unwrap();
        let events2 = item.handle(&cmd).unwrap();

        assert_eq!(item, before);
        assert_eq!(events1, events2);
    }

    proptest! {
        /// Random interleavings of accepted commands never drive any bucket
        /// negative, and never leave reserved above on-hand.
        #[test]
        fn accepted_commands_preserve_stock_invariants(ops in proptest::collection::vec(0u8..5, 1..60)) {
            let tenant_id = test_tenant_id();
            let item_id = test_item_id();
            let loc_a = test_location_id();
            let loc_b = test_location_id();
            let mut item = tracked_item(tenant_id, item_id);
            let mut live_orders: Vec<AggregateId> = Vec::new();

            for op in ops {
                let cmd = match op {
                    0 => StockCommand::ReceiveStock(ReceiveStock {
                        tenant_id, item_id, location_id: loc_a, quantity: 7,
                        reference: "PO".to_string(), occurred_at: test_time(),
                    }),
                    1 => StockCommand::AdjustStock(AdjustStock {
                        tenant_id, item_id, location_id: loc_a, delta: -3,
                        reason: AdjustmentReason::Loss, occurred_at: test_time(),
                    }),
                    2 => StockCommand::TransferStock(TransferStock {
                        tenant_id, item_id, from: loc_a, to: loc_b, quantity: 4,
                        occurred_at: test_time(),
                    }),
                    3 => {
                        let order_ref = AggregateId::new();
                        live_orders.push(order_ref);
                        StockCommand::ReserveStock(ReserveStock {
                            tenant_id, item_id, location_id: loc_a, quantity: 2,
                            order_ref, occurred_at: test_time(),
                        })
                    }
                    _ => match live_orders.pop() {
                        Some(order_ref) => StockCommand::CommitReservation(CommitReservation {
                            tenant_id, item_id, order_ref, occurred_at: test_time(),
                        }),
                        None => continue,
                    },
                };

                // Rejected commands are fine; accepted ones must keep invariants.
                let _ = execute(&mut item, &cmd);

                for loc in [loc_a, loc_b] {
                    let bucket = item.bucket(loc);
                    prop_assert!(bucket.on_hand >= 0);
                    prop_assert!(bucket.reserved >= 0);
                    prop_assert!(bucket.on_hand >= bucket.reserved);
                }
            }
        }
    }
}
