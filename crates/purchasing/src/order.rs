use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockpile_catalog::ProductId;
use stockpile_core::{Aggregate, AggregateId, AggregateRoot, DomainError, Money, TenantId};
use stockpile_events::Event;
use stockpile_inventory::LocationId;
use stockpile_parties::PartyId;

/// Purchase order identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurchaseOrderId(pub AggregateId);

impl PurchaseOrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PurchaseOrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Purchase order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseOrderStatus {
    Draft,
    Submitted,
    Approved,
    PartiallyReceived,
    Received,
    Cancelled,
}

/// Purchase order line with receipt tracking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub line_no: u32,
    pub product_id: ProductId,
    pub quantity: i64,
    /// Cost per unit in minor units.
    pub unit_cost: Money,
    /// Units received so far across all receipts.
    pub received: i64,
}

impl OrderLine {
    pub fn outstanding(&self) -> i64 {
        self.quantity - self.received
    }
}

/// One line of a goods receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub line_no: u32,
    pub quantity: i64,
}

/// Aggregate root: PurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseOrder {
    id: PurchaseOrderId,
    tenant_id: Option<TenantId>,
    supplier_id: Option<PartyId>,
    /// Where received goods land.
    location_id: Option<LocationId>,
    status: PurchaseOrderStatus,
    lines: Vec<OrderLine>,
    version: u64,
    created: bool,
}

impl PurchaseOrder {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: PurchaseOrderId) -> Self {
        Self {
            id,
            tenant_id: None,
            supplier_id: None,
            location_id: None,
            status: PurchaseOrderStatus::Draft,
            lines: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PurchaseOrderId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn supplier_id(&self) -> Option<PartyId> {
        self.supplier_id
    }

    pub fn location_id(&self) -> Option<LocationId> {
        self.location_id
    }

    pub fn status(&self) -> PurchaseOrderStatus {
        self.status
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn is_fully_received(&self) -> bool {
        !self.lines.is_empty() && self.lines.iter().all(|l| l.outstanding() == 0)
    }

    fn can_receive(&self) -> bool {
        matches!(
            self.status,
            PurchaseOrderStatus::Approved | PurchaseOrderStatus::PartiallyReceived
        )
    }
}

impl AggregateRoot for PurchaseOrder {
    type Id = PurchaseOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreatePurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePurchaseOrder {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub supplier_id: PartyId,
    pub location_id: LocationId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddLine (only allowed in Draft).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLine {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_cost: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SubmitOrder (Draft → Submitted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOrder {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApproveOrder (Submitted → Approved).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveOrder {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordGoodsReceipt (Approved/PartiallyReceived).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordGoodsReceipt {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub lines: Vec<ReceiptLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelOrder (Draft/Submitted only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrder {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderCommand {
    CreatePurchaseOrder(CreatePurchaseOrder),
    AddLine(AddLine),
    SubmitOrder(SubmitOrder),
    ApproveOrder(ApproveOrder),
    RecordGoodsReceipt(RecordGoodsReceipt),
    CancelOrder(CancelOrder),
}

/// Event: PurchaseOrderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderCreated {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub supplier_id: PartyId,
    pub location_id: LocationId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderLineAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderLineAdded {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub line_no: u32,
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_cost: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderSubmitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderSubmitted {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderApproved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderApproved {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: GoodsReceiptRecorded.
///
/// Carries the receipt lines plus the resolved product/location data the
/// stock side needs, so downstream consumers can push `ReceiveStock`
/// without reloading this aggregate. `completed` is true when every line
/// of the order is now fully received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodsReceiptRecorded {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub location_id: LocationId,
    pub received: Vec<ReceivedLine>,
    pub completed: bool,
    pub occurred_at: DateTime<Utc>,
}

/// A receipt line resolved against the order line it fulfils.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedLine {
    pub line_no: u32,
    pub product_id: ProductId,
    pub quantity: i64,
}

/// Event: PurchaseOrderCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderCancelled {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderEvent {
    PurchaseOrderCreated(PurchaseOrderCreated),
    PurchaseOrderLineAdded(PurchaseOrderLineAdded),
    PurchaseOrderSubmitted(PurchaseOrderSubmitted),
    PurchaseOrderApproved(PurchaseOrderApproved),
    GoodsReceiptRecorded(GoodsReceiptRecorded),
    PurchaseOrderCancelled(PurchaseOrderCancelled),
}

impl Event for PurchaseOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(_) => "purchasing.order.created",
            PurchaseOrderEvent::PurchaseOrderLineAdded(_) => "purchasing.order.line_added",
            PurchaseOrderEvent::PurchaseOrderSubmitted(_) => "purchasing.order.submitted",
            PurchaseOrderEvent::PurchaseOrderApproved(_) => "purchasing.order.approved",
            PurchaseOrderEvent::GoodsReceiptRecorded(_) => "purchasing.order.goods_receipt_recorded",
            PurchaseOrderEvent::PurchaseOrderCancelled(_) => "purchasing.order.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderLineAdded(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderSubmitted(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderApproved(e) => e.occurred_at,
            PurchaseOrderEvent::GoodsReceiptRecorded(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for PurchaseOrder {
    type Command = PurchaseOrderCommand;
    type Event = PurchaseOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => {
                self.id = e.order_id;
                self.tenant_id = Some(e.tenant_id);
                self.supplier_id = Some(e.supplier_id);
                self.location_id = Some(e.location_id);
                self.status = PurchaseOrderStatus::Draft;
                self.lines.clear();
                self.created = true;
            }
            PurchaseOrderEvent::PurchaseOrderLineAdded(e) => {
                self.lines.push(OrderLine {
                    line_no: e.line_no,
                    product_id: e.product_id,
                    quantity: e.quantity,
                    unit_cost: e.unit_cost,
                    received: 0,
                });
            }
            PurchaseOrderEvent::PurchaseOrderSubmitted(_) => {
                self.status = PurchaseOrderStatus::Submitted;
            }
            PurchaseOrderEvent::PurchaseOrderApproved(_) => {
                self.status = PurchaseOrderStatus::Approved;
            }
            PurchaseOrderEvent::GoodsReceiptRecorded(e) => {
                for r in &e.received {
                    if let Some(line) = self.lines.iter_mut().find(|l| l.line_no == r.line_no) {
                        line.received += r.quantity;
                    }
                }
                self.status = if e.completed {
                    PurchaseOrderStatus::Received
                } else {
                    PurchaseOrderStatus::PartiallyReceived
                };
            }
            PurchaseOrderEvent::PurchaseOrderCancelled(_) => {
                self.status = PurchaseOrderStatus::Cancelled;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PurchaseOrderCommand::CreatePurchaseOrder(cmd) => self.handle_create(cmd),
            PurchaseOrderCommand::AddLine(cmd) => self.handle_add_line(cmd),
            PurchaseOrderCommand::SubmitOrder(cmd) => self.handle_submit(cmd),
            PurchaseOrderCommand::ApproveOrder(cmd) => self.handle_approve(cmd),
            PurchaseOrderCommand::RecordGoodsReceipt(cmd) => self.handle_receipt(cmd),
            PurchaseOrderCommand::CancelOrder(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl PurchaseOrder {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_order_id(&self, order_id: PurchaseOrderId) -> Result<(), DomainError> {
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(
        &self,
        cmd: &CreatePurchaseOrder,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("purchase order already exists"));
        }

        Ok(vec![PurchaseOrderEvent::PurchaseOrderCreated(
            PurchaseOrderCreated {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                supplier_id: cmd.supplier_id,
                location_id: cmd.location_id,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_add_line(&self, cmd: &AddLine) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_order_id(cmd.order_id)?;

        if self.status != PurchaseOrderStatus::Draft {
            return Err(DomainError::invariant(
                "cannot modify purchase order once submitted",
            ));
        }
        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if cmd.unit_cost.is_zero() {
            return Err(DomainError::validation("unit_cost must be positive"));
        }

        let next_line_no = (self.lines.len() as u32) + 1;
        Ok(vec![PurchaseOrderEvent::PurchaseOrderLineAdded(
            PurchaseOrderLineAdded {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                line_no: next_line_no,
                product_id: cmd.product_id,
                quantity: cmd.quantity,
                unit_cost: cmd.unit_cost,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_submit(&self, cmd: &SubmitOrder) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_order_id(cmd.order_id)?;

        if self.status != PurchaseOrderStatus::Draft {
            return Err(DomainError::invariant(
                "only draft purchase orders can be submitted",
            ));
        }
        if self.lines.is_empty() {
            return Err(DomainError::validation(
                "cannot submit purchase order without lines",
            ));
        }

        Ok(vec![PurchaseOrderEvent::PurchaseOrderSubmitted(
            PurchaseOrderSubmitted {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_approve(&self, cmd: &ApproveOrder) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_order_id(cmd.order_id)?;

        if self.status != PurchaseOrderStatus::Submitted {
            return Err(DomainError::invariant(
                "only submitted purchase orders can be approved",
            ));
        }

        Ok(vec![PurchaseOrderEvent::PurchaseOrderApproved(
            PurchaseOrderApproved {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_receipt(
        &self,
        cmd: &RecordGoodsReceipt,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_order_id(cmd.order_id)?;

        if !self.can_receive() {
            return Err(DomainError::invariant(
                "cannot receive goods before purchase order is approved",
            ));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("receipt must contain lines"));
        }

        let location_id = self
            .location_id
            .ok_or_else(|| DomainError::invariant("purchase order has no location"))?;

        // Resolve receipt lines against order lines, rejecting over-receipt.
        let mut received = Vec::with_capacity(cmd.lines.len());
        let mut outstanding_after: i64 = self.lines.iter().map(OrderLine::outstanding).sum();

        for r in &cmd.lines {
            if r.quantity <= 0 {
                return Err(DomainError::validation(
                    "receipt line quantity must be positive",
                ));
            }
            let line = self
                .lines
                .iter()
                .find(|l| l.line_no == r.line_no)
                .ok_or_else(|| {
                    DomainError::validation(format!("unknown line_no {}", r.line_no))
                })?;
            if received.iter().any(|x: &ReceivedLine| x.line_no == r.line_no) {
                return Err(DomainError::validation(format!(
                    "duplicate line_no {} in receipt",
                    r.line_no
                )));
            }
            if r.quantity > line.outstanding() {
                return Err(DomainError::invariant(format!(
                    "over-receipt on line {} (outstanding {}, received {})",
                    r.line_no,
                    line.outstanding(),
                    r.quantity
                )));
            }

            outstanding_after -= r.quantity;
            received.push(ReceivedLine {
                line_no: r.line_no,
                product_id: line.product_id,
                quantity: r.quantity,
            });
        }

        Ok(vec![PurchaseOrderEvent::GoodsReceiptRecorded(
            GoodsReceiptRecorded {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                location_id,
                received,
                completed: outstanding_after == 0,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_cancel(&self, cmd: &CancelOrder) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_order_id(cmd.order_id)?;

        if !matches!(
            self.status,
            PurchaseOrderStatus::Draft | PurchaseOrderStatus::Submitted
        ) {
            return Err(DomainError::invariant(
                "only draft or submitted purchase orders can be cancelled",
            ));
        }

        Ok(vec![PurchaseOrderEvent::PurchaseOrderCancelled(
            PurchaseOrderCancelled {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                reason: cmd.reason.clone(),
                occurred_at: cmd.occurred_at,
            },
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockpile_events::execute;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    fn test_order_id() -> PurchaseOrderId {
        PurchaseOrderId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn approved_order_with_lines(
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
        quantities: &[i64],
    ) -> PurchaseOrder {
        let mut order = PurchaseOrder::empty(order_id);
        execute(
            &mut order,
            &PurchaseOrderCommand::CreatePurchaseOrder(CreatePurchaseOrder {
                tenant_id,
                order_id,
                supplier_id: PartyId::new(AggregateId::new()),
                location_id: LocationId::new(AggregateId::new()),
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        for &q in quantities {
            execute(
                &mut order,
                &PurchaseOrderCommand::AddLine(AddLine {
                    tenant_id,
                    order_id,
                    product_id: ProductId::new(AggregateId::new()),
                    quantity: q,
                    unit_cost: Money::from_minor(500),
                    occurred_at: test_time(),
                }),
            )
            .unwrap();
        }

        execute(
            &mut order,
            &PurchaseOrderCommand::SubmitOrder(SubmitOrder {
                tenant_id,
                order_id,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        execute(
            &mut order,
            &PurchaseOrderCommand::ApproveOrder(ApproveOrder {
                tenant_id,
                order_id,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        order
    }

    #[test]
    fn cannot_submit_empty_order() {
        let tenant_id = test_tenant_id();
        let order_id = test_order_id();
        let mut order = PurchaseOrder::empty(order_id);
        execute(
            &mut order,
            &PurchaseOrderCommand::CreatePurchaseOrder(CreatePurchaseOrder {
                tenant_id,
                order_id,
                supplier_id: PartyId::new(AggregateId::new()),
                location_id: LocationId::new(AggregateId::new()),
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        assert!(order
            .handle(&PurchaseOrderCommand::SubmitOrder(SubmitOrder {
                tenant_id,
                order_id,
                occurred_at: test_time(),
            }))
            .is_err());
    }

    #[test]
    fn cannot_receive_before_approval() {
        let tenant_id = test_tenant_id();
        let order_id = test_order_id();
        let mut order = PurchaseOrder::empty(order_id);
        execute(
            &mut order,
            &PurchaseOrderCommand::CreatePurchaseOrder(CreatePurchaseOrder {
                tenant_id,
                order_id,
                supplier_id: PartyId::new(AggregateId::new()),
                location_id: LocationId::new(AggregateId::new()),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        execute(
            &mut order,
            &PurchaseOrderCommand::AddLine(AddLine {
                tenant_id,
                order_id,
                product_id: ProductId::new(AggregateId::new()),
                quantity: 10,
                unit_cost: Money::from_minor(100),
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        let err = order
            .handle(&PurchaseOrderCommand::RecordGoodsReceipt(RecordGoodsReceipt {
                tenant_id,
                order_id,
                lines: vec![ReceiptLine {
                    line_no: 1,
                    quantity: 10,
                }],
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn partial_receipts_accumulate_until_completed() {
        let tenant_id = test_tenant_id();
        let order_id = test_order_id();
        let mut order = approved_order_with_lines(tenant_id, order_id, &[10, 4]);

        // First receipt: 6 of line 1.
        let events = execute(
            &mut order,
            &PurchaseOrderCommand::RecordGoodsReceipt(RecordGoodsReceipt {
                tenant_id,
                order_id,
                lines: vec![ReceiptLine {
                    line_no: 1,
                    quantity: 6,
                }],
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        let PurchaseOrderEvent::GoodsReceiptRecorded(first) = &events[0] else {
            panic!("Expected GoodsReceiptRecorded event");
        };
        assert!(!first.completed);
        assert_eq!(order.status(), PurchaseOrderStatus::PartiallyReceived);
        assert_eq!(order.lines()[0].outstanding(), 4);

        // Second receipt: the rest.
        let events = execute(
            &mut order,
            &PurchaseOrderCommand::RecordGoodsReceipt(RecordGoodsReceipt {
                tenant_id,
                order_id,
                lines: vec![
                    ReceiptLine {
                        line_no: 1,
                        quantity: 4,
                    },
                    ReceiptLine {
                        line_no: 2,
                        quantity: 4,
                    },
                ],
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        let PurchaseOrderEvent::GoodsReceiptRecorded(second) = &events[0] else {
            panic!("Expected GoodsReceiptRecorded event");
        };
        assert!(second.completed);
        assert_eq!(order.status(), PurchaseOrderStatus::Received);
        assert!(order.is_fully_received());
    }

    #[test]
    fn over_receipt_is_rejected() {
        let tenant_id = test_tenant_id();
        let order_id = test_order_id();
        let order = approved_order_with_lines(tenant_id, order_id, &[5]);

        let err = order
            .handle(&PurchaseOrderCommand::RecordGoodsReceipt(RecordGoodsReceipt {
                tenant_id,
                order_id,
                lines: vec![ReceiptLine {
                    line_no: 1,
                    quantity: 6,
                }],
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn duplicate_receipt_lines_are_rejected() {
        let tenant_id = test_tenant_id();
        let order_id = test_order_id();
        let order = approved_order_with_lines(tenant_id, order_id, &[10]);

        let err = order
            .handle(&PurchaseOrderCommand::RecordGoodsReceipt(RecordGoodsReceipt {
                tenant_id,
                order_id,
                lines: vec![
                    ReceiptLine {
                        line_no: 1,
                        quantity: 3,
                    },
                    ReceiptLine {
                        line_no: 1,
                        quantity: 3,
                    },
                ],
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn cancel_only_from_draft_or_submitted() {
        let tenant_id = test_tenant_id();
        let order_id = test_order_id();
        let order = approved_order_with_lines(tenant_id, order_id, &[5]);

        // Approved order can no longer be cancelled.
        assert!(order
            .handle(&PurchaseOrderCommand::CancelOrder(CancelOrder {
                tenant_id,
                order_id,
                reason: None,
                occurred_at: test_time(),
            }))
            .is_err());
    }

    #[test]
    fn received_event_carries_resolved_products() {
        let tenant_id = test_tenant_id();
        let order_id = test_order_id();
        let mut order = approved_order_with_lines(tenant_id, order_id, &[2]);
        let expected_product = order.lines()[0].product_id;

        let events = execute(
            &mut order,
            &PurchaseOrderCommand::RecordGoodsReceipt(RecordGoodsReceipt {
                tenant_id,
                order_id,
                lines: vec![ReceiptLine {
                    line_no: 1,
                    quantity: 2,
                }],
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        let PurchaseOrderEvent::GoodsReceiptRecorded(e) = &events[0] else {
            panic!("Expected GoodsReceiptRecorded event");
        };
        assert_eq!(e.received[0].product_id, expected_product);
        assert_eq!(e.received[0].quantity, 2);
    }
}
