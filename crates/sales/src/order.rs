use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockpile_catalog::ProductId;
use stockpile_core::{Aggregate, AggregateId, AggregateRoot, DomainError, Money, TenantId};
use stockpile_events::Event;
use stockpile_inventory::LocationId;
use stockpile_parties::PartyId;

/// Sales order identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SalesOrderId(pub AggregateId);

impl SalesOrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for SalesOrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Sales order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SalesOrderStatus {
    Draft,
    Confirmed,
    Paid,
    Dispatched,
    Delivered,
    Cancelled,
}

/// How a payment was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    Transfer,
    StoreCredit,
}

/// Order line: product, quantity, unit price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub line_no: u32,
    pub product_id: ProductId,
    pub quantity: i64,
    /// Price in minor units (e.g. cents).
    pub unit_price: Money,
}

impl OrderLine {
    pub fn line_total(&self) -> Result<Money, DomainError> {
        self.unit_price.times(self.quantity as u64)
    }
}

/// Aggregate root: SalesOrder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalesOrder {
    id: SalesOrderId,
    tenant_id: Option<TenantId>,
    customer_id: Option<PartyId>,
    status: SalesOrderStatus,
    lines: Vec<OrderLine>,
    /// Fulfilment location, fixed at confirmation.
    location_id: Option<LocationId>,
    coupon_code: Option<String>,
    subtotal: Money,
    discount: Money,
    grand_total: Money,
    paid_total: Money,
    version: u64,
    created: bool,
}

impl SalesOrder {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: SalesOrderId) -> Self {
        Self {
            id,
            tenant_id: None,
            customer_id: None,
            status: SalesOrderStatus::Draft,
            lines: Vec::new(),
            location_id: None,
            coupon_code: None,
            subtotal: Money::ZERO,
            discount: Money::ZERO,
            grand_total: Money::ZERO,
            paid_total: Money::ZERO,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> SalesOrderId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn customer_id(&self) -> Option<PartyId> {
        self.customer_id
    }

    pub fn status(&self) -> SalesOrderStatus {
        self.status
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn location_id(&self) -> Option<LocationId> {
        self.location_id
    }

    pub fn coupon_code(&self) -> Option<&str> {
        self.coupon_code.as_deref()
    }

    pub fn subtotal(&self) -> Money {
        self.subtotal
    }

    pub fn discount(&self) -> Money {
        self.discount
    }

    pub fn grand_total(&self) -> Money {
        self.grand_total
    }

    pub fn paid_total(&self) -> Money {
        self.paid_total
    }

    pub fn outstanding(&self) -> Money {
        self.grand_total.saturating_sub(self.paid_total)
    }

    pub fn is_modifiable(&self) -> bool {
        matches!(self.status, SalesOrderStatus::Draft)
    }

    /// Current subtotal over the draft lines.
    pub fn draft_subtotal(&self) -> Result<Money, DomainError> {
        let mut total = Money::ZERO;
        for line in &self.lines {
            total = total.add(line.line_total()?)?;
        }
        Ok(total)
    }
}

impl AggregateRoot for SalesOrder {
    type Id = SalesOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateSalesOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSalesOrder {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub customer_id: PartyId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddLine (Draft only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLine {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveLine (Draft only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveLine {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub line_no: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmOrder.
///
/// The caller resolves the coupon (if any) through the coupon engine and
/// passes the resulting discount; the aggregate checks it against the
/// subtotal and freezes the totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmOrder {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub location_id: LocationId,
    pub coupon_code: Option<String>,
    pub discount: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RegisterPayment (Confirmed only, cumulative).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterPayment {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkPaid (zero-total confirmed orders, e.g. after a 100% coupon).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkPaid {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DispatchOrder (Paid only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchOrder {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkDelivered (Dispatched only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkDelivered {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelOrder (Draft/Confirmed only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrder {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SalesOrderCommand {
    CreateSalesOrder(CreateSalesOrder),
    AddLine(AddLine),
    RemoveLine(RemoveLine),
    ConfirmOrder(ConfirmOrder),
    RegisterPayment(RegisterPayment),
    MarkPaid(MarkPaid),
    DispatchOrder(DispatchOrder),
    MarkDelivered(MarkDelivered),
    CancelOrder(CancelOrder),
}

/// Event: SalesOrderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesOrderCreated {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub customer_id: PartyId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAdded {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub line_no: u32,
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRemoved {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub line_no: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderConfirmed (totals frozen here).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConfirmed {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub location_id: LocationId,
    pub coupon_code: Option<String>,
    pub subtotal: Money,
    pub discount: Money,
    pub grand_total: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRegistered {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub new_paid_total: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderPaid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPaid {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderDispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDispatched {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderDelivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDelivered {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub reason: Option<String>,
    /// Whether a stock reservation existed (Confirmed orders) at
    /// cancellation time; the API layer releases it.
    pub had_reservation: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SalesOrderEvent {
    SalesOrderCreated(SalesOrderCreated),
    LineAdded(LineAdded),
    LineRemoved(LineRemoved),
    OrderConfirmed(OrderConfirmed),
    PaymentRegistered(PaymentRegistered),
    OrderPaid(OrderPaid),
    OrderDispatched(OrderDispatched),
    OrderDelivered(OrderDelivered),
    OrderCancelled(OrderCancelled),
}

impl Event for SalesOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SalesOrderEvent::SalesOrderCreated(_) => "sales.order.created",
            SalesOrderEvent::LineAdded(_) => "sales.order.line_added",
            SalesOrderEvent::LineRemoved(_) => "sales.order.line_removed",
            SalesOrderEvent::OrderConfirmed(_) => "sales.order.confirmed",
            SalesOrderEvent::PaymentRegistered(_) => "sales.order.payment_registered",
            SalesOrderEvent::OrderPaid(_) => "sales.order.paid",
            SalesOrderEvent::OrderDispatched(_) => "sales.order.dispatched",
            SalesOrderEvent::OrderDelivered(_) => "sales.order.delivered",
            SalesOrderEvent::OrderCancelled(_) => "sales.order.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SalesOrderEvent::SalesOrderCreated(e) => e.occurred_at,
            SalesOrderEvent::LineAdded(e) => e.occurred_at,
            SalesOrderEvent::LineRemoved(e) => e.occurred_at,
            SalesOrderEvent::OrderConfirmed(e) => e.occurred_at,
            SalesOrderEvent::PaymentRegistered(e) => e.occurred_at,
            SalesOrderEvent::OrderPaid(e) => e.occurred_at,
            SalesOrderEvent::OrderDispatched(e) => e.occurred_at,
            SalesOrderEvent::OrderDelivered(e) => e.occurred_at,
            SalesOrderEvent::OrderCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for SalesOrder {
    type Command = SalesOrderCommand;
    type Event = SalesOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SalesOrderEvent::SalesOrderCreated(e) => {
                self.id = e.order_id;
                self.tenant_id = Some(e.tenant_id);
                self.customer_id = Some(e.customer_id);
                self.status = SalesOrderStatus::Draft;
                self.lines.clear();
                self.created = true;
            }
            SalesOrderEvent::LineAdded(e) => {
                self.lines.push(OrderLine {
                    line_no: e.line_no,
                    product_id: e.product_id,
                    quantity: e.quantity,
                    unit_price: e.unit_price,
                });
            }
            SalesOrderEvent::LineRemoved(e) => {
                self.lines.retain(|l| l.line_no != e.line_no);
            }
            SalesOrderEvent::OrderConfirmed(e) => {
                self.status = SalesOrderStatus::Confirmed;
                self.location_id = Some(e.location_id);
                self.coupon_code = e.coupon_code.clone();
                self.subtotal = e.subtotal;
                self.discount = e.discount;
                self.grand_total = e.grand_total;
                self.paid_total = Money::ZERO;
            }
            SalesOrderEvent::PaymentRegistered(e) => {
                self.paid_total = e.new_paid_total;
            }
            SalesOrderEvent::OrderPaid(_) => {
                self.status = SalesOrderStatus::Paid;
            }
            SalesOrderEvent::OrderDispatched(_) => {
                self.status = SalesOrderStatus::Dispatched;
            }
            SalesOrderEvent::OrderDelivered(_) => {
                self.status = SalesOrderStatus::Delivered;
            }
            SalesOrderEvent::OrderCancelled(_) => {
                self.status = SalesOrderStatus::Cancelled;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SalesOrderCommand::CreateSalesOrder(cmd) => self.handle_create(cmd),
            SalesOrderCommand::AddLine(cmd) => self.handle_add_line(cmd),
            SalesOrderCommand::RemoveLine(cmd) => self.handle_remove_line(cmd),
            SalesOrderCommand::ConfirmOrder(cmd) => self.handle_confirm(cmd),
            SalesOrderCommand::RegisterPayment(cmd) => self.handle_register_payment(cmd),
            SalesOrderCommand::MarkPaid(cmd) => self.handle_mark_paid(cmd),
            SalesOrderCommand::DispatchOrder(cmd) => self.handle_dispatch(cmd),
            SalesOrderCommand::MarkDelivered(cmd) => self.handle_mark_delivered(cmd),
            SalesOrderCommand::CancelOrder(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl SalesOrder {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_order_id(&self, order_id: SalesOrderId) -> Result<(), DomainError> {
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn ensure_exists(&self, tenant_id: TenantId, order_id: SalesOrderId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(tenant_id)?;
        self.ensure_order_id(order_id)
    }

    fn handle_create(&self, cmd: &CreateSalesOrder) -> Result<Vec<SalesOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("sales order already exists"));
        }

        Ok(vec![SalesOrderEvent::SalesOrderCreated(SalesOrderCreated {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            customer_id: cmd.customer_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line(&self, cmd: &AddLine) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.order_id)?;

        if !self.is_modifiable() {
            return Err(DomainError::invariant(
                "cannot modify order once it is confirmed",
            ));
        }
        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if cmd.unit_price.is_zero() {
            return Err(DomainError::validation("unit_price must be positive"));
        }

        let next_line_no = self.lines.iter().map(|l| l.line_no).max().unwrap_or(0) + 1;

        Ok(vec![SalesOrderEvent::LineAdded(LineAdded {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            line_no: next_line_no,
            product_id: cmd.product_id,
            quantity: cmd.quantity,
            unit_price: cmd.unit_price,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_line(&self, cmd: &RemoveLine) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.order_id)?;

        if !self.is_modifiable() {
            return Err(DomainError::invariant(
                "cannot modify order once it is confirmed",
            ));
        }
        if !self.lines.iter().any(|l| l.line_no == cmd.line_no) {
            return Err(DomainError::not_found());
        }

        Ok(vec![SalesOrderEvent::LineRemoved(LineRemoved {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            line_no: cmd.line_no,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_confirm(&self, cmd: &ConfirmOrder) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.order_id)?;

        if self.status != SalesOrderStatus::Draft {
            return Err(DomainError::invariant("only draft orders can be confirmed"));
        }
        if self.lines.is_empty() {
            return Err(DomainError::validation("cannot confirm order without lines"));
        }

        let subtotal = self.draft_subtotal()?;
        if cmd.discount > subtotal {
            return Err(DomainError::validation("discount cannot exceed subtotal"));
        }
        let grand_total = subtotal.sub(cmd.discount)?;

        Ok(vec![SalesOrderEvent::OrderConfirmed(OrderConfirmed {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            location_id: cmd.location_id,
            coupon_code: cmd.coupon_code.clone(),
            subtotal,
            discount: cmd.discount,
            grand_total,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_register_payment(
        &self,
        cmd: &RegisterPayment,
    ) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.order_id)?;

        if self.status != SalesOrderStatus::Confirmed {
            return Err(DomainError::invariant(
                "payments are only accepted on confirmed orders",
            ));
        }
        if cmd.amount.is_zero() {
            return Err(DomainError::validation("payment amount must be positive"));
        }

        let new_paid_total = self.paid_total.add(cmd.amount)?;
        if new_paid_total > self.grand_total {
            return Err(DomainError::validation(format!(
                "overpayment rejected (outstanding {}, offered {})",
                self.outstanding(),
                cmd.amount
            )));
        }

        let mut events = vec![SalesOrderEvent::PaymentRegistered(PaymentRegistered {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            amount: cmd.amount,
            method: cmd.method,
            new_paid_total,
            occurred_at: cmd.occurred_at,
        })];

        if new_paid_total == self.grand_total {
            events.push(SalesOrderEvent::OrderPaid(OrderPaid {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                occurred_at: cmd.occurred_at,
            }));
        }

        Ok(events)
    }

    fn handle_mark_paid(&self, cmd: &MarkPaid) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.order_id)?;

        if self.status != SalesOrderStatus::Confirmed {
            return Err(DomainError::invariant(
                "only confirmed orders can be marked paid",
            ));
        }
        if !self.grand_total.is_zero() {
            return Err(DomainError::invariant(
                "only zero-total orders can be marked paid without payment",
            ));
        }

        Ok(vec![SalesOrderEvent::OrderPaid(OrderPaid {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_dispatch(&self, cmd: &DispatchOrder) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.order_id)?;

        if self.status != SalesOrderStatus::Paid {
            return Err(DomainError::invariant("only paid orders can be dispatched"));
        }

        Ok(vec![SalesOrderEvent::OrderDispatched(OrderDispatched {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_delivered(
        &self,
        cmd: &MarkDelivered,
    ) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.order_id)?;

        if self.status != SalesOrderStatus::Dispatched {
            return Err(DomainError::invariant(
                "only dispatched orders can be delivered",
            ));
        }

        Ok(vec![SalesOrderEvent::OrderDelivered(OrderDelivered {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelOrder) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.order_id)?;

        if !matches!(
            self.status,
            SalesOrderStatus::Draft | SalesOrderStatus::Confirmed
        ) {
            return Err(DomainError::invariant(
                "paid or dispatched orders cannot be cancelled",
            ));
        }

        Ok(vec![SalesOrderEvent::OrderCancelled(OrderCancelled {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            reason: cmd.reason.clone(),
            had_reservation: self.status == SalesOrderStatus::Confirmed,
            occurred_at: cmd.occurred_at,
        })])
    }
}
