//! Stock take (cycle count) lifecycle.
//!
//! A stock take is opened for one location, counts are recorded per product
//! (recounts overwrite), and posting emits the non-zero variance lines.
//! Applying those variances back to the `StockItem` aggregates (reason
//! `StockTake`) is application-layer orchestration at the API boundary.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockpile_catalog::ProductId;
use stockpile_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use stockpile_events::Event;

use crate::location::LocationId;

/// Stock take identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StockTakeId(pub AggregateId);

impl StockTakeId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for StockTakeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Stock take status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockTakeStatus {
    Open,
    Posted,
    Cancelled,
}

/// One recorded count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountLine {
    pub product_id: ProductId,
    pub counted_qty: i64,
    /// On-hand quantity at the moment of counting, per the read model.
    pub expected_qty: i64,
}

/// One posted variance (counted - expected, zero variances are dropped).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarianceLine {
    pub product_id: ProductId,
    pub delta: i64,
}

/// Aggregate root: StockTake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockTake {
    id: StockTakeId,
    tenant_id: Option<TenantId>,
    location_id: Option<LocationId>,
    status: StockTakeStatus,
    /// BTreeMap keeps variance ordering deterministic across replays.
    counts: BTreeMap<uuid::Uuid, CountLine>,
    version: u64,
    created: bool,
}

impl StockTake {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: StockTakeId) -> Self {
        Self {
            id,
            tenant_id: None,
            location_id: None,
            status: StockTakeStatus::Open,
            counts: BTreeMap::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> StockTakeId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn location_id(&self) -> Option<LocationId> {
        self.location_id
    }

    pub fn status(&self) -> StockTakeStatus {
        self.status
    }

    pub fn counts(&self) -> impl Iterator<Item = &CountLine> {
        self.counts.values()
    }

    /// Non-zero variances for the currently recorded counts.
    pub fn variances(&self) -> Vec<VarianceLine> {
        self.counts
            .values()
            .filter(|c| c.counted_qty != c.expected_qty)
            .map(|c| VarianceLine {
                product_id: c.product_id,
                delta: c.counted_qty - c.expected_qty,
            })
            .collect()
    }
}

impl AggregateRoot for StockTake {
    type Id = StockTakeId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenStockTake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenStockTake {
    pub tenant_id: TenantId,
    pub take_id: StockTakeId,
    pub location_id: LocationId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordCount (recount overwrites while open).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCount {
    pub tenant_id: TenantId,
    pub take_id: StockTakeId,
    pub product_id: ProductId,
    pub counted_qty: i64,
    pub expected_qty: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: PostStockTake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostStockTake {
    pub tenant_id: TenantId,
    pub take_id: StockTakeId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelStockTake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelStockTake {
    pub tenant_id: TenantId,
    pub take_id: StockTakeId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockTakeCommand {
    OpenStockTake(OpenStockTake),
    RecordCount(RecordCount),
    PostStockTake(PostStockTake),
    CancelStockTake(CancelStockTake),
}

/// Event: StockTakeOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTakeOpened {
    pub tenant_id: TenantId,
    pub take_id: StockTakeId,
    pub location_id: LocationId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CountRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountRecorded {
    pub tenant_id: TenantId,
    pub take_id: StockTakeId,
    pub line: CountLine,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockTakePosted (carries the variance lines to apply).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTakePosted {
    pub tenant_id: TenantId,
    pub take_id: StockTakeId,
    pub location_id: LocationId,
    pub variances: Vec<VarianceLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockTakeCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTakeCancelled {
    pub tenant_id: TenantId,
    pub take_id: StockTakeId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockTakeEvent {
    StockTakeOpened(StockTakeOpened),
    CountRecorded(CountRecorded),
    StockTakePosted(StockTakePosted),
    StockTakeCancelled(StockTakeCancelled),
}

impl Event for StockTakeEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockTakeEvent::StockTakeOpened(_) => "inventory.stock_take.opened",
            StockTakeEvent::CountRecorded(_) => "inventory.stock_take.count_recorded",
            StockTakeEvent::StockTakePosted(_) => "inventory.stock_take.posted",
            StockTakeEvent::StockTakeCancelled(_) => "inventory.stock_take.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockTakeEvent::StockTakeOpened(e) => e.occurred_at,
            StockTakeEvent::CountRecorded(e) => e.occurred_at,
            StockTakeEvent::StockTakePosted(e) => e.occurred_at,
            StockTakeEvent::StockTakeCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for StockTake {
    type Command = StockTakeCommand;
    type Event = StockTakeEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            StockTakeEvent::StockTakeOpened(e) => {
                self.id = e.take_id;
                self.tenant_id = Some(e.tenant_id);
                self.location_id = Some(e.location_id);
                self.status = StockTakeStatus::Open;
                self.counts.clear();
                self.created = true;
            }
            StockTakeEvent::CountRecorded(e) => {
                self.counts
                    .insert(*e.line.product_id.0.as_uuid(), e.line);
            }
            StockTakeEvent::StockTakePosted(_) => {
                self.status = StockTakeStatus::Posted;
            }
            StockTakeEvent::StockTakeCancelled(_) => {
                self.status = StockTakeStatus::Cancelled;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            StockTakeCommand::OpenStockTake(cmd) => self.handle_open(cmd),
            StockTakeCommand::RecordCount(cmd) => self.handle_record(cmd),
            StockTakeCommand::PostStockTake(cmd) => self.handle_post(cmd),
            StockTakeCommand::CancelStockTake(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl StockTake {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.status != StockTakeStatus::Open {
            return Err(DomainError::invariant("stock take is not open"));
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenStockTake) -> Result<Vec<StockTakeEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("stock take already exists"));
        }

        Ok(vec![StockTakeEvent::StockTakeOpened(StockTakeOpened {
            tenant_id: cmd.tenant_id,
            take_id: cmd.take_id,
            location_id: cmd.location_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record(&self, cmd: &RecordCount) -> Result<Vec<StockTakeEvent>, DomainError> {
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_open()?;

        if cmd.counted_qty < 0 {
            return Err(DomainError::validation("counted quantity cannot be negative"));
        }

        Ok(vec![StockTakeEvent::CountRecorded(CountRecorded {
            tenant_id: cmd.tenant_id,
            take_id: cmd.take_id,
            line: CountLine {
                product_id: cmd.product_id,
                counted_qty: cmd.counted_qty,
                expected_qty: cmd.expected_qty,
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_post(&self, cmd: &PostStockTake) -> Result<Vec<StockTakeEvent>, DomainError> {
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_open()?;

        if self.counts.is_empty() {
            return Err(DomainError::validation(
                "cannot post stock take without counts",
            ));
        }

        let location_id = self
            .location_id
            .ok_or_else(|| DomainError::invariant("stock take has no location"))?;

        Ok(vec![StockTakeEvent::StockTakePosted(StockTakePosted {
            tenant_id: cmd.tenant_id,
            take_id: cmd.take_id,
            location_id,
            variances: self.variances(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelStockTake) -> Result<Vec<StockTakeEvent>, DomainError> {
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_open()?;

        Ok(vec![StockTakeEvent::StockTakeCancelled(StockTakeCancelled {
            tenant_id: cmd.tenant_id,
            take_id: cmd.take_id,
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

    fn opened_take(tenant_id: TenantId, take_id: StockTakeId) -> StockTake {
        let mut take = StockTake::empty(take_id);
        execute(
            &mut take,
            &StockTakeCommand::OpenStockTake(OpenStockTake {
                tenant_id,
                take_id,
                location_id: LocationId::new(AggregateId::new()),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        take
    }

    #[test]
    fn post_emits_only_nonzero_variances() {
        let tenant_id = TenantId::new();
        let take_id = StockTakeId::new(AggregateId::new());
        let mut take = opened_take(tenant_id, take_id);

        let matching = ProductId::new(AggregateId::new());
        let short = ProductId::new(AggregateId::new());

        for (product_id, counted, expected) in [(matching, 10, 10), (short, 4, 9)] {
            execute(
                &mut take,
                &StockTakeCommand::RecordCount(RecordCount {
                    tenant_id,
                    take_id,
                    product_id,
                    counted_qty: counted,
                    expected_qty: expected,
                    occurred_at: test_time(),
                }),
            )
            .unwrap();
        }

        let events = take
            .handle(&StockTakeCommand::PostStockTake(PostStockTake {
                tenant_id,
                take_id,
                occurred_at: test_time(),
            }))
            .unwrap();

        let StockTakeEvent::StockTakePosted(posted) = &events[0] else {
            panic!("Expected StockTakePosted event");
        };
        assert_eq!(posted.variances.len(), 1);
        assert_eq!(posted.variances[0].product_id, short);
        assert_eq!(posted.variances[0].delta, -5);
    }

    #[test]
    fn recount_overwrites_previous_count() {
        let tenant_id = TenantId::new();
        let take_id = StockTakeId::new(AggregateId::new());
        let mut take = opened_take(tenant_id, take_id);
        let product_id = ProductId::new(AggregateId::new());

        for counted in [3, 7] {
            execute(
                &mut take,
                &StockTakeCommand::RecordCount(RecordCount {
                    tenant_id,
                    take_id,
                    product_id,
                    counted_qty: counted,
                    expected_qty: 5,
                    occurred_at: test_time(),
                }),
            )
            .unwrap();
        }

        let variances = take.variances();
        assert_eq!(variances.len(), 1);
        assert_eq!(variances[0].delta, 2);
    }

    #[test]
    fn cannot_post_empty_take() {
        let tenant_id = TenantId::new();
        let take_id = StockTakeId::new(AggregateId::new());
        let take = opened_take(tenant_id, take_id);

        assert!(take
            .handle(&StockTakeCommand::PostStockTake(PostStockTake {
                tenant_id,
                take_id,
                occurred_at: test_time(),
            }))
            .is_err());
    }

    #[test]
    fn posted_take_rejects_further_counts() {
        let tenant_id = TenantId::new();
        let take_id = StockTakeId::new(AggregateId::new());
        let mut take = opened_take(tenant_id, take_id);
        let product_id = ProductId::new(AggregateId::new());

        execute(
            &mut take,
            &StockTakeCommand::RecordCount(RecordCount {
                tenant_id,
                take_id,
                product_id,
                counted_qty: 1,
                expected_qty: 2,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        execute(
            &mut take,
            &StockTakeCommand::PostStockTake(PostStockTake {
                tenant_id,
                take_id,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(take.status(), StockTakeStatus::Posted);

        assert!(take
            .handle(&StockTakeCommand::RecordCount(RecordCount {
                tenant_id,
                take_id,
                product_id,
                counted_qty: 9,
                expected_qty: 2,
                occurred_at: test_time(),
            }))
            .is_err());
    }

    #[test]
    fn cancel_only_while_open() {
        let tenant_id = TenantId::new();
        let take_id = StockTakeId::new(AggregateId::new());
        let mut take = opened_take(tenant_id, take_id);

        execute(
            &mut take,
            &StockTakeCommand::CancelStockTake(CancelStockTake {
                tenant_id,
                take_id,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(take.status(), StockTakeStatus::Cancelled);

        assert!(take
            .handle(&StockTakeCommand::CancelStockTake(CancelStockTake {
                tenant_id,
                take_id,
                occurred_at: test_time(),
            }))
            .is_err());
    }
}
