//! Per-stream sequence cursors shared by all projections.
//!
//! Every projection must be idempotent under at-least-once delivery. The
//! cursor tracks the last applied sequence number per (tenant, aggregate)
//! stream: replays at or below the cursor are skipped, gaps are rejected.

use std::collections::HashMap;
use std::sync::RwLock;

use stockpile_core::{AggregateId, TenantId};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

/// Outcome of a cursor check for an incoming envelope.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CursorCheck {
    /// The event is new; apply it and call `advance` afterwards.
    Apply,
    /// Duplicate or replay at/below the cursor; safe to ignore.
    Duplicate,
}

/// A sequence number that cannot be applied in order.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SequenceGap {
    pub last: u64,
    pub found: u64,
}

#[derive(Debug, Default)]
pub struct StreamCursors {
    inner: RwLock<HashMap<CursorKey, u64>>,
}

impl StreamCursors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check an incoming sequence number against the stream cursor.
    ///
    /// The first event of a stream may carry any positive sequence number
    /// (stores start at 1); after that, strict +1 increments are required.
    pub fn check(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        seq: u64,
    ) -> Result<CursorCheck, SequenceGap> {
        let last = self.position(tenant_id, aggregate_id);

        if seq == 0 {
            return Err(SequenceGap { last, found: seq });
        }
        if seq <= last {
            return Ok(CursorCheck::Duplicate);
        }
        if last != 0 && seq != last + 1 {
            return Err(SequenceGap { last, found: seq });
        }
        Ok(CursorCheck::Apply)
    }

    /// Advance the cursor after a successful apply.
    pub fn advance(&self, tenant_id: TenantId, aggregate_id: AggregateId, seq: u64) {
        if let Ok(mut cursors) = self.inner.write() {
            cursors.insert(
                CursorKey {
                    tenant_id,
                    aggregate_id,
                },
                seq,
            );
        }
    }

    pub fn position(&self, tenant_id: TenantId, aggregate_id: AggregateId) -> u64 {
        match self.inner.read() {
            Ok(cursors) => *cursors
                .get(&CursorKey {
                    tenant_id,
                    aggregate_id,
                })
                .unwrap_or(&0),
            Err(_) => 0,
        }
    }

    pub fn clear_tenant(&self, tenant_id: TenantId) {
        if let Ok(mut cursors) = self.inner.write() {
            cursors.retain(|k, _| k.tenant_id != tenant_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_event_may_start_anywhere_positive() {
        let cursors = StreamCursors::new();
        let t = TenantId::new();
        let a = AggregateId::new();

        assert_eq!(cursors.check(t, a, 3), Ok(CursorCheck::Apply));
        cursors.advance(t, a, 3);

        // After the first, only +1 steps.
        assert_eq!(cursors.check(t, a, 4), Ok(CursorCheck::Apply));
        assert_eq!(cursors.check(t, a, 6), Err(SequenceGap { last: 3, found: 6 }));
    }

    #[test]
    fn replays_are_duplicates_not_errors() {
        let cursors = StreamCursors::new();
        let t = TenantId::new();
        let a = AggregateId::new();

        cursors.advance(t, a, 2);
        assert_eq!(cursors.check(t, a, 1), Ok(CursorCheck::Duplicate));
        assert_eq!(cursors.check(t, a, 2), Ok(CursorCheck::Duplicate));
    }

    #[test]
    fn zero_sequence_is_rejected() {
        let cursors = StreamCursors::new();
        let t = TenantId::new();
        let a = AggregateId::new();
        assert!(cursors.check(t, a, 0).is_err());
    }

    #[test]
    fn clear_tenant_resets_only_that_tenant() {
        let cursors = StreamCursors::new();
        let t1 = TenantId::new();
        let t2 = TenantId::new();
        let a = AggregateId::new();

        cursors.advance(t1, a, 5);
        cursors.advance(t2, a, 7);
        cursors.clear_tenant(t1);

        assert_eq!(cursors.position(t1, a), 0);
        assert_eq!(cursors.position(t2, a), 7);
    }
}
