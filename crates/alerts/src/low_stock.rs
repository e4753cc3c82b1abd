use serde::{Deserialize, Serialize};
use serde_json::json;

use stockpile_core::TenantId;

use crate::job::AlertJob;
use crate::report::{AlertError, AlertReport};
use crate::scheduler::{StockBucketSnapshot, StockSnapshot};

/// Low-stock alert row (alert payload, not a domain event).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LowStockAlert {
    pub product_id: String,
    pub location_id: String,
    pub available: i64,
    pub reorder_point: i64,
    pub severity: f64,
    pub explanation: String,
}

/// Deterministic low-stock/reorder evaluation for one tenant.
///
/// Model:
/// - A bucket fires when `available <= reorder_point` and a reorder point
///   is configured (`reorder_point > 0`).
/// - Severity is `1 + deficit / reorder_point` so a bucket exactly at its
///   reorder point scores 1.0 and a fully empty bucket scores 2.0.
#[derive(Debug, Clone)]
pub struct LowStockJob {
    tenant_id: TenantId,
    input: StockSnapshot,
}

impl LowStockJob {
    pub fn new(tenant_id: TenantId, input: StockSnapshot) -> Self {
        Self { tenant_id, input }
    }
}

impl AlertJob for LowStockJob {
    type Input = StockSnapshot;

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    fn input(&self) -> &Self::Input {
        &self.input
    }

    fn run(&self) -> Result<AlertReport, AlertError> {
        if self.input.tenant_id != self.tenant_id {
            return Err(AlertError::InvalidInput(
                "tenant_id mismatch between job and snapshot".to_string(),
            ));
        }

        let mut alerts: Vec<LowStockAlert> = Vec::new();
        for bucket in &self.input.buckets {
            if let Some(a) = evaluate_bucket(bucket) {
                alerts.push(a);
            }
        }

        Ok(AlertReport::new(alerts.len() as u32)
            .with_summary(format!(
                "{} stock bucket(s) at or below their reorder point",
                alerts.len()
            ))
            .with_metadata(json!({
                "kind": "inventory.low_stock",
                "tenant_id": self.tenant_id.to_string(),
                "alerts": alerts,
            })))
    }
}

fn evaluate_bucket(bucket: &StockBucketSnapshot) -> Option<LowStockAlert> {
    if bucket.reorder_point <= 0 {
        return None;
    }

    let available = bucket.available();
    if available > bucket.reorder_point {
        return None;
    }

    let deficit = (bucket.reorder_point - available).max(0) as f64;
    let severity = 1.0 + deficit / (bucket.reorder_point as f64);
    let explanation = format!(
        "product {} at location {} has {available} available (reorder point {})",
        bucket.product_id, bucket.location_id, bucket.reorder_point
    );

    Some(LowStockAlert {
        product_id: bucket.product_id.clone(),
        location_id: bucket.location_id.clone(),
        available,
        reorder_point: bucket.reorder_point,
        severity,
        explanation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(on_hand: i64, reserved: i64, reorder_point: i64) -> StockBucketSnapshot {
        StockBucketSnapshot {
            product_id: "p-1".to_string(),
            location_id: "l-1".to_string(),
            on_hand,
            reserved,
            reorder_point,
        }
    }

    fn run(buckets: Vec<StockBucketSnapshot>) -> AlertReport {
        let tenant_id = TenantId::new();
        LowStockJob::new(
            tenant_id,
            StockSnapshot {
                tenant_id,
                buckets,
            },
        )
        .run()
        .unwrap()
    }

    #[test]
    fn bucket_above_reorder_point_does_not_fire() {
        let report = run(vec![bucket(10, 0, 5)]);
        assert_eq!(report.fired, 0);
    }

    #[test]
    fn bucket_at_reorder_point_fires_with_unit_severity() {
        let b = bucket(5, 0, 5);
        let alert = evaluate_bucket(&b).unwrap();
        assert_eq!(alert.severity, 1.0);
        assert_eq!(alert.available, 5);
    }

    #[test]
    fn reserved_units_count_against_availability() {
        // 10 on hand but 7 reserved: 3 available <= reorder point 5.
        let report = run(vec![bucket(10, 7, 5)]);
        assert_eq!(report.fired, 1);
    }

    #[test]
    fn empty_bucket_scores_double_severity() {
        let b = bucket(0, 0, 4);
        let alert = evaluate_bucket(&b).unwrap();
        assert_eq!(alert.severity, 2.0);
    }

    #[test]
    fn unconfigured_reorder_point_never_fires() {
        let report = run(vec![bucket(0, 0, 0)]);
        assert_eq!(report.fired, 0);
    }

    #[test]
    fn tenant_mismatch_is_rejected() {
        let job = LowStockJob::new(
            TenantId::new(),
            StockSnapshot {
                tenant_id: TenantId::new(),
                buckets: vec![],
            },
        );
        assert!(matches!(job.run(), Err(AlertError::InvalidInput(_))));
    }

    #[test]
    fn report_metadata_carries_alert_rows() {
        let report = run(vec![bucket(1, 0, 5), bucket(9, 0, 2)]);
        assert_eq!(report.fired, 1);
        let rows = report.metadata["alerts"].as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["available"], 1);
    }
}
