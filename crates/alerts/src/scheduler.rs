use serde::{Deserialize, Serialize};

use stockpile_core::TenantId;

use crate::job::AlertJob;
use crate::report::{AlertError, AlertReport};

/// Tenant scope for execution.
///
/// - `Any`: run jobs for any tenant (shared workers).
/// - `Tenant`: only accept jobs for the specified tenant (single-tenant
///   worker, defense in depth).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TenantScope {
    Any,
    Tenant(TenantId),
}

impl TenantScope {
    pub fn allows(&self, tenant_id: TenantId) -> bool {
        match self {
            TenantScope::Any => true,
            TenantScope::Tenant(t) => *t == tenant_id,
        }
    }
}

/// Scheduler/executor for alert jobs.
///
/// Intentionally minimal and storage/runtime agnostic.
pub trait AlertScheduler: Send + Sync + 'static {
    fn scope(&self) -> TenantScope;

    fn run<J: AlertJob>(&self, job: J) -> Result<AlertReport, AlertError> {
        if !self.scope().allows(job.tenant_id()) {
            return Err(AlertError::InvalidInput(
                "tenant scope violation (job tenant not allowed by scheduler)".to_string(),
            ));
        }
        job.run()
    }
}

/// Simple synchronous scheduler that runs jobs immediately in-process.
#[derive(Debug, Copy, Clone)]
pub struct LocalAlertScheduler {
    scope: TenantScope,
}

impl LocalAlertScheduler {
    pub fn new(scope: TenantScope) -> Self {
        Self { scope }
    }

    pub fn for_tenant(tenant_id: TenantId) -> Self {
        Self::new(TenantScope::Tenant(tenant_id))
    }
}

impl AlertScheduler for LocalAlertScheduler {
    fn scope(&self) -> TenantScope {
        self.scope
    }
}

/// One stock bucket as seen by the read model: product at location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockBucketSnapshot {
    pub product_id: String,
    pub location_id: String,
    pub on_hand: i64,
    pub reserved: i64,
    pub reorder_point: i64,
}

impl StockBucketSnapshot {
    pub fn available(&self) -> i64 {
        self.on_hand - self.reserved
    }
}

/// Tenant-wide stock snapshot handed to alert jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSnapshot {
    pub tenant_id: TenantId,
    pub buckets: Vec<StockBucketSnapshot>,
}

/// Read-model access boundary for alert inputs.
///
/// Infra implements this on top of projections; jobs never touch storage.
pub trait ReadModelReader<S>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn get_snapshot(&self, tenant_id: TenantId) -> Result<S, Self::Error>;
}
