use stockpile_core::TenantId;

use crate::report::{AlertError, AlertReport};

/// A tenant-scoped alert evaluation unit.
///
/// Jobs consume **read-model snapshots** via their `Input` type. This crate
/// stays storage-agnostic: inputs are provided by callers (infra/workers).
pub trait AlertJob: Send + Sync + 'static {
    type Input: Send + Sync + 'static;

    /// The tenant this job belongs to (tenant-safe execution model).
    fn tenant_id(&self) -> TenantId;

    /// The input snapshot the job evaluates.
    fn input(&self) -> &Self::Input;

    /// Evaluate and return an alert report.
    ///
    /// Must not mutate domain state.
    fn run(&self) -> Result<AlertReport, AlertError>;
}
