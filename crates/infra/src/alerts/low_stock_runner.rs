//! Background low-stock alert runner.
//!
//! One runner thread per tenant, fed by the stock-levels read model. The
//! runner evaluates on a fixed interval and additionally whenever the
//! projection signals a stock update (triggers are coalesced through a
//! bounded channel). Failures are logged and retried with bounded
//! exponential backoff; they never propagate into the event pipeline.

use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use stockpile_alerts::{
    AlertReport, AlertScheduler, LocalAlertScheduler, LowStockJob, ReadModelReader, StockSnapshot,
    TenantScope,
};
use stockpile_core::TenantId;

/// Sink for alert reports.
///
/// Intentionally separate from the domain event stream: alerts are
/// operational signals, not domain events.
pub trait AlertSink: Send + Sync + 'static {
    fn emit(&self, tenant_id: TenantId, report: AlertReport);
}

/// In-memory sink for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryAlertSink {
    inner: std::sync::Mutex<Vec<(TenantId, AlertReport)>>,
}

impl InMemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<(TenantId, AlertReport)> {
        self.inner.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl AlertSink for InMemoryAlertSink {
    fn emit(&self, tenant_id: TenantId, report: AlertReport) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.push((tenant_id, report));
        }
    }
}

/// Config for the low-stock runner.
#[derive(Debug, Clone)]
pub struct LowStockRunner {
    pub interval: Duration,
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for LowStockRunner {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            max_retries: 5,
            base_backoff: Duration::from_millis(250),
        }
    }
}

/// Handle for a running runner (shutdown + trigger hook).
#[derive(Debug)]
pub struct LowStockRunnerHandle {
    shutdown: mpsc::Sender<()>,
    trigger: mpsc::SyncSender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl LowStockRunnerHandle {
    /// Event-trigger hook: call after a successful stock projection update.
    ///
    /// Triggers are coalesced (bounded queue of 1); if an evaluation is
    /// already pending this is a no-op.
    pub fn trigger(&self) {
        let _ = self.trigger.try_send(());
    }

    /// Gracefully stop the runner thread.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

impl LowStockRunner {
    /// Spawn a tenant-scoped runner.
    ///
    /// - Schedule: runs every `interval`
    /// - Event-trigger: call `handle.trigger()` after projection updates
    /// - Failures: logged + retried with bounded exponential backoff
    pub fn spawn_for_tenant<R, S>(
        &self,
        name: &'static str,
        tenant_id: TenantId,
        reader: Arc<R>,
        sink: Arc<S>,
    ) -> LowStockRunnerHandle
    where
        R: ReadModelReader<StockSnapshot> + 'static,
        S: AlertSink + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let (trigger_tx, trigger_rx) = mpsc::sync_channel::<()>(1);

        let cfg = self.clone();
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || runner_loop(name, tenant_id, cfg, shutdown_rx, trigger_rx, reader, sink))
            .expect("failed to spawn low-stock runner thread");

        LowStockRunnerHandle {
            shutdown: shutdown_tx,
            trigger: trigger_tx,
            join: Some(join),
        }
    }
}

fn runner_loop<R, S>(
    name: &'static str,
    tenant_id: TenantId,
    cfg: LowStockRunner,
    shutdown_rx: mpsc::Receiver<()>,
    trigger_rx: mpsc::Receiver<()>,
    reader: Arc<R>,
    sink: Arc<S>,
) where
    R: ReadModelReader<StockSnapshot> + 'static,
    S: AlertSink + 'static,
{
    info!(runner = name, tenant = %tenant_id, "low-stock runner started");

    let scheduler = LocalAlertScheduler::new(TenantScope::Tenant(tenant_id));

    let mut next_tick = Instant::now() + cfg.interval;
    let mut pending = true; // run once on startup
    let mut failures: u32 = 0;
    let mut backoff_until: Option<Instant> = None;

    loop {
        // Shutdown has priority.
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        let now = Instant::now();
        if now >= next_tick {
            pending = true;
            // Keep a stable cadence even if we were delayed.
            while next_tick <= now {
                next_tick += cfg.interval;
            }
        }

        // Event-trigger: non-blocking drain to coalesce multiple triggers.
        while trigger_rx.try_recv().is_ok() {
            pending = true;
        }

        // Backoff gate.
        if let Some(until) = backoff_until {
            if Instant::now() < until {
                thread::sleep(Duration::from_millis(50));
                continue;
            }
            backoff_until = None;
        }

        if !pending {
            let sleep_for = next_tick
                .saturating_duration_since(Instant::now())
                .min(Duration::from_millis(250));
            thread::sleep(sleep_for);
            continue;
        }

        pending = false;

        // 1) Read tenant snapshot (read model).
        let snapshot = match reader.get_snapshot(tenant_id) {
            Ok(s) => s,
            Err(e) => {
                warn!(runner = name, tenant = %tenant_id, error = ?e, "failed to read stock snapshot");
                failures += 1;
                if failures <= cfg.max_retries {
                    pending = true;
                    backoff_until = Some(Instant::now() + backoff(cfg.base_backoff, failures));
                } else {
                    failures = 0;
                }
                continue;
            }
        };

        // 2) Run deterministic evaluation.
        match scheduler.run(LowStockJob::new(tenant_id, snapshot)) {
            Ok(report) => {
                failures = 0;
                sink.emit(tenant_id, report);
            }
            Err(e) => {
                warn!(runner = name, tenant = %tenant_id, error = ?e, "low-stock job failed");
                failures += 1;
                if failures <= cfg.max_retries {
                    pending = true;
                    backoff_until = Some(Instant::now() + backoff(cfg.base_backoff, failures));
                } else {
                    failures = 0;
                }
            }
        }
    }

    info!(runner = name, tenant = %tenant_id, "low-stock runner stopped");
}

fn backoff(base: Duration, attempt: u32) -> Duration {
    // Exponential backoff: base * 2^(attempt-1), capped.
    let pow = 1u32 << attempt.saturating_sub(1).min(10);
    let ms = base.as_millis().saturating_mul(pow as u128);
    Duration::from_millis(ms.min(10_000) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticReader {
        snapshot: StockSnapshot,
    }

    impl ReadModelReader<StockSnapshot> for StaticReader {
        type Error = ();

        fn get_snapshot(&self, _tenant_id: TenantId) -> Result<StockSnapshot, Self::Error> {
            Ok(self.snapshot.clone())
        }
    }

    #[test]
    fn runner_emits_on_trigger_and_shuts_down() {
        let tenant_id = TenantId::new();
        let reader = Arc::new(StaticReader {
            snapshot: StockSnapshot {
                tenant_id,
                buckets: vec![stockpile_alerts::StockBucketSnapshot {
                    product_id: "p".to_string(),
                    location_id: "l".to_string(),
                    on_hand: 1,
                    reserved: 0,
                    reorder_point: 5,
                }],
            },
        });
        let sink = Arc::new(InMemoryAlertSink::new());

        let cfg = LowStockRunner {
            interval: Duration::from_secs(3600),
            ..Default::default()
        };
        let handle = cfg.spawn_for_tenant("test.low_stock", tenant_id, reader, sink.clone());

        handle.trigger();

        // The startup run plus the trigger should both land quickly.
        let deadline = Instant::now() + Duration::from_secs(5);
        while sink.all().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        handle.shutdown();

        let reports = sink.all();
        assert!(!reports.is_empty());
        assert_eq!(reports[0].0, tenant_id);
        assert_eq!(reports[0].1.fired, 1);
    }

    #[test]
    fn backoff_is_bounded() {
        let base = Duration::from_millis(250);
        assert_eq!(backoff(base, 1), Duration::from_millis(250));
        assert_eq!(backoff(base, 3), Duration::from_millis(1000));
        assert!(backoff(base, 30) <= Duration::from_secs(10));
    }
}
