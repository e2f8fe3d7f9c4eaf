//! Periodic workers and the loop that drives them.

mod guard;
mod relay;
mod warden;

pub use guard::GuardStripper;
pub use relay::Relay;
pub use warden::{AgentWarden, RelaunchOutcome, WardenAction, WardenPolicy};

use crate::clock::Clock;
use crate::event::{MonitorEvent, Outbox};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Shortest period a worker will tick at.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    Guard,
    Warden,
    Relay,
}

impl WorkerKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Guard => "guard",
            Self::Warden => "warden",
            Self::Relay => "relay",
        }
    }
}

/// Number of worker tasks currently alive.
#[derive(Debug, Clone, Default)]
pub struct WorkerGauge(Arc<AtomicUsize>);

impl WorkerGauge {
    pub fn active(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    /// Count one worker until the returned guard is dropped.
    pub fn enter(&self) -> GaugeGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        GaugeGuard(Arc::clone(&self.0))
    }
}

#[derive(Debug)]
pub struct GaugeGuard(Arc<AtomicUsize>);

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Run `tick` every `period` on the blocking pool until `cancel` fires.
///
/// Each tick is awaited before the next one is scheduled, so ticks of one
/// worker never overlap. Cancellation is observed between ticks; a tick
/// already running is allowed to finish.
pub async fn run_periodic<F>(
    kind: WorkerKind,
    period: Duration,
    cancel: CancellationToken,
    gauge: GaugeGuard,
    tick: F,
) where
    F: Fn() + Send + Sync + 'static,
{
    let tick = Arc::new(tick);
    let period = period.max(MIN_PERIOD);
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(worker = kind.name(), ?period, "worker started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let tick = Arc::clone(&tick);
                if let Err(err) = tokio::task::spawn_blocking(move || tick()).await {
                    error!(worker = kind.name(), error = %err, "worker tick panicked");
                }
            }
        }
    }

    debug!(worker = kind.name(), "worker stopped");
    drop(gauge);
}

/// Tracks whether a worker's process enumeration is currently failing so
/// the failure is reported once rather than every tick.
#[derive(Debug, Default)]
pub(crate) struct ScanHealth {
    failing: AtomicBool,
}

impl ScanHealth {
    pub(crate) fn failed(
        &self,
        kind: WorkerKind,
        err: &kernel::Error,
        outbox: &Outbox,
        clock: &dyn Clock,
    ) {
        warn!(worker = kind.name(), error = %err, "process scan failed");
        if !self.failing.swap(true, Ordering::Relaxed) {
            outbox.event(
                clock.now(),
                MonitorEvent::ScanFailed {
                    worker: kind.name(),
                    reason: err.to_string(),
                },
            );
        }
    }

    pub(crate) fn succeeded(&self, kind: WorkerKind) {
        if self.failing.swap(false, Ordering::Relaxed) {
            info!(worker = kind.name(), "process scan recovered");
        }
    }
}
