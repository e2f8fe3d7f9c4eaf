use super::{GaugeGuard, MIN_PERIOD, WorkerKind};
use crate::event::{EventRecord, GuardSnapshot, Inbox, Snapshot, WardenSnapshot};
use crate::report::{GuardStatus, Reporter, WardenStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Forwards events as they arrive and the latest snapshots at a fixed rate.
pub struct Relay {
    inbox: Inbox,
    reporter: Arc<dyn Reporter>,
    period: Duration,
    guard: Option<GuardSnapshot>,
    warden: Option<WardenSnapshot>,
    guard_dirty: bool,
    warden_dirty: bool,
}

impl Relay {
    pub fn new(inbox: Inbox, reporter: Arc<dyn Reporter>, period: Duration) -> Self {
        Self {
            inbox,
            reporter,
            period: period.max(MIN_PERIOD),
            guard: None,
            warden: None,
            guard_dirty: false,
            warden_dirty: false,
        }
    }

    /// Relay until `cancel` fires, then deliver whatever the other workers
    /// still send until they have all let go of their outboxes.
    pub async fn run(mut self, cancel: CancellationToken, gauge: GaugeGuard) {
        let mut interval = time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(worker = WorkerKind::Relay.name(), period = ?self.period, "worker started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(record) = self.inbox.events.recv() => self.forward(&record),
                Some(snapshot) = self.inbox.snapshots.recv() => self.absorb(snapshot),
                _ = interval.tick() => self.flush(),
            }
        }

        while let Some(record) = self.inbox.events.recv().await {
            self.forward(&record);
        }
        while let Ok(snapshot) = self.inbox.snapshots.try_recv() {
            self.absorb(snapshot);
        }
        self.flush();

        debug!(worker = WorkerKind::Relay.name(), "worker stopped");
        drop(gauge);
    }

    fn forward(&self, record: &EventRecord) {
        trace!(event = ?record.event, "relaying event");
        self.reporter.log(record.at, &record.event.to_string());
    }

    fn absorb(&mut self, snapshot: Snapshot) {
        match snapshot {
            Snapshot::Guard(guard) => {
                self.guard = Some(guard);
                self.guard_dirty = true;
            }
            Snapshot::Warden(warden) => {
                self.warden = Some(warden);
                self.warden_dirty = true;
            }
        }
    }

    fn flush(&mut self) {
        if self.guard_dirty
            && let Some(guard) = &self.guard
        {
            self.reporter.guard_status(&GuardStatus::from(guard));
            self.guard_dirty = false;
        }
        if self.warden_dirty
            && let Some(warden) = &self.warden
        {
            self.reporter.warden_status(&WardenStatus::from(warden));
            self.warden_dirty = false;
        }
    }
}
