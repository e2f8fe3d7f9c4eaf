use super::{ScanHealth, WorkerKind};
use crate::clock::Clock;
use crate::event::{GuardSnapshot, MonitorEvent, Outbox, Snapshot};
use crate::state::SharedState;
use kernel::{ErrorKind, ObjectCloser, ProcessTable, process};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Strips the single-instance guard handle from every matching process.
pub struct GuardStripper {
    processes: Arc<dyn ProcessTable>,
    closer: Arc<dyn ObjectCloser>,
    clock: Arc<dyn Clock>,
    state: SharedState,
    outbox: Outbox,
    process_name: String,
    object_name: String,
    health: ScanHealth,
}

impl GuardStripper {
    pub fn new(
        config: &config::Guard,
        processes: Arc<dyn ProcessTable>,
        closer: Arc<dyn ObjectCloser>,
        clock: Arc<dyn Clock>,
        state: SharedState,
        outbox: Outbox,
    ) -> Self {
        Self {
            processes,
            closer,
            clock,
            state,
            outbox,
            process_name: config.process_name.clone(),
            object_name: config.object_name.clone(),
            health: ScanHealth::default(),
        }
    }

    /// One pass over the guarded processes. Returns `None` when the process
    /// table could not be read.
    pub fn tick(&self) -> Option<GuardSnapshot> {
        let targets = match process::find_by_name(&*self.processes, &self.process_name) {
            Ok(targets) => {
                self.health.succeeded(WorkerKind::Guard);
                targets
            }
            Err(err) => {
                self.health
                    .failed(WorkerKind::Guard, &err, &self.outbox, &*self.clock);
                return None;
            }
        };

        let mut live = Vec::with_capacity(targets.len());
        for target in &targets {
            live.push(target.pid);
            match self.closer.close_by_name(target.pid, &self.object_name) {
                Ok(0) => {}
                Ok(count) => {
                    self.state.record_stripped(target.pid, count);
                    self.outbox.event(
                        self.clock.now(),
                        MonitorEvent::HandlesClosed {
                            process: target.name.clone(),
                            pid: target.pid,
                            count,
                        },
                    );
                }
                Err(err) => match err.kind() {
                    ErrorKind::NotFound => trace!(pid = target.pid, "no guard handle"),
                    ErrorKind::Permission | ErrorKind::Transient => {
                        debug!(pid = target.pid, error = %err, "guard handle skipped this cycle")
                    }
                    ErrorKind::Fatal => warn!(pid = target.pid, error = %err, "failed to strip guard handle"),
                },
            }
        }

        let snapshot = self.state.record_guard_scan(&live);
        if !self.outbox.snapshot(Snapshot::Guard(snapshot.clone())) {
            trace!("relay busy, guard snapshot dropped");
        }
        Some(snapshot)
    }
}
