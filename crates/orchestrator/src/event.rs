//! Messages flowing from the workers to the relay.
//!
//! Discrete events travel over an unbounded channel and are never dropped.
//! Snapshots are idempotent refreshes of what a worker last saw; they go over
//! a small bounded channel and are discarded when the relay falls behind.

use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    HandlesClosed {
        process: String,
        pid: u32,
        count: usize,
    },
    AgentsTerminated {
        process: String,
        count: usize,
    },
    AgentRelaunched {
        path: PathBuf,
        pid: u32,
    },
    AgentRelaunchFailed {
        path: PathBuf,
        reason: String,
    },
    /// A worker could not enumerate processes. Sent when a worker starts
    /// failing, not on every failed tick.
    ScanFailed {
        worker: &'static str,
        reason: String,
    },
}

impl fmt::Display for MonitorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HandlesClosed {
                process,
                pid,
                count,
            } => write!(f, "Closed {count} handle(s) for {process} (PID: {pid})"),
            Self::AgentsTerminated { process, count } => {
                write!(f, "Terminated {count} {process} process(es)")
            }
            Self::AgentRelaunched { path, pid } => {
                write!(f, "Relaunched {} successfully (PID: {pid})", display_name(path))
            }
            Self::AgentRelaunchFailed { path, reason } => {
                write!(f, "Failed to relaunch {}: {reason}", display_name(path))
            }
            Self::ScanFailed { worker, reason } => {
                write!(f, "{worker} scan failed: {reason}")
            }
        }
    }
}

fn display_name(path: &std::path::Path) -> String {
    // `Path::file_name` only knows the host separator.
    let text = path.to_string_lossy();
    text.rsplit(['\\', '/']).next().unwrap_or(&text).to_owned()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub at: SystemTime,
    pub event: MonitorEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardedProcess {
    pub pid: u32,
    /// The guard handle was closed in this process at some point.
    pub stripped: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuardSnapshot {
    pub processes: Vec<GuardedProcess>,
    pub handles_closed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentProcess {
    pub pid: u32,
    /// `None` when the creation time could not be read.
    pub age: Option<Duration>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WardenSnapshot {
    pub processes: Vec<AgentProcess>,
    pub terminated: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Snapshot {
    Guard(GuardSnapshot),
    Warden(WardenSnapshot),
}

/// Producer half, cloned into every worker.
#[derive(Debug, Clone)]
pub struct Outbox {
    events: mpsc::UnboundedSender<EventRecord>,
    snapshots: mpsc::Sender<Snapshot>,
}

/// Consumer half, owned by the relay.
#[derive(Debug)]
pub struct Inbox {
    pub events: mpsc::UnboundedReceiver<EventRecord>,
    pub snapshots: mpsc::Receiver<Snapshot>,
}

pub fn channel(snapshot_capacity: usize) -> (Outbox, Inbox) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (snapshots_tx, snapshots_rx) = mpsc::channel(snapshot_capacity.max(1));
    (
        Outbox {
            events: events_tx,
            snapshots: snapshots_tx,
        },
        Inbox {
            events: events_rx,
            snapshots: snapshots_rx,
        },
    )
}

impl Outbox {
    /// Queue an event. Only fails once the relay is gone, which means the
    /// monitor is shutting down anyway.
    pub fn event(&self, at: SystemTime, event: MonitorEvent) {
        let _ = self.events.send(EventRecord { at, event });
    }

    /// Offer a snapshot without waiting. Returns whether it was queued.
    pub fn snapshot(&self, snapshot: Snapshot) -> bool {
        self.snapshots.try_send(snapshot).is_ok()
    }
}
