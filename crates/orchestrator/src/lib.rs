#![forbid(unsafe_code)]

pub mod clock;
pub mod error;
pub mod event;
pub mod monitor;
pub mod report;
pub mod state;
pub mod workers;

pub use clock::{Clock, SystemClock};
pub use error::Error;
pub use event::{
    AgentProcess, EventRecord, GuardSnapshot, GuardedProcess, MonitorEvent, Outbox, Snapshot,
    WardenSnapshot,
};
pub use monitor::{Monitor, Services};
pub use report::{GuardStatus, Reporter, WardenStatus};
pub use state::SharedState;
pub use workers::{
    AgentWarden, GuardStripper, RelaunchOutcome, WardenAction, WardenPolicy, WorkerKind,
};
