use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::time::Duration;

#[serde_as]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Report {
    /// How often coalesced status snapshots are pushed to the presentation
    /// layer. Discrete events are forwarded as soon as they arrive.
    /// **Measured in milliseconds**.
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub interval: Duration,

    /// Number of status snapshots that may queue up before new ones are
    /// dropped.
    pub snapshot_capacity: usize,
}

impl Default for Report {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            snapshot_capacity: 10,
        }
    }
}

impl Report {
    pub fn clamp(self) -> Self {
        Self {
            interval: self.interval.max(Duration::from_millis(10)),
            snapshot_capacity: self.snapshot_capacity.max(1),
        }
    }
}
