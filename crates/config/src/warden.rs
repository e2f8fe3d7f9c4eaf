use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::path::PathBuf;
use std::time::Duration;

/// Settings for the update agent warden, which restarts the agent once it
/// has been alive for too long.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Warden {
    /// Whether the agent is watched at all. When off, the warden worker still
    /// runs but never looks at the process table.
    pub enabled: bool,

    /// Executable name of the agent.
    pub process_name: String,

    /// How often the agent is checked. Clamped to 1..=10 seconds.
    /// **Measured in seconds**.
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub interval: Duration,

    /// Age of the oldest running instance at which all instances are
    /// terminated. **Measured in seconds**.
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub max_age: Duration,

    /// Start a fresh instance after terminating the old ones.
    pub relaunch: bool,

    /// Executable used for the relaunch when the image path of the running
    /// agent cannot be read.
    pub fallback_path: PathBuf,
}

impl Default for Warden {
    fn default() -> Self {
        Self {
            enabled: true,
            process_name: "Agent.exe".into(),
            interval: Duration::from_secs(1),
            max_age: Duration::from_secs(7),
            relaunch: true,
            fallback_path: PathBuf::from(r"C:\ProgramData\Battle.net\Agent\Agent.exe"),
        }
    }
}

impl Warden {
    pub const MIN_INTERVAL: Duration = Duration::from_secs(1);
    pub const MAX_INTERVAL: Duration = Duration::from_secs(10);

    pub fn clamp(mut self) -> Self {
        self.interval = self.interval.clamp(Self::MIN_INTERVAL, Self::MAX_INTERVAL);
        self
    }
}
