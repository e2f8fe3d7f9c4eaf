use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::time::Duration;

/// Settings for stripping the single-instance guard out of the game client.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Guard {
    /// Executable name of the processes whose guard object is removed. The
    /// match is case-insensitive and against the file name only.
    pub process_name: String,

    /// Substring of the kernel object name to close. The object manager
    /// prepends a session path such as `\Sessions\1\BaseNamedObjects\`, so
    /// this only needs to be the trailing part of the name.
    pub object_name: String,

    /// How often the guard scan runs. **Measured in milliseconds**.
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub interval: Duration,

    /// Upper bound for a single object name query. Name queries against some
    /// object types never return, so a stuck query is abandoned after this
    /// long and the handle is skipped for the current scan. **Measured in
    /// milliseconds**.
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub name_query_timeout: Duration,
}

impl Default for Guard {
    fn default() -> Self {
        Self {
            process_name: "D2R.exe".into(),
            object_name: "DiabloII Check For Other Instances".into(),
            interval: Duration::from_secs(1),
            name_query_timeout: Duration::from_millis(500),
        }
    }
}

impl Guard {
    const MIN_INTERVAL: Duration = Duration::from_millis(10);
    const MIN_NAME_QUERY_TIMEOUT: Duration = Duration::from_millis(1);

    pub fn clamp(mut self) -> Self {
        self.interval = self.interval.max(Self::MIN_INTERVAL);
        self.name_query_timeout = self.name_query_timeout.max(Self::MIN_NAME_QUERY_TIMEOUT);
        self
    }
}
