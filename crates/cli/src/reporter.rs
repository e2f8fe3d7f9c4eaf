use orchestrator::{GuardStatus, Reporter, WardenStatus};
use std::sync::Mutex;
use std::time::SystemTime;
use tracing::{debug, info};

/// Console presentation: events go to the log at info level, status
/// refreshes at debug level and only when they differ from the last one.
#[derive(Debug, Default)]
pub struct LogReporter {
    last: Mutex<(Option<GuardStatus>, Option<WardenStatus>)>,
}

impl LogReporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Reporter for LogReporter {
    fn log(&self, _at: SystemTime, line: &str) {
        info!("{line}");
    }

    fn guard_status(&self, status: &GuardStatus) {
        let mut last = match self.last.lock() {
            Ok(last) => last,
            Err(poisoned) => poisoned.into_inner(),
        };
        if last.0.as_ref() == Some(status) {
            return;
        }
        debug!(
            detected = status.count,
            handles_closed = status.handles_closed,
            processes = %status.process_list,
            "game status"
        );
        last.0 = Some(status.clone());
    }

    fn warden_status(&self, status: &WardenStatus) {
        let mut last = match self.last.lock() {
            Ok(last) => last,
            Err(poisoned) => poisoned.into_inner(),
        };
        if last.1.as_ref() == Some(status) {
            return;
        }
        debug!(
            detected = status.count,
            terminated = status.terminated,
            processes = %status.process_list,
            "agent status"
        );
        last.1 = Some(status.clone());
    }
}
