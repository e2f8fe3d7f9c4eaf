use crate::event::{GuardSnapshot, WardenSnapshot};
use std::time::SystemTime;

/// Whatever presents the monitor to a human: a console logger, a window.
///
/// Calls come from the relay task and must not block for long.
pub trait Reporter: Send + Sync {
    fn log(&self, at: SystemTime, line: &str);
    fn guard_status(&self, status: &GuardStatus);
    fn warden_status(&self, status: &WardenStatus);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuardStatus {
    pub count: usize,
    /// One `PID <n> - <state>` line per process.
    pub process_list: String,
    pub handles_closed: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WardenStatus {
    pub count: usize,
    /// One `PID <n> - uptime: <s>s` line per process.
    pub process_list: String,
    pub terminated: u64,
}

impl From<&GuardSnapshot> for GuardStatus {
    fn from(snapshot: &GuardSnapshot) -> Self {
        let process_list = snapshot
            .processes
            .iter()
            .map(|process| {
                let state = if process.stripped {
                    "handle closed"
                } else {
                    "monitoring"
                };
                format!("PID {} - {state}", process.pid)
            })
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            count: snapshot.processes.len(),
            process_list,
            handles_closed: snapshot.handles_closed,
        }
    }
}

impl From<&WardenSnapshot> for WardenStatus {
    fn from(snapshot: &WardenSnapshot) -> Self {
        let process_list = snapshot
            .processes
            .iter()
            .map(|process| match process.age {
                Some(age) => format!("PID {} - uptime: {:.1}s", process.pid, age.as_secs_f64()),
                None => format!("PID {} - uptime: unknown", process.pid),
            })
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            count: snapshot.processes.len(),
            process_list,
            terminated: snapshot.terminated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{AgentProcess, GuardedProcess};
    use std::time::Duration;

    #[test]
    fn renders_process_lists() {
        let guard = GuardStatus::from(&GuardSnapshot {
            processes: vec![
                GuardedProcess {
                    pid: 10,
                    stripped: true,
                },
                GuardedProcess {
                    pid: 11,
                    stripped: false,
                },
            ],
            handles_closed: 3,
        });
        assert_eq!(guard.count, 2);
        assert_eq!(guard.process_list, "PID 10 - handle closed\nPID 11 - monitoring");
        assert_eq!(guard.handles_closed, 3);

        let warden = WardenStatus::from(&WardenSnapshot {
            processes: vec![
                AgentProcess {
                    pid: 20,
                    age: Some(Duration::from_millis(3300)),
                },
                AgentProcess { pid: 21, age: None },
            ],
            terminated: 1,
        });
        assert_eq!(warden.process_list, "PID 20 - uptime: 3.3s\nPID 21 - uptime: unknown");
    }

    #[test]
    fn empty_snapshot_renders_empty_list() {
        let status = WardenStatus::from(&WardenSnapshot::default());
        assert_eq!(status.count, 0);
        assert!(status.process_list.is_empty());
    }
}
