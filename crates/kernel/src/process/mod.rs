//! Process enumeration and control by executable name.

#[cfg(windows)]
mod win32;

#[cfg(windows)]
pub use win32::Win32Processes;

use crate::error::Error;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Exit code handed to processes we terminate.
pub const TERMINATE_EXIT_CODE: u32 = 1;

/// 100 ns ticks between 1601-01-01 and 1970-01-01.
const FILETIME_UNIX_OFFSET: u64 = 116_444_736_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRecord {
    pub pid: u32,
    /// Executable file name, e.g. `Agent.exe`.
    pub name: String,
}

/// The operating system's process table.
pub trait ProcessTable: Send + Sync {
    fn snapshot(&self) -> Result<Vec<ProcessRecord>, Error>;

    fn creation_time(&self, pid: u32) -> Result<SystemTime, Error>;

    /// Full path of the process image.
    fn image_path(&self, pid: u32) -> Result<PathBuf, Error>;

    fn terminate(&self, pid: u32, exit_code: u32) -> Result<(), Error>;

    /// Start `path` detached from this process and return its pid.
    fn launch(&self, path: &Path) -> Result<u32, Error>;
}

/// All processes whose executable name equals `name`, ignoring case.
pub fn find_by_name(table: &dyn ProcessTable, name: &str) -> Result<Vec<ProcessRecord>, Error> {
    let wanted = name.to_lowercase();
    Ok(table
        .snapshot()?
        .into_iter()
        .filter(|process| process.name.to_lowercase() == wanted)
        .collect())
}

pub fn is_running(table: &dyn ProcessTable, name: &str) -> Result<bool, Error> {
    Ok(!find_by_name(table, name)?.is_empty())
}

/// Outcome of [`kill_by_name`] when at least one process went down.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KillReport {
    pub killed: Vec<u32>,
    pub failed: usize,
}

/// Terminate every process named `name`.
///
/// Some terminations failing is still a success. Only a batch where nothing
/// could be terminated is an error.
pub fn kill_by_name(table: &dyn ProcessTable, name: &str) -> Result<KillReport, Error> {
    let targets = find_by_name(table, name)?;
    if targets.is_empty() {
        return Err(Error::ProcessNotRunning(name.to_owned()));
    }

    let mut report = KillReport::default();
    let mut last_error = None;
    for process in &targets {
        match table.terminate(process.pid, TERMINATE_EXIT_CODE) {
            Ok(()) => {
                info!(pid = process.pid, name, "terminated process");
                report.killed.push(process.pid);
            }
            Err(err) => {
                debug!(pid = process.pid, name, error = %err, "failed to terminate process");
                report.failed += 1;
                last_error = Some(err);
            }
        }
    }

    match last_error {
        Some(source) if report.killed.is_empty() => Err(Error::NoneTerminated {
            name: name.to_owned(),
            attempted: targets.len(),
            source: Box::new(source),
        }),
        _ => Ok(report),
    }
}

/// Time since `creation`, zero if the clock says it is in the future.
pub fn age_of(creation: SystemTime, now: SystemTime) -> Duration {
    now.duration_since(creation).unwrap_or(Duration::ZERO)
}

/// Convert a `FILETIME` tick count. Times before the Unix epoch are not
/// representable and yield `None`.
pub fn filetime_to_system_time(ticks: u64) -> Option<SystemTime> {
    let since_unix = ticks.checked_sub(FILETIME_UNIX_OFFSET)?;
    let secs = since_unix / 10_000_000;
    let nanos = (since_unix % 10_000_000) as u32 * 100;
    UNIX_EPOCH.checked_add(Duration::new(secs, nanos))
}

/// Spawn `path` without a console window in its own process group so it
/// outlives us.
pub fn launch_detached(path: &Path) -> Result<u32, Error> {
    if !path.is_file() {
        return Err(Error::ExecutableMissing(path.to_owned()));
    }

    let mut command = Command::new(path);
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    if let Some(dir) = path.parent() {
        command.current_dir(dir);
    }

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        command.creation_flags(CREATE_NO_WINDOW | CREATE_NEW_PROCESS_GROUP);
    }

    let child = command.spawn().map_err(|source| Error::Launch {
        path: path.to_owned(),
        source,
    })?;
    Ok(child.id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Table {
        processes: Vec<ProcessRecord>,
        stubborn: HashSet<u32>,
        terminated: Mutex<Vec<u32>>,
    }

    impl Table {
        fn with(names: &[(u32, &str)]) -> Self {
            Self {
                processes: names
                    .iter()
                    .map(|(pid, name)| ProcessRecord {
                        pid: *pid,
                        name: (*name).to_owned(),
                    })
                    .collect(),
                ..Default::default()
            }
        }
    }

    impl ProcessTable for Table {
        fn snapshot(&self) -> Result<Vec<ProcessRecord>, Error> {
            Ok(self.processes.clone())
        }

        fn creation_time(&self, _pid: u32) -> Result<SystemTime, Error> {
            Ok(UNIX_EPOCH)
        }

        fn image_path(&self, _pid: u32) -> Result<PathBuf, Error> {
            Err(Error::Unsupported)
        }

        fn terminate(&self, pid: u32, _exit_code: u32) -> Result<(), Error> {
            if self.stubborn.contains(&pid) {
                return Err(Error::Process {
                    pid,
                    op: "terminate",
                    source: io::Error::from(io::ErrorKind::PermissionDenied),
                });
            }
            self.terminated.lock().unwrap().push(pid);
            Ok(())
        }

        fn launch(&self, _path: &Path) -> Result<u32, Error> {
            Err(Error::Unsupported)
        }
    }

    #[test]
    fn name_match_ignores_case_but_not_substrings() {
        let table = Table::with(&[(1, "Agent.exe"), (2, "agent.EXE"), (3, "Agent.exe.bak"), (4, "D2R.exe")]);
        let pids: Vec<u32> = find_by_name(&table, "Agent.exe")
            .unwrap()
            .iter()
            .map(|p| p.pid)
            .collect();
        assert_eq!(pids, vec![1, 2]);
        assert!(is_running(&table, "d2r.exe").unwrap());
        assert!(!is_running(&table, "Battle.net.exe").unwrap());
    }

    #[test]
    fn kill_reports_partial_success() {
        let mut table = Table::with(&[(1, "Agent.exe"), (2, "Agent.exe"), (3, "Agent.exe")]);
        table.stubborn.insert(2);

        let report = kill_by_name(&table, "Agent.exe").unwrap();
        assert_eq!(report.killed, vec![1, 3]);
        assert_eq!(report.failed, 1);
    }

    #[test]
    fn kill_distinguishes_absent_from_refused() {
        let mut table = Table::with(&[(7, "Agent.exe")]);
        let absent = kill_by_name(&table, "D2R.exe").unwrap_err();
        assert_eq!(absent.kind(), crate::ErrorKind::NotFound);

        table.stubborn.insert(7);
        let refused = kill_by_name(&table, "Agent.exe").unwrap_err();
        assert!(matches!(refused, Error::NoneTerminated { attempted: 1, .. }));
        assert_eq!(refused.kind(), crate::ErrorKind::Permission);
    }

    #[test]
    fn age_saturates_at_zero() {
        let now = UNIX_EPOCH + Duration::from_secs(100);
        assert_eq!(age_of(now - Duration::from_millis(6900), now), Duration::from_millis(6900));
        assert_eq!(age_of(now + Duration::from_secs(1), now), Duration::ZERO);
    }

    #[test]
    fn filetime_conversion() {
        assert_eq!(filetime_to_system_time(FILETIME_UNIX_OFFSET), Some(UNIX_EPOCH));
        assert_eq!(
            filetime_to_system_time(FILETIME_UNIX_OFFSET + 15_000_000),
            Some(UNIX_EPOCH + Duration::from_millis(1500))
        );
        assert_eq!(filetime_to_system_time(0), None);
    }

    #[test]
    fn launching_missing_executable_fails_early() {
        let err = launch_detached(Path::new("/definitely/not/here/Agent.exe")).unwrap_err();
        assert!(matches!(err, Error::ExecutableMissing(_)));
    }
}
