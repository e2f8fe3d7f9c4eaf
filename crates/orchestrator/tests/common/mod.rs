#![allow(dead_code)]

use kernel::{Error, ObjectCloser, ProcessRecord, ProcessTable};
use orchestrator::{Clock, GuardStatus, Reporter, WardenStatus};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const GUARD_OBJECT: &str = "DiabloII Check For Other Instances";
pub const AGENT_PATH: &str = r"C:\Program Files (x86)\Battle.net\Agent\Agent.exe";

pub fn epoch_plus(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}

#[derive(Debug)]
pub struct FixedClock(Mutex<SystemTime>);

impl FixedClock {
    pub fn new(now: SystemTime) -> Arc<Self> {
        Arc::new(Self(Mutex::new(now)))
    }

    pub fn advance(&self, by: Duration) {
        *self.0.lock().unwrap() += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> SystemTime {
        *self.0.lock().unwrap()
    }
}

#[derive(Debug, Clone)]
struct FakeProcess {
    pid: u32,
    name: String,
    created: Option<SystemTime>,
    path: Option<PathBuf>,
}

#[derive(Debug, Default)]
struct Processes {
    running: Vec<FakeProcess>,
    terminated: Vec<u32>,
    launched: Vec<PathBuf>,
    stubborn: Vec<u32>,
    fail_launch: bool,
    fail_snapshot: bool,
    next_pid: u32,
}

/// In-memory process table. Launched processes get a creation time of
/// `launch_time`.
#[derive(Debug)]
pub struct FakeProcesses {
    inner: Mutex<Processes>,
    launch_time: SystemTime,
}

impl FakeProcesses {
    pub fn new(launch_time: SystemTime) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Processes {
                next_pid: 9000,
                ..Default::default()
            }),
            launch_time,
        })
    }

    pub fn spawn(&self, pid: u32, name: &str, created: Option<SystemTime>, path: Option<&str>) {
        self.inner.lock().unwrap().running.push(FakeProcess {
            pid,
            name: name.into(),
            created,
            path: path.map(PathBuf::from),
        });
    }

    pub fn refuse_termination(&self, pid: u32) {
        self.inner.lock().unwrap().stubborn.push(pid);
    }

    pub fn fail_launch(&self) {
        self.inner.lock().unwrap().fail_launch = true;
    }

    pub fn fail_snapshot(&self, fail: bool) {
        self.inner.lock().unwrap().fail_snapshot = fail;
    }

    pub fn terminated(&self) -> Vec<u32> {
        self.inner.lock().unwrap().terminated.clone()
    }

    pub fn launched(&self) -> Vec<PathBuf> {
        self.inner.lock().unwrap().launched.clone()
    }

    pub fn pids_named(&self, name: &str) -> Vec<u32> {
        self.inner
            .lock()
            .unwrap()
            .running
            .iter()
            .filter(|process| process.name == name)
            .map(|process| process.pid)
            .collect()
    }
}

impl ProcessTable for FakeProcesses {
    fn snapshot(&self) -> Result<Vec<ProcessRecord>, Error> {
        let inner = self.inner.lock().unwrap();
        if inner.fail_snapshot {
            return Err(Error::Snapshot(io::Error::other("snapshot unavailable")));
        }
        Ok(inner
            .running
            .iter()
            .map(|process| ProcessRecord {
                pid: process.pid,
                name: process.name.clone(),
            })
            .collect())
    }

    fn creation_time(&self, pid: u32) -> Result<SystemTime, Error> {
        self.inner
            .lock()
            .unwrap()
            .running
            .iter()
            .find(|process| process.pid == pid)
            .and_then(|process| process.created)
            .ok_or(Error::Process {
                pid,
                op: "query times of",
                source: io::Error::from(io::ErrorKind::PermissionDenied),
            })
    }

    fn image_path(&self, pid: u32) -> Result<PathBuf, Error> {
        self.inner
            .lock()
            .unwrap()
            .running
            .iter()
            .find(|process| process.pid == pid)
            .and_then(|process| process.path.clone())
            .ok_or(Error::Process {
                pid,
                op: "query image of",
                source: io::Error::from(io::ErrorKind::PermissionDenied),
            })
    }

    fn terminate(&self, pid: u32, _exit_code: u32) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        if inner.stubborn.contains(&pid) {
            return Err(Error::Process {
                pid,
                op: "terminate",
                source: io::Error::from(io::ErrorKind::PermissionDenied),
            });
        }
        let before = inner.running.len();
        inner.running.retain(|process| process.pid != pid);
        if inner.running.len() == before {
            return Err(Error::Process {
                pid,
                op: "terminate",
                source: io::Error::from(io::ErrorKind::InvalidInput),
            });
        }
        inner.terminated.push(pid);
        Ok(())
    }

    fn launch(&self, path: &Path) -> Result<u32, Error> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_launch {
            return Err(Error::ExecutableMissing(path.to_owned()));
        }
        inner.next_pid += 1;
        let pid = inner.next_pid;
        let name = path
            .to_string_lossy()
            .rsplit(['\\', '/'])
            .next()
            .unwrap_or_default()
            .to_owned();
        inner.running.push(FakeProcess {
            pid,
            name,
            created: Some(self.launch_time),
            path: Some(path.to_owned()),
        });
        inner.launched.push(path.to_owned());
        Ok(pid)
    }
}

/// Closer holding a number of guard handles per pid.
#[derive(Debug, Default)]
pub struct FakeCloser {
    handles: Mutex<HashMap<u32, usize>>,
    calls: AtomicUsize,
}

impl FakeCloser {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn give(&self, pid: u32, handles: usize) {
        self.handles.lock().unwrap().insert(pid, handles);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ObjectCloser for FakeCloser {
    fn close_by_name(&self, pid: u32, name: &str) -> Result<usize, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.handles.lock().unwrap().remove(&pid) {
            Some(count) if count > 0 => Ok(count),
            _ => Err(Error::NotFound {
                pid,
                name: name.into(),
            }),
        }
    }
}

#[derive(Debug, Default)]
pub struct RecordingReporter {
    pub lines: Mutex<Vec<String>>,
    pub guard: Mutex<Vec<GuardStatus>>,
    pub warden: Mutex<Vec<WardenStatus>>,
}

impl RecordingReporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn last_guard(&self) -> Option<GuardStatus> {
        self.guard.lock().unwrap().last().cloned()
    }

    pub fn last_warden(&self) -> Option<WardenStatus> {
        self.warden.lock().unwrap().last().cloned()
    }
}

impl Reporter for RecordingReporter {
    fn log(&self, _at: SystemTime, line: &str) {
        self.lines.lock().unwrap().push(line.to_owned());
    }

    fn guard_status(&self, status: &GuardStatus) {
        self.guard.lock().unwrap().push(status.clone());
    }

    fn warden_status(&self, status: &WardenStatus) {
        self.warden.lock().unwrap().push(status.clone());
    }
}
