use crate::event::{AgentProcess, GuardSnapshot, GuardedProcess, WardenSnapshot};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// Counters and per-process memory owned by one monitor.
#[derive(Debug, Default)]
pub struct MonitorState {
    handles_closed: u64,
    agents_terminated: u64,
    /// Guarded pids whose handle has been closed. Pruned to live pids.
    stripped: BTreeSet<u32>,
    /// Guarded processes seen by the last guard scan.
    guarded: Vec<GuardedProcess>,
    /// Agent instances seen by the last warden scan.
    agents: Vec<AgentProcess>,
    running: bool,
}

/// Shared handle to [`MonitorState`].
///
/// The lock is only taken to read or bump counters, never around a native
/// call.
#[derive(Debug, Clone, Default)]
pub struct SharedState(Arc<Mutex<MonitorState>>);

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        match self.0.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn handles_closed(&self) -> u64 {
        self.lock().handles_closed
    }

    pub fn agents_terminated(&self) -> u64 {
        self.lock().agents_terminated
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn guarded_processes(&self) -> Vec<GuardedProcess> {
        self.lock().guarded.clone()
    }

    pub fn agent_processes(&self) -> Vec<AgentProcess> {
        self.lock().agents.clone()
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.lock().running = running;
    }

    /// Count `count` closed handles in `pid` and return the new total.
    pub(crate) fn record_stripped(&self, pid: u32, count: usize) -> u64 {
        let mut state = self.lock();
        state.handles_closed = state.handles_closed.saturating_add(count as u64);
        state.stripped.insert(pid);
        state.handles_closed
    }

    /// Build the guard snapshot for the processes seen this tick, forgetting
    /// pids that have gone away.
    pub(crate) fn record_guard_scan(&self, live: &[u32]) -> GuardSnapshot {
        let mut state = self.lock();
        state.stripped.retain(|pid| live.contains(pid));
        let processes: Vec<GuardedProcess> = live
            .iter()
            .map(|&pid| GuardedProcess {
                pid,
                stripped: state.stripped.contains(&pid),
            })
            .collect();
        state.guarded.clone_from(&processes);
        GuardSnapshot {
            processes,
            handles_closed: state.handles_closed,
        }
    }

    pub(crate) fn record_terminated(&self, count: usize) -> u64 {
        let mut state = self.lock();
        state.agents_terminated = state.agents_terminated.saturating_add(count as u64);
        state.agents_terminated
    }

    pub(crate) fn record_warden_scan(&self, processes: Vec<AgentProcess>) -> WardenSnapshot {
        let mut state = self.lock();
        state.agents.clone_from(&processes);
        WardenSnapshot {
            processes,
            terminated: state.agents_terminated,
        }
    }
}
