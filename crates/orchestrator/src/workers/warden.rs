use super::{ScanHealth, WorkerKind};
use crate::clock::Clock;
use crate::event::{AgentProcess, MonitorEvent, Outbox, Snapshot};
use crate::state::SharedState;
use kernel::{ErrorKind, ProcessTable, process};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// What the warden enforces, lifted out of [`config::Warden`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WardenPolicy {
    pub enabled: bool,
    pub process_name: String,
    pub max_age: Duration,
    pub relaunch: bool,
    pub fallback_path: PathBuf,
}

impl From<&config::Warden> for WardenPolicy {
    fn from(config: &config::Warden) -> Self {
        Self {
            enabled: config.enabled,
            process_name: config.process_name.clone(),
            max_age: config.max_age,
            relaunch: config.relaunch,
            fallback_path: config.fallback_path.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelaunchOutcome {
    Launched { path: PathBuf, pid: u32 },
    Failed { path: PathBuf, reason: String },
}

/// Result of one warden tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WardenAction {
    /// The warden is disabled.
    Idle,
    /// The process table could not be read.
    ScanFailed,
    NotRunning,
    /// Running, but the oldest instance is below the threshold. `None` when
    /// no instance's age could be read.
    Young { oldest: Option<Duration> },
    Cycled {
        terminated: usize,
        relaunch: Option<RelaunchOutcome>,
    },
    /// Old enough, but no instance could be terminated.
    KillFailed,
}

/// Restarts the agent once its oldest instance reaches the age limit.
pub struct AgentWarden {
    processes: Arc<dyn ProcessTable>,
    clock: Arc<dyn Clock>,
    state: SharedState,
    outbox: Outbox,
    policy: WardenPolicy,
    health: ScanHealth,
}

impl AgentWarden {
    pub fn new(
        policy: WardenPolicy,
        processes: Arc<dyn ProcessTable>,
        clock: Arc<dyn Clock>,
        state: SharedState,
        outbox: Outbox,
    ) -> Self {
        Self {
            processes,
            clock,
            state,
            outbox,
            policy,
            health: ScanHealth::default(),
        }
    }

    pub fn policy(&self) -> &WardenPolicy {
        &self.policy
    }

    pub fn tick(&self) -> WardenAction {
        if !self.policy.enabled {
            return WardenAction::Idle;
        }

        let agents = match process::find_by_name(&*self.processes, &self.policy.process_name) {
            Ok(agents) => {
                self.health.succeeded(WorkerKind::Warden);
                agents
            }
            Err(err) => {
                self.health
                    .failed(WorkerKind::Warden, &err, &self.outbox, &*self.clock);
                return WardenAction::ScanFailed;
            }
        };

        let now = self.clock.now();
        let processes: Vec<AgentProcess> = agents
            .iter()
            .map(|agent| {
                let age = match self.processes.creation_time(agent.pid) {
                    Ok(created) => Some(process::age_of(created, now)),
                    Err(err) => {
                        trace!(pid = agent.pid, error = %err, "creation time unavailable");
                        None
                    }
                };
                AgentProcess {
                    pid: agent.pid,
                    age,
                }
            })
            .collect();

        let oldest = processes
            .iter()
            .filter_map(|process| process.age.map(|age| (process.pid, age)))
            .max_by_key(|(_, age)| *age);

        let action = match oldest {
            _ if processes.is_empty() => WardenAction::NotRunning,
            Some((pid, age)) if age >= self.policy.max_age => {
                debug!(pid, ?age, max_age = ?self.policy.max_age, "agent reached age limit");
                self.cycle(pid)
            }
            oldest => WardenAction::Young {
                oldest: oldest.map(|(_, age)| age),
            },
        };

        let snapshot = self.state.record_warden_scan(processes);
        if !self.outbox.snapshot(Snapshot::Warden(snapshot)) {
            trace!("relay busy, warden snapshot dropped");
        }
        action
    }

    /// Terminate every instance, then start one from the oldest instance's
    /// image.
    fn cycle(&self, oldest_pid: u32) -> WardenAction {
        // Read the path first, the process is about to disappear.
        let path = match self.processes.image_path(oldest_pid) {
            Ok(path) if !path.as_os_str().is_empty() => path,
            Ok(_) => self.policy.fallback_path.clone(),
            Err(err) => {
                debug!(pid = oldest_pid, error = %err, "using fallback agent path");
                self.policy.fallback_path.clone()
            }
        };

        let report = match process::kill_by_name(&*self.processes, &self.policy.process_name) {
            Ok(report) => report,
            Err(err) => {
                match err.kind() {
                    ErrorKind::NotFound => trace!("agent exited before termination"),
                    ErrorKind::Permission => debug!(error = %err, "agent termination denied"),
                    _ => warn!(error = %err, "failed to terminate agent"),
                }
                return WardenAction::KillFailed;
            }
        };

        let terminated = report.killed.len();
        let total = self.state.record_terminated(terminated);
        info!(terminated, failed = report.failed, total, "agent terminated");
        self.outbox.event(
            self.clock.now(),
            MonitorEvent::AgentsTerminated {
                process: self.policy.process_name.clone(),
                count: terminated,
            },
        );

        if report.failed > 0 {
            warn!(
                survivors = report.failed,
                "agent instance survived termination, relaunch skipped"
            );
            return WardenAction::Cycled {
                terminated,
                relaunch: None,
            };
        }

        let relaunch = self.policy.relaunch.then(|| self.relaunch(path));
        WardenAction::Cycled {
            terminated,
            relaunch,
        }
    }

    fn relaunch(&self, path: PathBuf) -> RelaunchOutcome {
        match self.processes.launch(&path) {
            Ok(pid) => {
                info!(pid, path = %path.display(), "agent relaunched");
                self.outbox.event(
                    self.clock.now(),
                    MonitorEvent::AgentRelaunched {
                        path: path.clone(),
                        pid,
                    },
                );
                RelaunchOutcome::Launched { path, pid }
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "agent relaunch failed");
                let reason = err.to_string();
                self.outbox.event(
                    self.clock.now(),
                    MonitorEvent::AgentRelaunchFailed {
                        path: path.clone(),
                        reason: reason.clone(),
                    },
                );
                RelaunchOutcome::Failed { path, reason }
            }
        }
    }
}
