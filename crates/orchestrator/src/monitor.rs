use crate::clock::{Clock, SystemClock};
use crate::error::Error;
use crate::event::{self, AgentProcess, GuardedProcess};
use crate::report::Reporter;
use crate::state::SharedState;
use crate::workers::{self, AgentWarden, GuardStripper, Relay, WardenPolicy, WorkerGauge, WorkerKind};
use config::Config;
use kernel::{BufferPolicy, HandleCloser, HandleResolver, ObjectCloser, ProcessTable};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Everything the monitor talks to.
pub struct Services {
    pub processes: Arc<dyn ProcessTable>,
    pub closer: Arc<dyn ObjectCloser>,
    pub reporter: Arc<dyn Reporter>,
    pub clock: Arc<dyn Clock>,
}

impl Services {
    /// Services backed by the live operating system.
    pub fn system(config: &Config, reporter: Arc<dyn Reporter>) -> Result<Self, Error> {
        let api = kernel::system_api()?;
        let processes = kernel::system_processes()?;
        let resolver = HandleResolver::new(
            api,
            buffer_policy(&config.native),
            config.guard.name_query_timeout,
        );
        Ok(Self {
            processes,
            closer: Arc::new(HandleCloser::new(resolver)),
            reporter,
            clock: Arc::new(SystemClock),
        })
    }
}

pub fn buffer_policy(native: &config::Native) -> BufferPolicy {
    BufferPolicy {
        initial: native.initial_buffer,
        margin: native.buffer_margin,
        max_attempts: native.max_attempts,
    }
}

struct Running {
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

/// Runs the guard stripper, the agent warden and the relay as one unit.
///
/// Counters live as long as the monitor and survive restarts.
pub struct Monitor {
    config: Config,
    services: Services,
    state: SharedState,
    gauge: WorkerGauge,
    running: Mutex<Option<Running>>,
}

impl Monitor {
    pub fn new(config: Config, services: Services) -> Self {
        Self {
            config,
            services,
            state: SharedState::new(),
            gauge: WorkerGauge::default(),
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Spawn the workers. Returns `false` if they are already running.
    pub async fn start(&self) -> bool {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return false;
        }

        let cancel = CancellationToken::new();
        let (outbox, inbox) = event::channel(self.config.report.snapshot_capacity);

        let guard = GuardStripper::new(
            &self.config.guard,
            Arc::clone(&self.services.processes),
            Arc::clone(&self.services.closer),
            Arc::clone(&self.services.clock),
            self.state.clone(),
            outbox.clone(),
        );
        let warden = AgentWarden::new(
            WardenPolicy::from(&self.config.warden),
            Arc::clone(&self.services.processes),
            Arc::clone(&self.services.clock),
            self.state.clone(),
            outbox,
        );
        let relay = Relay::new(
            inbox,
            Arc::clone(&self.services.reporter),
            self.config.report.interval,
        );

        let workers = vec![
            tokio::spawn(workers::run_periodic(
                WorkerKind::Guard,
                self.config.guard.interval,
                cancel.clone(),
                self.gauge.enter(),
                move || {
                    guard.tick();
                },
            )),
            tokio::spawn(workers::run_periodic(
                WorkerKind::Warden,
                self.config.warden.interval,
                cancel.clone(),
                self.gauge.enter(),
                move || {
                    warden.tick();
                },
            )),
            tokio::spawn(relay.run(cancel.clone(), self.gauge.enter())),
        ];

        self.state.set_running(true);
        *running = Some(Running { cancel, workers });
        info!(
            guard = %self.config.guard.process_name,
            warden = self.config.warden.enabled,
            "monitor started"
        );
        true
    }

    /// Cancel the workers and wait for all of them to exit. Returns `false`
    /// if nothing was running.
    pub async fn stop(&self) -> Result<bool, Error> {
        let mut running = self.running.lock().await;
        let Some(Running { cancel, workers }) = running.take() else {
            return Ok(false);
        };

        cancel.cancel();
        let results = futures::future::join_all(workers).await;
        self.state.set_running(false);
        for result in results {
            result?;
        }

        info!(
            handles_closed = self.state.handles_closed(),
            agents_terminated = self.state.agents_terminated(),
            "monitor stopped"
        );
        Ok(true)
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    pub fn handles_closed(&self) -> u64 {
        self.state.handles_closed()
    }

    pub fn agents_terminated(&self) -> u64 {
        self.state.agents_terminated()
    }

    /// Guarded processes seen by the most recent guard scan.
    pub fn guarded_processes(&self) -> Vec<GuardedProcess> {
        self.state.guarded_processes()
    }

    /// Agent instances seen by the most recent warden scan.
    pub fn agent_processes(&self) -> Vec<AgentProcess> {
        self.state.agent_processes()
    }

    /// Worker tasks that have been spawned and not yet exited.
    pub fn active_workers(&self) -> usize {
        self.gauge.active()
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.cancel.cancel();
        }
    }
}
