//! Process group lifecycle.
//!
//! `Loaded → Launching → Running → Draining → {Terminated | Failed}`.
//!
//! A single controller task owns every supervised process. Supervisors report
//! exits over one channel; stop requests arrive over another; teardown races
//! those exits against one shared grace-period timer.

use std::time::Duration;

use serde::Serialize;
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{io_err, OrchestratorError};
use crate::sink::spawn_sink;
use crate::spec::{GroupSpec, ResolvedProcess};
use crate::supervisor::{self, describe, ProcessExit, StopMode, Supervisor};

// ---------------------------------------------------------------------------
// States and reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupState {
    Loaded,
    Launching,
    Running,
    Draining,
    Terminated,
    Failed,
}

impl GroupState {
    pub fn is_terminal(self) -> bool {
        matches!(self, GroupState::Terminated | GroupState::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Pending,
    Starting,
    Running,
    Stopping,
    Stopped,
    Crashed,
}

impl ProcessState {
    pub fn is_alive(self) -> bool {
        matches!(
            self,
            ProcessState::Starting | ProcessState::Running | ProcessState::Stopping
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessReport {
    pub name: String,
    pub required: bool,
    pub state: ProcessState,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupReport {
    pub state: GroupState,
    pub processes: Vec<ProcessReport>,
    /// Lines written to the combined log; filled in once the group is done.
    pub log_lines: u64,
}

impl GroupReport {
    pub fn process(&self, name: &str) -> Option<&ProcessReport> {
        self.processes.iter().find(|p| p.name == name)
    }
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

/// A validated group, ready to launch.
#[derive(Debug, Clone)]
pub struct ProcessGroup {
    processes: Vec<ResolvedProcess>,
    grace_period: Duration,
}

impl ProcessGroup {
    pub fn load(spec: &GroupSpec) -> Result<Self, OrchestratorError> {
        let processes = spec.resolve()?;
        info!(processes = processes.len(), "group loaded");
        Ok(Self {
            processes,
            grace_period: spec.grace_period,
        })
    }

    pub fn processes(&self) -> &[ResolvedProcess] {
        &self.processes
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Start the group, writing the combined log to `log`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn launch<W>(self, log: W) -> GroupHandle
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let controller = Controller::new(self.processes, self.grace_period);
        let (status_tx, status_rx) = watch::channel(controller.report(0));
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let task = tokio::spawn(controller.run(log, status_tx, stop_rx));
        GroupHandle {
            status: status_rx,
            stop_tx,
            task,
        }
    }
}

/// Handle to a launched group. Dropping it requests a stop.
#[derive(Debug)]
pub struct GroupHandle {
    status: watch::Receiver<GroupReport>,
    stop_tx: mpsc::Sender<()>,
    task: JoinHandle<GroupReport>,
}

impl GroupHandle {
    pub fn state(&self) -> GroupState {
        self.status.borrow().state
    }

    pub fn status(&self) -> GroupReport {
        self.status.borrow().clone()
    }

    /// Watch channel over status snapshots, published on every transition.
    pub fn subscribe(&self) -> watch::Receiver<GroupReport> {
        self.status.clone()
    }

    /// Request teardown. Has no effect once draining has begun.
    pub fn stop(&self) {
        let _ = self.stop_tx.try_send(());
    }

    /// Wait for the group to reach a terminal state.
    pub async fn wait(self) -> Result<GroupReport, OrchestratorError> {
        let GroupHandle {
            status: _status,
            stop_tx,
            task,
        } = self;
        let result = task
            .await
            .map_err(|e| OrchestratorError::ChannelClosed(e.to_string()));
        drop(stop_tx);
        result
    }
}

/// Launch `group` with the combined log on stdout and run it until it ends
/// on its own or the process receives SIGINT/SIGTERM.
pub async fn run_to_completion(group: ProcessGroup) -> Result<GroupReport, OrchestratorError> {
    let handle = group.launch(tokio::io::stdout());
    let mut status = handle.subscribe();
    tokio::select! {
        _ = status.wait_for(|report| report.state.is_terminal()) => {}
        signal = shutdown_signal() => {
            signal?;
            info!("received termination signal, stopping group");
            handle.stop();
        }
    }
    handle.wait().await
}

/// [`run_to_completion`] on a fresh multi-threaded runtime.
pub fn run_blocking(group: ProcessGroup) -> Result<GroupReport, OrchestratorError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run_to_completion(group))
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<(), OrchestratorError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).map_err(|e| io_err("SIGTERM handler", e))?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map_err(|e| io_err("ctrl-c handler", e)),
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<(), OrchestratorError> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| io_err("ctrl-c handler", e))
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

struct Slot {
    spec: ResolvedProcess,
    state: ProcessState,
    supervisor: Option<Supervisor>,
    exit_code: Option<i32>,
    error: Option<String>,
}

struct Controller {
    slots: Vec<Slot>,
    grace_period: Duration,
    state: GroupState,
    failed: bool,
}

impl Controller {
    fn new(processes: Vec<ResolvedProcess>, grace_period: Duration) -> Self {
        let slots = processes
            .into_iter()
            .map(|spec| Slot {
                spec,
                state: ProcessState::Pending,
                supervisor: None,
                exit_code: None,
                error: None,
            })
            .collect();
        Self {
            slots,
            grace_period,
            state: GroupState::Loaded,
            failed: false,
        }
    }

    fn report(&self, log_lines: u64) -> GroupReport {
        GroupReport {
            state: self.state,
            processes: self
                .slots
                .iter()
                .map(|slot| ProcessReport {
                    name: slot.spec.name.clone(),
                    required: slot.spec.required,
                    state: slot.state,
                    pid: slot.supervisor.as_ref().and_then(|s| s.pid),
                    exit_code: slot.exit_code,
                    error: slot.error.clone(),
                })
                .collect(),
            log_lines,
        }
    }

    fn alive(&self) -> usize {
        self.slots.iter().filter(|s| s.state.is_alive()).count()
    }

    fn transition(&mut self, state: GroupState, status: &watch::Sender<GroupReport>) {
        self.state = state;
        info!(state = ?state, "group state changed");
        status.send_replace(self.report(0));
    }

    async fn run<W>(
        mut self,
        log: W,
        status: watch::Sender<GroupReport>,
        mut stop_rx: mpsc::Receiver<()>,
    ) -> GroupReport
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, sink_task) = spawn_sink(log);
        let (exit_tx, mut exit_rx) = mpsc::unbounded_channel::<ProcessExit>();

        // Launching: strictly in declaration order.
        self.transition(GroupState::Launching, &status);
        let mut stop_requested = false;
        for index in 0..self.slots.len() {
            if !matches!(stop_rx.try_recv(), Err(mpsc::error::TryRecvError::Empty)) {
                info!("stop requested during launch");
                stop_requested = true;
                break;
            }
            while let Ok(exit) = exit_rx.try_recv() {
                self.on_exit(exit);
            }
            if self.failed {
                break;
            }

            let slot = &mut self.slots[index];
            slot.state = ProcessState::Starting;
            match supervisor::spawn(index, &slot.spec, &sink, exit_tx.clone()) {
                Ok(supervisor) => {
                    info!(process = %slot.spec.name, pid = ?supervisor.pid, "process started");
                    slot.supervisor = Some(supervisor);
                    slot.state = ProcessState::Running;
                }
                Err(err) => {
                    slot.state = ProcessState::Crashed;
                    slot.error = Some(err.to_string());
                    if slot.spec.required {
                        warn!(process = %slot.spec.name, error = %err, "required process failed to start");
                        self.failed = true;
                    } else {
                        warn!(process = %slot.spec.name, error = %err, "best-effort process failed to start");
                    }
                }
            }
            status.send_replace(self.report(0));
            if self.failed {
                break;
            }
        }
        drop(sink);

        // Running: until a stop request, a required crash, or nothing left alive.
        if !self.failed && !stop_requested {
            self.transition(GroupState::Running, &status);
            while self.alive() > 0 {
                tokio::select! {
                    Some(exit) = exit_rx.recv() => {
                        self.on_exit(exit);
                        status.send_replace(self.report(0));
                        if self.failed {
                            break;
                        }
                    }
                    _ = stop_rx.recv() => {
                        info!("stop requested");
                        break;
                    }
                }
            }
        }

        // Draining: graceful stop, one shared timer, then force.
        self.transition(GroupState::Draining, &status);
        for slot in &mut self.slots {
            if slot.state.is_alive() {
                slot.state = ProcessState::Stopping;
                if let Some(supervisor) = &slot.supervisor {
                    supervisor.stop(StopMode::Graceful);
                }
            }
        }
        status.send_replace(self.report(0));

        let grace = tokio::time::sleep(self.grace_period);
        tokio::pin!(grace);
        let mut forced = false;
        while self.alive() > 0 {
            tokio::select! {
                Some(exit) = exit_rx.recv() => {
                    self.on_exit(exit);
                    status.send_replace(self.report(0));
                }
                _ = &mut grace, if !forced => {
                    forced = true;
                    warn!(
                        remaining = self.alive(),
                        grace_ms = self.grace_period.as_millis() as u64,
                        "grace period elapsed; forcing stop"
                    );
                    for slot in self.slots.iter().filter(|s| s.state.is_alive()) {
                        if let Some(supervisor) = &slot.supervisor {
                            supervisor.stop(StopMode::Force);
                        }
                    }
                }
            }
        }
        drop(exit_tx);

        let log_lines = match sink_task.await {
            Ok(Ok(lines)) => lines,
            Ok(Err(err)) => {
                warn!(error = %err, "combined log write failed");
                0
            }
            Err(err) => {
                warn!(error = %err, "combined log task failed");
                0
            }
        };

        let terminal = if self.failed {
            GroupState::Failed
        } else {
            GroupState::Terminated
        };
        self.transition(terminal, &status);
        let report = self.report(log_lines);
        status.send_replace(report.clone());
        report
    }

    /// Record one exit. A required process crashing marks the group failed.
    fn on_exit(&mut self, exit: ProcessExit) {
        let Some(slot) = self.slots.get_mut(exit.index) else {
            return;
        };
        let stopping = slot.state == ProcessState::Stopping;
        match exit.status {
            Ok(status) => {
                slot.exit_code = status.code();
                if stopping || status.success() {
                    slot.state = ProcessState::Stopped;
                    info!(process = %slot.spec.name, status = %describe(&status), "process stopped");
                } else {
                    slot.state = ProcessState::Crashed;
                    slot.error = Some(
                        OrchestratorError::ProcessCrash {
                            process: slot.spec.name.clone(),
                            status: describe(&status),
                        }
                        .to_string(),
                    );
                }
            }
            Err(err) => {
                slot.state = ProcessState::Crashed;
                slot.error = Some(err);
            }
        }

        if slot.state == ProcessState::Crashed {
            if slot.spec.required {
                warn!(process = %slot.spec.name, error = ?slot.error, "required process crashed");
                self.failed = true;
            } else {
                warn!(process = %slot.spec.name, error = ?slot.error, "best-effort process crashed; group keeps running");
            }
        }
    }
}
