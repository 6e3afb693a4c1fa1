use crate::config::AppSpec;
use crate::error::{Result, WardenError};
use crate::logs::{route_pipes, LogSink, SinkPaths};
use crate::process::lifecycle::{ExitEvent, InstanceState, InstanceStatus};
use crate::process::restart::{CrashTracker, Decision, RestartPolicy};
use crate::process::spawner::spawn_instance;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Point-in-time view of one instance, published on a watch channel by the
/// instance task and carried over IPC for status queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    pub app: String,
    pub slot: String,
    pub status: InstanceStatus,
    pub pid: Option<u32>,
    pub started_at: Option<SystemTime>,
    pub restarts: u64,
    pub ceiling_restarts: u64,
    pub last_exit: Option<ExitEvent>,
    pub dropped_log_lines: u64,
    pub memory_bytes: u64,
}

impl InstanceSnapshot {
    pub fn uptime_secs(&self) -> u64 {
        match (self.status, self.started_at) {
            (InstanceStatus::Running | InstanceStatus::Stopping, Some(t)) => SystemTime::now()
                .duration_since(t)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            _ => 0,
        }
    }
}

/// Control messages accepted by an instance task. Every control operation
/// on an instance flows through this one channel, which is what serializes
/// it against exit events and the backoff timer.
enum InstanceMsg {
    Start { reply: oneshot::Sender<Result<()>> },
    Stop { reply: oneshot::Sender<Result<()>> },
    Restart { reply: oneshot::Sender<Result<()>> },
    MemorySample { bytes: u64 },
    Shutdown,
}

/// Handle owned by the supervisor for one instance slot.
pub struct InstanceHandle {
    app: String,
    slot: String,
    ctrl: mpsc::Sender<InstanceMsg>,
    snapshot: watch::Receiver<InstanceSnapshot>,
    task: JoinHandle<()>,
}

impl InstanceHandle {
    /// Spawn the actor task for one instance slot. The instance starts out
    /// `stopped`; issue `start` to launch it.
    pub fn spawn(spec: Arc<AppSpec>, slot: String, log_dir: PathBuf) -> Self {
        let (ctrl_tx, ctrl_rx) = mpsc::channel(16);

        let initial = InstanceSnapshot {
            app: spec.name.clone(),
            slot: slot.clone(),
            status: InstanceStatus::Stopped,
            pid: None,
            started_at: None,
            restarts: 0,
            ceiling_restarts: 0,
            last_exit: None,
            dropped_log_lines: 0,
            memory_bytes: 0,
        };
        let (snapshot_tx, snapshot_rx) = watch::channel(initial);

        let actor = InstanceActor {
            policy: RestartPolicy::new(spec.restart, spec.backoff),
            spec: Arc::clone(&spec),
            slot: slot.clone(),
            log_dir,
            state: InstanceState::new(),
            tracker: CrashTracker::new(),
            ctrl: ctrl_rx,
            snapshot: snapshot_tx,
            dropped: Arc::new(AtomicU64::new(0)),
            memory_bytes: 0,
            pending_reply: None,
        };

        let task = tokio::spawn(actor.run());

        Self {
            app: spec.name.clone(),
            slot,
            ctrl: ctrl_tx,
            snapshot: snapshot_rx,
            task,
        }
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn slot(&self) -> &str {
        &self.slot
    }

    pub fn snapshot(&self) -> InstanceSnapshot {
        self.snapshot.borrow().clone()
    }

    pub async fn start(&self) -> Result<()> {
        self.request(|reply| InstanceMsg::Start { reply }).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.request(|reply| InstanceMsg::Stop { reply }).await
    }

    pub async fn restart(&self) -> Result<()> {
        self.request(|reply| InstanceMsg::Restart { reply }).await
    }

    /// Deliver a memory sample from the monitor. Never blocks; if the
    /// control queue is full the sample waits for the next interval.
    pub fn notify_memory(&self, bytes: u64) {
        let _ = self.ctrl.try_send(InstanceMsg::MemorySample { bytes });
    }

    /// Stop the child if one is running and terminate the actor task.
    pub async fn shutdown(self) {
        let _ = self.ctrl.send(InstanceMsg::Shutdown).await;
        let _ = self.task.await;
    }

    async fn request<F>(&self, make: F) -> Result<()>
    where
        F: FnOnce(oneshot::Sender<Result<()>>) -> InstanceMsg,
    {
        let (tx, rx) = oneshot::channel();
        self.ctrl
            .send(make(tx))
            .await
            .map_err(|_| WardenError::Other(format!("Instance task '{}' is gone", self.slot)))?;
        rx.await.map_err(|_| {
            WardenError::Other(format!("Instance task '{}' dropped reply", self.slot))
        })?
    }
}

/// Where the actor loop goes next. Keeping the lifecycle as an explicit
/// phase machine (instead of nested calls) means exit events, control
/// messages and the backoff timer all resolve through one loop.
enum Phase {
    /// Resting in `stopped` or `failed`, waiting for a control message
    Idle,
    /// Attempt to spawn the child
    Launch,
    /// Child is running; watch it and the control channel
    Supervise(Child),
    /// A crash was recorded; consult the restart policy
    Decide,
    /// Waiting out a backoff delay; cancellable by stop
    Backoff(Duration),
    /// Daemon shutdown; exit the task
    Shutdown,
}

struct InstanceActor {
    spec: Arc<AppSpec>,
    slot: String,
    log_dir: PathBuf,
    policy: RestartPolicy,
    state: InstanceState,
    tracker: CrashTracker,
    ctrl: mpsc::Receiver<InstanceMsg>,
    snapshot: watch::Sender<InstanceSnapshot>,
    dropped: Arc<AtomicU64>,
    memory_bytes: u64,
    /// Caller waiting on the outcome of an in-flight start/restart
    pending_reply: Option<oneshot::Sender<Result<()>>>,
}

impl InstanceActor {
    async fn run(mut self) {
        self.publish();

        let mut phase = Phase::Idle;
        loop {
            phase = match phase {
                Phase::Idle => self.idle().await,
                Phase::Launch => self.launch(),
                Phase::Supervise(child) => self.supervise(child).await,
                Phase::Decide => self.decide(),
                Phase::Backoff(delay) => self.backoff(delay).await,
                Phase::Shutdown => break,
            };
        }

        debug!(instance = %self.slot, "instance task exiting");
    }

    /// Wait in a terminal state for a control message.
    async fn idle(&mut self) -> Phase {
        loop {
            let msg = match self.ctrl.recv().await {
                Some(msg) => msg,
                None => return Phase::Shutdown,
            };

            match msg {
                InstanceMsg::Start { reply } | InstanceMsg::Restart { reply } => {
                    // An explicit (re)start clears any crash history,
                    // including a failed verdict.
                    self.tracker.reset();
                    self.state.mark_starting();
                    self.publish();
                    self.pending_reply = Some(reply);
                    return Phase::Launch;
                }
                InstanceMsg::Stop { reply } => {
                    // Already stopped; idempotent
                    let _ = reply.send(Ok(()));
                }
                InstanceMsg::MemorySample { .. } => {}
                InstanceMsg::Shutdown => return Phase::Shutdown,
            }
        }
    }

    /// Spawn the child and wire up output routing. Launch failures surface
    /// synchronously to a waiting caller and then go through the policy
    /// like any other crash.
    fn launch(&mut self) -> Phase {
        match self.spawn_child() {
            Ok(child) => {
                self.reply_pending(Ok(()));
                info!(instance = %self.slot, pid = self.state.pid.unwrap_or(0), "instance running");
                Phase::Supervise(child)
            }
            Err(e) => {
                info!(instance = %self.slot, "launch failed: {}", e);
                self.reply_pending(Err(e));
                self.record_crash(None);
                Phase::Decide
            }
        }
    }

    fn spawn_child(&mut self) -> Result<Child> {
        let spawned = spawn_instance(&self.spec, &self.slot)?;
        let mut child = spawned.child;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let paths = SinkPaths::resolve(&self.spec, &self.slot, &self.log_dir);
        let timestamps = self.spec.time;
        let slot = self.slot.clone();
        let dropped = Arc::clone(&self.dropped);

        tokio::spawn(async move {
            let sink = LogSink::open(&slot, &paths, timestamps).await;
            match (stdout, stderr) {
                (Some(out), Some(err)) => {
                    route_pipes(out, err, sink, dropped).finished().await;
                }
                _ => warn!(instance = %slot, "child pipes unavailable, output discarded"),
            }
        });

        self.state.mark_running(spawned.pid);
        self.publish();

        Ok(child)
    }

    /// Watch a running child until it exits or a control operation ends the
    /// run.
    async fn supervise(&mut self, mut child: Child) -> Phase {
        loop {
            tokio::select! {
                status = child.wait() => {
                    let exit = status.ok().map(ExitEvent::from_status);
                    self.record_crash(exit);
                    return Phase::Decide;
                }
                msg = self.ctrl.recv() => {
                    let msg = match msg {
                        Some(msg) => msg,
                        None => {
                            let _ = self.stop_child(&mut child).await;
                            self.state.mark_stopped();
                            self.publish();
                            return Phase::Shutdown;
                        }
                    };

                    match msg {
                        InstanceMsg::Stop { reply } => {
                            let result = self.stop_child(&mut child).await;
                            self.state.mark_stopped();
                            self.publish();
                            let _ = reply.send(result);
                            return Phase::Idle;
                        }
                        InstanceMsg::Restart { reply } => {
                            if let Err(e) = self.stop_child(&mut child).await {
                                let _ = reply.send(Err(e));
                                self.state.mark_stopped();
                                self.publish();
                                return Phase::Idle;
                            }
                            self.state.mark_stopped();
                            self.tracker.reset();
                            self.state.restarts += 1;
                            self.state.mark_starting();
                            self.publish();
                            self.pending_reply = Some(reply);
                            return Phase::Launch;
                        }
                        InstanceMsg::Start { reply } => {
                            let _ = reply.send(Err(WardenError::InvalidState(
                                self.slot.clone(),
                                "already running".to_string(),
                            )));
                        }
                        InstanceMsg::MemorySample { bytes } => {
                            self.memory_bytes = bytes;
                            match self.spec.max_memory {
                                Some(ceiling) if bytes > ceiling => {
                                    return self.ceiling_restart(child, bytes, ceiling).await;
                                }
                                _ => self.publish(),
                            }
                        }
                        InstanceMsg::Shutdown => {
                            let _ = self.stop_child(&mut child).await;
                            self.state.mark_stopped();
                            self.publish();
                            return Phase::Shutdown;
                        }
                    }
                }
            }
        }
    }

    /// Memory ceiling breach: restart immediately, irrespective of the
    /// restart policy and without backoff. Tallied separately from crash
    /// restarts.
    async fn ceiling_restart(&mut self, mut child: Child, bytes: u64, ceiling: u64) -> Phase {
        warn!(
            instance = %self.slot,
            used = bytes,
            ceiling = ceiling,
            "memory ceiling breached, forcing restart"
        );

        if let Err(e) = self.stop_child(&mut child).await {
            warn!(instance = %self.slot, "failed to stop over-ceiling child: {}", e);
        }
        self.state.mark_stopped();
        self.state.restarts += 1;
        self.state.ceiling_restarts += 1;
        self.memory_bytes = 0;
        self.state.mark_starting();
        self.publish();

        Phase::Launch
    }

    /// Record an uncommanded exit: state transition, crash streak, logging.
    fn record_crash(&mut self, exit: Option<ExitEvent>) {
        let uptime = self.state.uptime();
        self.state.mark_crashed(exit);
        self.tracker
            .observe_exit(uptime, self.policy.stability_threshold());
        self.memory_bytes = 0;
        self.publish();

        if let Some(e) = exit {
            info!(
                instance = %self.slot,
                uptime_secs = uptime.as_secs(),
                rapid_crashes = self.tracker.consecutive_rapid_crashes(),
                "instance crashed ({})", e
            );
        }
    }

    /// Consult the restart policy after a recorded crash.
    fn decide(&mut self) -> Phase {
        match self.policy.decide(&self.tracker) {
            Decision::GiveUp => {
                self.state.mark_stopped();
                self.publish();
                Phase::Idle
            }
            Decision::Exhausted => {
                let err = WardenError::PolicyExhausted(
                    self.slot.clone(),
                    self.tracker.consecutive_rapid_crashes(),
                );
                error!(instance = %self.slot, "{}", err);
                self.state.mark_failed();
                self.publish();
                Phase::Idle
            }
            Decision::Relaunch(delay) => {
                debug!(
                    instance = %self.slot,
                    delay_secs = delay.as_secs(),
                    "backing off before relaunch"
                );
                Phase::Backoff(delay)
            }
        }
    }

    /// Wait out the backoff delay in `crashed`. A stop during the wait
    /// cancels the relaunch; nothing launches after a stop is issued.
    async fn backoff(&mut self, delay: Duration) -> Phase {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => {
                    self.state.restarts += 1;
                    self.state.mark_starting();
                    self.publish();
                    return Phase::Launch;
                }
                msg = self.ctrl.recv() => {
                    let msg = match msg {
                        Some(msg) => msg,
                        None => return Phase::Shutdown,
                    };
                    match msg {
                        InstanceMsg::Stop { reply } => {
                            self.state.mark_stopped();
                            self.publish();
                            let _ = reply.send(Ok(()));
                            return Phase::Idle;
                        }
                        InstanceMsg::Restart { reply } | InstanceMsg::Start { reply } => {
                            self.tracker.reset();
                            self.state.restarts += 1;
                            self.state.mark_starting();
                            self.publish();
                            self.pending_reply = Some(reply);
                            return Phase::Launch;
                        }
                        InstanceMsg::MemorySample { .. } => {}
                        InstanceMsg::Shutdown => return Phase::Shutdown,
                    }
                }
            }
        }
    }

    /// Graceful stop: configured signal, grace period, then SIGKILL.
    async fn stop_child(&mut self, child: &mut Child) -> Result<()> {
        let pid = match child.id() {
            Some(pid) => pid,
            // Already reaped
            None => return Ok(()),
        };

        self.state.mark_stopping();
        self.publish();

        let nix_pid = Pid::from_raw(pid as i32);
        let stop_signal = parse_signal(&self.spec.stop_signal)?;

        info!(
            instance = %self.slot,
            pid = pid,
            signal = %self.spec.stop_signal,
            "stopping instance"
        );

        signal::kill(nix_pid, stop_signal).map_err(|e| {
            WardenError::Stop(
                self.slot.clone(),
                format!("Failed to send {}: {}", self.spec.stop_signal, e),
            )
        })?;

        match tokio::time::timeout(self.spec.stop_timeout(), child.wait()).await {
            Ok(Ok(status)) => {
                debug!(instance = %self.slot, "instance exited: {:?}", status);
            }
            Ok(Err(e)) => {
                return Err(WardenError::Stop(
                    self.slot.clone(),
                    format!("Wait failed: {}", e),
                ));
            }
            Err(_) => {
                warn!(
                    instance = %self.slot,
                    grace_secs = self.spec.stop_timeout_secs,
                    "instance did not exit in time, sending SIGKILL"
                );
                signal::kill(nix_pid, Signal::SIGKILL).map_err(|e| {
                    WardenError::Stop(self.slot.clone(), format!("Failed to send SIGKILL: {}", e))
                })?;
                let _ = child.wait().await;
            }
        }

        Ok(())
    }

    fn reply_pending(&mut self, result: Result<()>) {
        if let Some(reply) = self.pending_reply.take() {
            let _ = reply.send(result);
        }
    }

    fn publish(&self) {
        self.snapshot.send_replace(InstanceSnapshot {
            app: self.spec.name.clone(),
            slot: self.slot.clone(),
            status: self.state.status,
            pid: self.state.pid,
            started_at: self.state.started_at,
            restarts: self.state.restarts,
            ceiling_restarts: self.state.ceiling_restarts,
            last_exit: self.state.last_exit,
            dropped_log_lines: self.dropped.load(Ordering::Relaxed),
            memory_bytes: self.memory_bytes,
        });
    }
}

pub(crate) fn parse_signal(signal_name: &str) -> Result<Signal> {
    match signal_name {
        "SIGTERM" => Ok(Signal::SIGTERM),
        "SIGINT" => Ok(Signal::SIGINT),
        "SIGQUIT" => Ok(Signal::SIGQUIT),
        "SIGKILL" => Ok(Signal::SIGKILL),
        "SIGHUP" => Ok(Signal::SIGHUP),
        "SIGUSR1" => Ok(Signal::SIGUSR1),
        "SIGUSR2" => Ok(Signal::SIGUSR2),
        _ => Err(WardenError::Signal(format!(
            "Invalid signal name: {}",
            signal_name
        ))),
    }
}
