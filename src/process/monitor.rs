use crate::process::lifecycle::InstanceStatus;
use crate::process::supervisor::Supervisor;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;

/// How often the monitor samples memory usage of running instances.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(2);

/// Samples resident memory of running children and feeds the readings to
/// their instance tasks. Ceiling enforcement happens inside the instance
/// task, serialized with everything else that touches its state; this
/// side only observes.
pub struct MemoryMonitor {
    system: System,
}

impl MemoryMonitor {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    /// Sample every running instance once.
    pub fn sample(&mut self, supervisor: &Supervisor) {
        let targets: Vec<(Pid, &crate::process::instance::InstanceHandle)> = supervisor
            .instances()
            .filter_map(|handle| {
                let snap = handle.snapshot();
                match (snap.status, snap.pid) {
                    (InstanceStatus::Running, Some(pid)) => Some((Pid::from_u32(pid), handle)),
                    _ => None,
                }
            })
            .collect();

        if targets.is_empty() {
            return;
        }

        let pids: Vec<Pid> = targets.iter().map(|(pid, _)| *pid).collect();
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&pids),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );

        for (pid, handle) in targets {
            if let Some(process) = self.system.process(pid) {
                handle.notify_memory(process.memory());
            }
        }
    }
}

impl Default for MemoryMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Run the memory monitor on its own task until aborted. A read lock keeps
/// sampling from waiting behind an in-flight stop on some other app.
pub fn spawn_memory_monitor(
    supervisor: Arc<RwLock<Supervisor>>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut monitor = MemoryMonitor::new();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        debug!(interval_secs = interval.as_secs(), "memory monitor running");
        loop {
            ticker.tick().await;
            let supervisor = supervisor.read().await;
            monitor.sample(&supervisor);
        }
    })
}
