use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// Lifecycle state of a managed instance.
///
/// `Stopped` is both the initial state and a terminal resting state;
/// `Failed` is terminal and only left by an explicit operator restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Crashed,
    Failed,
}

impl InstanceStatus {
    /// Whether a transition to `next` is part of the lifecycle table.
    pub fn can_transition_to(self, next: InstanceStatus) -> bool {
        use InstanceStatus::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Crashed)
                | (Running, Crashed)
                | (Running, Stopping)
                | (Stopping, Stopped)
                | (Crashed, Starting)
                | (Crashed, Stopped)
                | (Crashed, Failed)
                | (Failed, Starting)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, InstanceStatus::Stopped | InstanceStatus::Failed)
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceStatus::Stopped => write!(f, "stopped"),
            InstanceStatus::Starting => write!(f, "starting"),
            InstanceStatus::Running => write!(f, "running"),
            InstanceStatus::Stopping => write!(f, "stopping"),
            InstanceStatus::Crashed => write!(f, "crashed"),
            InstanceStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A process-exit observation consumed by the restart policy engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitEvent {
    /// Exit code, if the process exited normally
    pub code: Option<i32>,
    /// Terminating signal, if any
    pub signal: Option<i32>,
}

impl ExitEvent {
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl std::fmt::Display for ExitEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(sig)) => write!(f, "signal {}", sig),
            (None, None) => write!(f, "unknown exit"),
        }
    }
}

/// Mutable runtime record for one instance slot. Owned exclusively by the
/// instance task; everyone else observes snapshots of it.
///
/// Invariant: `pid` is populated iff status is `Running` or `Stopping`.
#[derive(Debug, Clone)]
pub struct InstanceState {
    pub status: InstanceStatus,
    pub pid: Option<u32>,
    pub started_at: Option<SystemTime>,
    pub restarts: u64,
    pub ceiling_restarts: u64,
    pub last_exit: Option<ExitEvent>,
    pub dropped_log_lines: u64,
}

impl InstanceState {
    pub fn new() -> Self {
        Self {
            status: InstanceStatus::Stopped,
            pid: None,
            started_at: None,
            restarts: 0,
            ceiling_restarts: 0,
            last_exit: None,
            dropped_log_lines: 0,
        }
    }

    pub fn mark_starting(&mut self) {
        debug_assert!(self.status.can_transition_to(InstanceStatus::Starting));
        self.status = InstanceStatus::Starting;
        self.pid = None;
        self.started_at = None;
    }

    pub fn mark_running(&mut self, pid: u32) {
        debug_assert!(self.status.can_transition_to(InstanceStatus::Running));
        self.status = InstanceStatus::Running;
        self.pid = Some(pid);
        self.started_at = Some(SystemTime::now());
    }

    pub fn mark_stopping(&mut self) {
        debug_assert!(self.status.can_transition_to(InstanceStatus::Stopping));
        self.status = InstanceStatus::Stopping;
    }

    pub fn mark_stopped(&mut self) {
        self.status = InstanceStatus::Stopped;
        self.pid = None;
        self.started_at = None;
    }

    pub fn mark_crashed(&mut self, exit: Option<ExitEvent>) {
        debug_assert!(self.status.can_transition_to(InstanceStatus::Crashed));
        self.status = InstanceStatus::Crashed;
        self.pid = None;
        self.started_at = None;
        self.last_exit = exit;
    }

    pub fn mark_failed(&mut self) {
        debug_assert!(self.status.can_transition_to(InstanceStatus::Failed));
        self.status = InstanceStatus::Failed;
        self.pid = None;
    }

    pub fn uptime(&self) -> Duration {
        self.started_at
            .and_then(|t| SystemTime::now().duration_since(t).ok())
            .unwrap_or(Duration::ZERO)
    }
}

impl Default for InstanceState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use InstanceStatus::*;

        assert!(Stopped.can_transition_to(Starting));
        assert!(Starting.can_transition_to(Running));
        assert!(Starting.can_transition_to(Crashed));
        assert!(Running.can_transition_to(Crashed));
        assert!(Running.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Stopped));
        assert!(Crashed.can_transition_to(Starting));
        assert!(Crashed.can_transition_to(Stopped));
        assert!(Crashed.can_transition_to(Failed));

        // Not in the table
        assert!(!Stopped.can_transition_to(Running));
        assert!(!Running.can_transition_to(Starting));
        assert!(!Failed.can_transition_to(Running));
        assert!(!Stopping.can_transition_to(Running));
    }

    #[test]
    fn test_pid_invariant() {
        let mut state = InstanceState::new();
        assert_eq!(state.status, InstanceStatus::Stopped);
        assert!(state.pid.is_none());

        state.mark_starting();
        assert!(state.pid.is_none());

        state.mark_running(42);
        assert_eq!(state.pid, Some(42));

        state.mark_stopping();
        assert_eq!(state.pid, Some(42));

        state.mark_stopped();
        assert!(state.pid.is_none());
    }

    #[test]
    fn test_crash_clears_pid_and_records_exit() {
        let mut state = InstanceState::new();
        state.mark_starting();
        state.mark_running(42);

        let exit = ExitEvent {
            code: Some(1),
            signal: None,
        };
        state.mark_crashed(Some(exit));

        assert_eq!(state.status, InstanceStatus::Crashed);
        assert!(state.pid.is_none());
        assert_eq!(state.last_exit, Some(exit));
    }

    #[test]
    fn test_exit_event_display() {
        let exit = ExitEvent {
            code: Some(1),
            signal: None,
        };
        assert_eq!(exit.to_string(), "exit code 1");

        let killed = ExitEvent {
            code: None,
            signal: Some(9),
        };
        assert_eq!(killed.to_string(), "signal 9");
    }
}
