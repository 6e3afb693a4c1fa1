// Daemon lifecycle management, driven from the CLI side

use super::pid::PidFile;
use crate::error::{Result, WardenError};
use std::time::Duration;

#[cfg(unix)]
use nix::sys::signal::{kill, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// Controls the daemon process from outside: liveness checks, spawning,
/// and signal-driven shutdown.
pub struct DaemonManager {
    pid_file: PidFile,
}

impl DaemonManager {
    pub fn new() -> Self {
        Self {
            pid_file: PidFile::new(),
        }
    }

    pub fn with_pid_file(pid_file: PidFile) -> Self {
        Self { pid_file }
    }

    pub fn is_running(&self) -> bool {
        self.pid_file.is_daemon_running()
    }

    pub fn get_pid(&self) -> Option<u32> {
        if self.is_running() {
            self.pid_file.read().ok()
        } else {
            None
        }
    }

    /// Claim the PID file for the current process. Called from inside the
    /// daemon at startup.
    pub fn register_daemon(&self) -> Result<()> {
        if self.is_running() {
            return Err(WardenError::DaemonAlreadyRunning);
        }

        // Stale PID file from an unclean exit
        if self.pid_file.exists() {
            self.pid_file.remove()?;
        }

        self.pid_file.write()?;
        Ok(())
    }

    /// Spawn the daemon binary detached from the current terminal. Looks
    /// for `warden-daemon` next to the current executable, falling back to
    /// PATH lookup.
    pub fn spawn_daemon(&self) -> Result<u32> {
        if self.is_running() {
            return Err(WardenError::DaemonAlreadyRunning);
        }

        let daemon_bin = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|d| d.join("warden-daemon")))
            .filter(|p| p.exists())
            .unwrap_or_else(|| "warden-daemon".into());

        let child = std::process::Command::new(&daemon_bin)
            .arg("--daemonize")
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| {
                WardenError::Other(format!(
                    "Failed to spawn daemon '{}': {}",
                    daemon_bin.display(),
                    e
                ))
            })?;

        Ok(child.id())
    }

    /// Stop the daemon with SIGTERM, escalating to SIGKILL after the
    /// timeout.
    #[cfg(unix)]
    pub fn stop_daemon(&self, timeout_secs: u64) -> Result<()> {
        let pid = self.get_pid().ok_or(WardenError::DaemonNotRunning)?;

        let pid_t = Pid::from_raw(pid as i32);
        kill(pid_t, Signal::SIGTERM)
            .map_err(|e| WardenError::Signal(format!("Failed to send SIGTERM: {}", e)))?;

        let start = std::time::Instant::now();
        let timeout = Duration::from_secs(timeout_secs);

        while start.elapsed() < timeout {
            if !self.is_running() {
                self.pid_file.remove()?;
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        kill(pid_t, Signal::SIGKILL)
            .map_err(|e| WardenError::Signal(format!("Failed to send SIGKILL: {}", e)))?;
        std::thread::sleep(Duration::from_secs(1));

        if self.is_running() {
            return Err(WardenError::Other(
                "Failed to stop daemon even with SIGKILL".to_string(),
            ));
        }
        self.pid_file.remove()?;
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn stop_daemon(&self, _timeout_secs: u64) -> Result<()> {
        Err(WardenError::Other(
            "Daemon stop is only supported on Unix systems".to_string(),
        ))
    }

    /// Drop the PID file. Called from inside the daemon at shutdown.
    pub fn unregister_daemon(&self) -> Result<()> {
        self.pid_file.remove()
    }
}

impl Default for DaemonManager {
    fn default() -> Self {
        Self::new()
    }
}
