// PID file management for the daemon process

use crate::error::{Result, WardenError};
use std::fs;
use std::path::{Path, PathBuf};

/// Default PID file location
pub const DEFAULT_PID_FILE: &str = "/tmp/warden.pid";

/// Manages the daemon PID file.
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_PID_FILE),
        }
    }

    pub fn with_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Write the current process PID to the file.
    pub fn write(&self) -> Result<()> {
        let pid = std::process::id();
        fs::write(&self.path, pid.to_string())
            .map_err(|e| WardenError::Other(format!("Failed to write PID file: {}", e)))?;
        Ok(())
    }

    pub fn read(&self) -> Result<u32> {
        let content = fs::read_to_string(&self.path)
            .map_err(|e| WardenError::Other(format!("Failed to read PID file: {}", e)))?;

        content
            .trim()
            .parse::<u32>()
            .map_err(|e| WardenError::Other(format!("Invalid PID in file: {}", e)))
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn remove(&self) -> Result<()> {
        if self.exists() {
            fs::remove_file(&self.path)
                .map_err(|e| WardenError::Other(format!("Failed to remove PID file: {}", e)))?;
        }
        Ok(())
    }

    /// Whether the PID file points at a live process.
    pub fn is_daemon_running(&self) -> bool {
        if !self.exists() {
            return false;
        }

        match self.read() {
            Ok(pid) => is_process_alive(pid),
            Err(_) => false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for PidFile {
    fn default() -> Self {
        Self::new()
    }
}

/// Probe a PID with the null signal.
#[cfg(unix)]
fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), None) {
        Ok(_) => true,
        // Exists but owned by someone else
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_process_alive(_pid: u32) -> bool {
    true
}
