// Daemonization support for Unix systems

use crate::error::{Result, WardenError};

/// Detach from the controlling terminal: double fork, new session, cwd to
/// `/`, stdio to /dev/null.
#[cfg(unix)]
pub fn daemonize() -> Result<()> {
    use nix::unistd::{fork, setsid, ForkResult};
    use std::fs::OpenOptions;
    use std::os::unix::io::AsRawFd;

    match unsafe { fork() } {
        Ok(ForkResult::Parent { .. }) => {
            std::process::exit(0);
        }
        Ok(ForkResult::Child) => {}
        Err(e) => {
            return Err(WardenError::Other(format!("First fork failed: {}", e)));
        }
    }

    setsid().map_err(|e| WardenError::Other(format!("setsid failed: {}", e)))?;

    // Second fork so the daemon is not a session leader and can never
    // reacquire a controlling terminal.
    match unsafe { fork() } {
        Ok(ForkResult::Parent { .. }) => {
            std::process::exit(0);
        }
        Ok(ForkResult::Child) => {}
        Err(e) => {
            return Err(WardenError::Other(format!("Second fork failed: {}", e)));
        }
    }

    std::env::set_current_dir("/")
        .map_err(|e| WardenError::Other(format!("Failed to change directory to /: {}", e)))?;

    let devnull = OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .map_err(|e| WardenError::Other(format!("Failed to open /dev/null: {}", e)))?;

    let devnull_fd = devnull.as_raw_fd();
    use nix::libc;
    unsafe {
        libc::dup2(devnull_fd, libc::STDIN_FILENO);
        libc::dup2(devnull_fd, libc::STDOUT_FILENO);
        libc::dup2(devnull_fd, libc::STDERR_FILENO);
    }

    Ok(())
}

#[cfg(not(unix))]
pub fn daemonize() -> Result<()> {
    Err(WardenError::Other(
        "Daemonization is only supported on Unix systems".to_string(),
    ))
}
