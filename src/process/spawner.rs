use crate::config::AppSpec;
use crate::error::{Result, WardenError};
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Metadata returned when launching an instance
#[derive(Debug)]
pub struct SpawnedChild {
    /// The child process handle; stdout/stderr pipes are still attached and
    /// are taken by the output router
    pub child: Child,

    /// Process ID assigned by the OS
    pub pid: u32,
}

/// Launch one child process for an instance slot of the given spec.
///
/// The child's lifetime is independent of the caller's stack: the handle is
/// returned and owned by the instance task. stdout and stderr are captured
/// as pipes for the output router.
///
/// Fails with `WardenError::Spawn` when the executable or working directory
/// cannot be found, and `WardenError::Permission` when the command exists
/// but is not executable by this process.
pub fn spawn_instance(spec: &AppSpec, slot: &str) -> Result<SpawnedChild> {
    if let Some(ref cwd) = spec.cwd {
        if !cwd.is_dir() {
            return Err(WardenError::Spawn(format!(
                "Working directory does not exist: {}",
                cwd.display()
            )));
        }
    }

    let mut command = Command::new(&spec.command);
    command.args(&spec.args);

    if let Some(ref cwd) = spec.cwd {
        command.current_dir(cwd);
    }

    for (key, value) in &spec.env {
        command.env(key, value.render());
    }

    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    // The child must not die with the supervisor's controlling terminal
    command.kill_on_drop(false);

    let child = command.spawn().map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => WardenError::Permission(format!(
            "'{}' for instance '{}': {}",
            spec.command, slot, e
        )),
        _ => WardenError::Spawn(format!(
            "Failed to spawn '{}' for instance '{}': {}",
            spec.command, slot, e
        )),
    })?;

    let pid = child.id().ok_or_else(|| {
        WardenError::Spawn(format!("Failed to get PID for instance '{}'", slot))
    })?;

    Ok(SpawnedChild { child, pid })
}
