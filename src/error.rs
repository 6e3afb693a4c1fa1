use thiserror::Error;

/// Main error type for the Warden supervisor
#[derive(Debug, Error)]
pub enum WardenError {
    // Launch errors (fatal for the start attempt, never for the supervisor)
    #[error("Failed to spawn process: {0}")]
    Spawn(String),

    #[error("Permission denied executing command: {0}")]
    Permission(String),

    // Application registry errors
    #[error("Application not found: {0}")]
    AppNotFound(String),

    #[error("Application already exists: {0}")]
    AppAlreadyExists(String),

    #[error("Application {0} is in invalid state for this operation: {1}")]
    InvalidState(String, String),

    #[error("Restart policy exhausted for {0} after {1} rapid crashes")]
    PolicyExhausted(String, u32),

    #[error("Failed to stop {0}: {1}")]
    Stop(String, String),

    // Log routing errors (non-fatal, output degrades to discard)
    #[error("Failed to open log destination {0}: {1}")]
    LogWrite(String, String),

    // IPC errors
    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("Failed to connect to daemon: {0}")]
    Connection(String),

    #[error("IPC protocol error: {0}")]
    Protocol(String),

    #[error("Daemon not running")]
    DaemonNotRunning,

    #[error("Daemon already running")]
    DaemonAlreadyRunning,

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Missing required configuration field: {0}")]
    MissingConfigField(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    // System errors
    #[error("Signal error: {0}")]
    Signal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("{0}")]
    Other(String),
}

impl WardenError {
    /// Process exit code for the CLI: 0 is success, 2 means the named
    /// application does not exist, 3 means the daemon is unreachable, and
    /// everything else is a failed operation (1).
    pub fn exit_code(&self) -> i32 {
        match self {
            WardenError::AppNotFound(_) => 2,
            WardenError::DaemonNotRunning | WardenError::Connection(_) => 3,
            _ => 1,
        }
    }
}

/// Result type alias for Warden operations
pub type Result<T> = std::result::Result<T, WardenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(WardenError::AppNotFound("web".to_string()).exit_code(), 2);
        assert_eq!(WardenError::DaemonNotRunning.exit_code(), 3);
        assert_eq!(
            WardenError::Connection("refused".to_string()).exit_code(),
            3
        );
        assert_eq!(WardenError::Spawn("enoent".to_string()).exit_code(), 1);
        assert_eq!(
            WardenError::PolicyExhausted("web".to_string(), 10).exit_code(),
            1
        );
    }
}
