// IPC protocol definitions for client-daemon communication

use crate::config::AppSpec;
use crate::process::InstanceSnapshot;
use serde::{Deserialize, Serialize};

/// Daemon management commands
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DaemonCommand {
    Status,
    Shutdown,
}

/// All available commands
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    /// Register and launch apps parsed from a config file
    StartConfig(Vec<AppSpec>),
    /// Start a registered app that is currently stopped or failed
    Start { name: String },
    /// Stop all instances of an app
    Stop { name: String },
    /// Restart all instances of an app
    Restart { name: String },
    /// Snapshots for one app, or for everything
    Status { name: Option<String> },
    Daemon(DaemonCommand),
}

/// Response data variants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponseData {
    /// Instances launched (or registered, for slots that failed to launch)
    Started(Vec<InstanceSnapshot>),
    /// Instances stopped
    Stopped { name: String, count: usize },
    /// Instances restarted
    Restarted { name: String, count: usize },
    /// Instance snapshots
    Status(Vec<InstanceSnapshot>),
    /// Daemon status
    DaemonStatus {
        pid: u32,
        uptime_secs: u64,
        instances: usize,
    },
    /// Daemon acknowledged a shutdown request
    ShuttingDown,
}

/// Request message from client to daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub command: Command,
}

impl Request {
    pub fn new(id: u64, command: Command) -> Self {
        Self { id, command }
    }
}

/// Response message from daemon to client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub result: Result<ResponseData, String>,
}

impl Response {
    pub fn success(id: u64, data: ResponseData) -> Self {
        Self {
            id,
            result: Ok(data),
        }
    }

    pub fn error(id: u64, error: String) -> Self {
        Self {
            id,
            result: Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_round_trips_as_json_line() {
        let request = Request::new(
            7,
            Command::Stop {
                name: "web".to_string(),
            },
        );

        let line = serde_json::to_string(&request).unwrap();
        assert!(!line.contains('\n'));

        let parsed: Request = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.id, 7);
        match parsed.command {
            Command::Stop { name } => assert_eq!(name, "web"),
            other => panic!("wrong command: {:?}", other),
        }
    }

    #[test]
    fn test_error_response_carries_message() {
        let response = Response::error(3, "No such app: 'ghost'".to_string());
        let line = serde_json::to_string(&response).unwrap();

        let parsed: Response = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.id, 3);
        assert_eq!(parsed.result.unwrap_err(), "No such app: 'ghost'");
    }
}
