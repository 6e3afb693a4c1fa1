// CLI module - user-facing command-line interface

mod output;

use crate::config::AppSpec;
use crate::daemon::DaemonManager;
use crate::error::{Result, WardenError};
use crate::ipc::{Command, DaemonCommand, IpcClient};
use clap::{Parser, Subcommand};
use std::path::Path;
use std::time::{Duration, Instant};

/// Warden - a minimal process supervisor
#[derive(Parser)]
#[command(name = "warden")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start apps from a config file, or start a registered app by name
    Start {
        /// Path to a .toml/.json config file, or the name of a registered app
        target: String,
    },

    /// Stop all instances of an app
    Stop {
        /// App name (or a single instance name like "web-1")
        name: String,
    },

    /// Restart all instances of an app
    Restart {
        /// App name (or a single instance name like "web-1")
        name: String,
    },

    /// Show instance status
    Status {
        /// App name; omit to list everything
        name: Option<String>,
    },

    /// Manage the daemon
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },
}

#[derive(Subcommand)]
enum DaemonCommands {
    /// Start the daemon
    Start,
    /// Stop the daemon and all supervised instances
    Stop,
    /// Check daemon status
    Status,
}

impl Cli {
    /// Parse arguments and execute.
    pub fn run() -> Result<()> {
        let cli = Cli::parse();
        cli.execute()
    }

    fn execute(&self) -> Result<()> {
        match &self.command {
            Commands::Daemon { command } => return self.execute_daemon(command),
            _ => {}
        }

        let command = self.build_command()?;
        let client = IpcClient::new();
        let response = client.send_command(command)?;

        match response.result {
            Ok(data) => {
                output::print_success(&data);
                Ok(())
            }
            Err(error_msg) => {
                output::print_error(&error_msg);
                Err(classify_remote_error(error_msg))
            }
        }
    }

    fn build_command(&self) -> Result<Command> {
        match &self.command {
            Commands::Start { target } => {
                let path = Path::new(target);
                if is_config_path(path) {
                    let specs = AppSpec::from_file(path)?;
                    Ok(Command::StartConfig(specs))
                } else {
                    Ok(Command::Start {
                        name: target.clone(),
                    })
                }
            }

            Commands::Stop { name } => Ok(Command::Stop { name: name.clone() }),

            Commands::Restart { name } => Ok(Command::Restart { name: name.clone() }),

            Commands::Status { name } => Ok(Command::Status { name: name.clone() }),

            Commands::Daemon { .. } => unreachable!("daemon commands are handled locally"),
        }
    }

    fn execute_daemon(&self, command: &DaemonCommands) -> Result<()> {
        let manager = DaemonManager::new();

        match command {
            DaemonCommands::Start => {
                manager.spawn_daemon()?;
                wait_until(Duration::from_secs(5), || manager.is_running())
                    .map_err(|_| WardenError::Other("Daemon did not come up".to_string()))?;
                output::print_info("Daemon started");
                Ok(())
            }

            DaemonCommands::Stop => {
                // Graceful path first: the daemon stops its children before
                // exiting. Signals are the fallback.
                let client = IpcClient::new();
                match client.send_command(Command::Daemon(DaemonCommand::Shutdown)) {
                    Ok(_) => {
                        if wait_until(Duration::from_secs(15), || !manager.is_running()).is_err() {
                            manager.stop_daemon(5)?;
                        }
                    }
                    Err(WardenError::DaemonNotRunning) => {
                        return Err(WardenError::DaemonNotRunning);
                    }
                    Err(_) => manager.stop_daemon(10)?,
                }
                output::print_info("Daemon stopped");
                Ok(())
            }

            DaemonCommands::Status => {
                let client = IpcClient::new();
                let response = client.send_command(Command::Daemon(DaemonCommand::Status))?;
                match response.result {
                    Ok(data) => {
                        output::print_success(&data);
                        Ok(())
                    }
                    Err(error_msg) => {
                        output::print_error(&error_msg);
                        Err(classify_remote_error(error_msg))
                    }
                }
            }
        }
    }
}

/// A start target is a config file when it looks like one on disk.
fn is_config_path(path: &Path) -> bool {
    let known_ext = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("toml") | Some("json")
    );
    known_ext || path.exists()
}

/// Errors come back over IPC as strings; recover the variants the exit
/// code mapping cares about.
fn classify_remote_error(message: String) -> WardenError {
    if message.starts_with("Application not found") {
        WardenError::AppNotFound(message)
    } else {
        WardenError::Other(message)
    }
}

fn wait_until<F>(timeout: Duration, mut condition: F) -> std::result::Result<(), ()>
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    Err(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_detection() {
        assert!(is_config_path(Path::new("apps.toml")));
        assert!(is_config_path(Path::new("ecosystem.json")));
        assert!(is_config_path(Path::new("/etc/warden/apps.toml")));
        assert!(!is_config_path(Path::new("web")));
        assert!(!is_config_path(Path::new("api-1")));
    }

    #[test]
    fn test_remote_error_classification() {
        let err = classify_remote_error("Application not found: web".to_string());
        assert!(matches!(err, WardenError::AppNotFound(_)));
        assert_eq!(err.exit_code(), 2);

        let err = classify_remote_error("something else broke".to_string());
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::parse_from(["warden", "status"]);
        assert!(matches!(cli.command, Commands::Status { name: None }));

        let cli = Cli::parse_from(["warden", "stop", "web"]);
        assert!(matches!(cli.command, Commands::Stop { .. }));

        let cli = Cli::parse_from(["warden", "daemon", "status"]);
        assert!(matches!(
            cli.command,
            Commands::Daemon {
                command: DaemonCommands::Status
            }
        ));
    }
}
