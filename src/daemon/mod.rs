// Daemon module - PID file handling, daemonization, lifecycle control

pub mod daemonize;
pub mod manager;
pub mod pid;

pub use daemonize::daemonize;
pub use manager::DaemonManager;
pub use pid::{PidFile, DEFAULT_PID_FILE};
