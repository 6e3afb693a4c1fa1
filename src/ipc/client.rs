// IPC client - communicates with the daemon over its Unix socket

use crate::error::{Result, WardenError};
use crate::ipc::{Command, Request, Response};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::ipc::server::DEFAULT_SOCKET_PATH;

/// Maximum number of connection retry attempts
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Delay between retry attempts
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Synchronous IPC client used by the CLI. One request per connection,
/// newline-delimited JSON both ways.
pub struct IpcClient {
    socket_path: PathBuf,
    request_id: AtomicU64,
}

impl IpcClient {
    pub fn new() -> Self {
        Self::with_socket_path(DEFAULT_SOCKET_PATH)
    }

    pub fn with_socket_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            socket_path: path.as_ref().to_path_buf(),
            request_id: AtomicU64::new(1),
        }
    }

    /// Send a command to the daemon and wait for the response.
    pub fn send_command(&self, command: Command) -> Result<Response> {
        let request_id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = Request::new(request_id, command);

        let mut last_error = None;
        for attempt in 1..=MAX_RETRY_ATTEMPTS {
            match self.try_send_request(&request) {
                Ok(response) => {
                    if response.id != request_id {
                        return Err(WardenError::Protocol(format!(
                            "Response ID mismatch: expected {}, got {}",
                            request_id, response.id
                        )));
                    }
                    return Ok(response);
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < MAX_RETRY_ATTEMPTS {
                        std::thread::sleep(RETRY_DELAY);
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            WardenError::Connection("Failed to connect after retries".to_string())
        }))
    }

    fn try_send_request(&self, request: &Request) -> Result<Response> {
        let mut stream = self.connect()?;

        let request_json = serde_json::to_string(request).map_err(|e| {
            WardenError::Serialization(format!("Failed to serialize request: {}", e))
        })?;

        writeln!(stream, "{}", request_json)
            .map_err(|e| WardenError::Ipc(format!("Failed to write request: {}", e)))?;
        stream
            .flush()
            .map_err(|e| WardenError::Ipc(format!("Failed to flush stream: {}", e)))?;

        let mut reader = BufReader::new(stream);
        let mut response_line = String::new();
        reader
            .read_line(&mut response_line)
            .map_err(|e| WardenError::Ipc(format!("Failed to read response: {}", e)))?;

        serde_json::from_str(&response_line).map_err(|e| {
            WardenError::Deserialization(format!("Failed to deserialize response: {}", e))
        })
    }

    fn connect(&self) -> Result<UnixStream> {
        if !self.socket_path.exists() {
            return Err(WardenError::DaemonNotRunning);
        }

        UnixStream::connect(&self.socket_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::ConnectionRefused
                || e.kind() == std::io::ErrorKind::NotFound
            {
                WardenError::DaemonNotRunning
            } else {
                WardenError::Connection(format!("Failed to connect to daemon: {}", e))
            }
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Default for IpcClient {
    fn default() -> Self {
        Self::new()
    }
}
