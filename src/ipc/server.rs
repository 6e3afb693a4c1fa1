// IPC server - listens for client connections on a Unix socket

use crate::error::{Result, WardenError};
use crate::ipc::{Command, Request, Response};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, warn};

/// Default socket path for daemon communication
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/warden.sock";

/// IPC server accepting newline-delimited JSON requests, one per
/// connection.
pub struct IpcServer {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
}

impl IpcServer {
    pub fn new() -> Self {
        Self::with_socket_path(DEFAULT_SOCKET_PATH)
    }

    pub fn with_socket_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            socket_path: path.as_ref().to_path_buf(),
            listener: None,
        }
    }

    /// Bind the Unix socket, replacing any stale socket file, and restrict
    /// it to the owner (0600).
    pub fn start(&mut self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| {
                WardenError::Ipc(format!("Failed to remove existing socket: {}", e))
            })?;
        }

        let listener = UnixListener::bind(&self.socket_path)
            .map_err(|e| WardenError::Ipc(format!("Failed to bind to socket: {}", e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.socket_path, permissions).map_err(|e| {
                WardenError::Ipc(format!("Failed to set socket permissions: {}", e))
            })?;
        }

        self.listener = Some(listener);
        Ok(())
    }

    /// Run the accept loop, dispatching each connection to its own task.
    /// Runs until the task driving it is aborted.
    pub async fn run<F, Fut>(&self, handler: F) -> Result<()>
    where
        F: Fn(Command) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Response>> + Send,
    {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| WardenError::Ipc("Server not started".to_string()))?;
        let handler = Arc::new(handler);

        loop {
            let stream = match listener.accept().await {
                Ok((stream, _addr)) => stream,
                Err(e) => {
                    warn!("failed to accept connection: {}", e);
                    continue;
                }
            };

            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, handler).await {
                    debug!("connection closed with error: {}", e);
                }
            });
        }
    }

    async fn handle_connection<F, Fut>(stream: UnixStream, handler: Arc<F>) -> Result<()>
    where
        F: Fn(Command) -> Fut + Send + Sync,
        Fut: std::future::Future<Output = Result<Response>> + Send,
    {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let mut request_line = String::new();
        reader
            .read_line(&mut request_line)
            .await
            .map_err(|e| WardenError::Ipc(format!("Failed to read request: {}", e)))?;

        let request: Request = serde_json::from_str(&request_line).map_err(|e| {
            WardenError::Deserialization(format!("Failed to deserialize request: {}", e))
        })?;

        let response = match handler(request.command).await {
            Ok(resp) => Response {
                id: request.id,
                result: resp.result,
            },
            Err(e) => Response::error(request.id, e.to_string()),
        };

        let mut response_json = serde_json::to_string(&response).map_err(|e| {
            WardenError::Serialization(format!("Failed to serialize response: {}", e))
        })?;
        response_json.push('\n');

        writer
            .write_all(response_json.as_bytes())
            .await
            .map_err(|e| WardenError::Ipc(format!("Failed to write response: {}", e)))?;
        writer
            .flush()
            .await
            .map_err(|e| WardenError::Ipc(format!("Failed to flush stream: {}", e)))?;

        Ok(())
    }

    /// Drop the listener and remove the socket file.
    pub fn stop(&mut self) -> Result<()> {
        self.listener = None;

        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)
                .map_err(|e| WardenError::Ipc(format!("Failed to remove socket file: {}", e)))?;
        }

        Ok(())
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Default for IpcServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
