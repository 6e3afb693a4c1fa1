// Warden daemon - hosts the supervisor, the memory monitor and the IPC
// server

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use warden::daemon::{daemonize, DaemonManager};
use warden::error::{Result, WardenError};
use warden::ipc::{Command, DaemonCommand, IpcServer, Response, ResponseData};
use warden::process::{spawn_memory_monitor, Supervisor, DEFAULT_SAMPLE_INTERVAL};

/// Default directory for instance log files
const DEFAULT_LOG_DIR: &str = "/tmp/warden-logs";

struct Daemon {
    supervisor: Arc<RwLock<Supervisor>>,
    ipc_server: IpcServer,
    start_time: SystemTime,
}

impl Daemon {
    fn new(log_dir: PathBuf) -> Self {
        Self {
            supervisor: Arc::new(RwLock::new(Supervisor::new(log_dir))),
            ipc_server: IpcServer::new(),
            start_time: SystemTime::now(),
        }
    }

    async fn run(mut self) -> Result<()> {
        self.ipc_server.start()?;
        info!(
            socket = %self.ipc_server.socket_path().display(),
            "IPC server listening"
        );

        let monitor = spawn_memory_monitor(Arc::clone(&self.supervisor), DEFAULT_SAMPLE_INTERVAL);

        // Shutdown can come from a signal or from an IPC shutdown command
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let supervisor = Arc::clone(&self.supervisor);
        let start_time = self.start_time;
        let ipc_server = self.ipc_server;
        let server = tokio::spawn(async move {
            let result = ipc_server
                .run(move |cmd| {
                    let supervisor = Arc::clone(&supervisor);
                    let shutdown_tx = shutdown_tx.clone();
                    async move { handle_command(cmd, supervisor, start_time, shutdown_tx).await }
                })
                .await;

            if let Err(e) = result {
                error!("IPC server error: {}", e);
            }
        });

        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| WardenError::Signal(format!("Failed to install SIGTERM handler: {}", e)))?;
        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|e| WardenError::Signal(format!("Failed to install SIGINT handler: {}", e)))?;

        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
            _ = shutdown_rx.recv() => info!("received shutdown command"),
        }

        server.abort();
        monitor.abort();

        self.supervisor.write().await.shutdown_all().await;
        info!("daemon stopped");

        Ok(())
    }
}

// Per-app control operations take a read lock so they run concurrently;
// one app waiting out its stop grace period must not stall the others.
// Only registry mutation takes the write lock.
async fn handle_command(
    command: Command,
    supervisor: Arc<RwLock<Supervisor>>,
    start_time: SystemTime,
    shutdown_tx: mpsc::Sender<()>,
) -> Result<Response> {
    match command {
        Command::StartConfig(specs) => {
            // Re-validate: the daemon never trusts what came over the socket
            for spec in &specs {
                spec.validate()?;
            }

            let mut supervisor = supervisor.write().await;
            let mut snapshots = Vec::new();

            for spec in specs {
                let name = spec.name.clone();
                match supervisor.start_app(spec).await {
                    Ok(mut snaps) => snapshots.append(&mut snaps),
                    Err(e @ WardenError::AppAlreadyExists(_)) => return Err(e),
                    Err(e) => {
                        // Instances are registered and under policy; report
                        // what we have
                        warn!(app = %name, "launch problem: {}", e);
                        let mut snaps = supervisor.status(Some(&name))?;
                        snapshots.append(&mut snaps);
                    }
                }
            }

            Ok(Response::success(0, ResponseData::Started(snapshots)))
        }

        Command::Start { name } => {
            let supervisor = supervisor.read().await;
            let snapshots = supervisor.start_registered(&name).await?;
            Ok(Response::success(0, ResponseData::Started(snapshots)))
        }

        Command::Stop { name } => {
            let supervisor = supervisor.read().await;
            let count = supervisor.stop_app(&name).await?;
            Ok(Response::success(0, ResponseData::Stopped { name, count }))
        }

        Command::Restart { name } => {
            let supervisor = supervisor.read().await;
            let count = supervisor.restart_app(&name).await?;
            Ok(Response::success(0, ResponseData::Restarted { name, count }))
        }

        Command::Status { name } => {
            let supervisor = supervisor.read().await;
            let snapshots = supervisor.status(name.as_deref())?;
            Ok(Response::success(0, ResponseData::Status(snapshots)))
        }

        Command::Daemon(DaemonCommand::Status) => {
            let uptime_secs = SystemTime::now()
                .duration_since(start_time)
                .unwrap_or_default()
                .as_secs();
            let instances = supervisor.read().await.status(None)?.len();

            Ok(Response::success(
                0,
                ResponseData::DaemonStatus {
                    pid: std::process::id(),
                    uptime_secs,
                    instances,
                },
            ))
        }

        Command::Daemon(DaemonCommand::Shutdown) => {
            let _ = shutdown_tx.send(()).await;
            Ok(Response::success(0, ResponseData::ShuttingDown))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let should_daemonize = std::env::args().any(|arg| arg == "--daemonize");
    if should_daemonize {
        daemonize().context("failed to daemonize")?;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let daemon_manager = DaemonManager::new();
    daemon_manager
        .register_daemon()
        .context("failed to register daemon")?;

    info!(pid = std::process::id(), "warden daemon starting");

    let daemon = Daemon::new(PathBuf::from(DEFAULT_LOG_DIR));
    let result = daemon.run().await;

    daemon_manager
        .unregister_daemon()
        .context("failed to remove PID file")?;

    result.context("daemon exited with error")
}
