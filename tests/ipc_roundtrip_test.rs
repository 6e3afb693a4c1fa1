// Client/server round trip over a real Unix socket, with a live
// supervisor behind the handler

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::RwLock;
use warden::config::{AppSpec, BackoffSettings, RestartMode};
use warden::error::Result;
use warden::ipc::{Command, IpcClient, IpcServer, Response, ResponseData};
use warden::process::Supervisor;

fn sleeper_spec(name: &str) -> AppSpec {
    AppSpec {
        name: name.to_string(),
        command: "/bin/sh".to_string(),
        args: vec!["-c".to_string(), "sleep 30".to_string()],
        cwd: None,
        env: BTreeMap::new(),
        instances: 1,
        restart: RestartMode::Always,
        backoff: BackoffSettings::default(),
        max_memory: None,
        out_file: None,
        error_file: None,
        log_file: None,
        merge_logs: true,
        time: false,
        stop_signal: "SIGTERM".to_string(),
        stop_timeout_secs: 2,
    }
}

async fn handle(command: Command, supervisor: Arc<RwLock<Supervisor>>) -> Result<Response> {
    match command {
        Command::StartConfig(specs) => {
            let mut supervisor = supervisor.write().await;
            let mut snapshots = Vec::new();
            for spec in specs {
                snapshots.append(&mut supervisor.start_app(spec).await?);
            }
            Ok(Response::success(0, ResponseData::Started(snapshots)))
        }
        Command::Stop { name } => {
            let count = supervisor.read().await.stop_app(&name).await?;
            Ok(Response::success(0, ResponseData::Stopped { name, count }))
        }
        Command::Status { name } => {
            let snapshots = supervisor.read().await.status(name.as_deref())?;
            Ok(Response::success(0, ResponseData::Status(snapshots)))
        }
        _ => unimplemented!("not exercised here"),
    }
}

/// Spin up a server on its own socket and return the client plus the task
/// driving the accept loop.
fn start_server(
    socket_path: PathBuf,
    supervisor: Arc<RwLock<Supervisor>>,
) -> (IpcClient, tokio::task::JoinHandle<()>) {
    let mut server = IpcServer::with_socket_path(&socket_path);
    server.start().unwrap();

    let task = tokio::spawn(async move {
        let supervisor = Arc::clone(&supervisor);
        let _ = server
            .run(move |cmd| {
                let supervisor = Arc::clone(&supervisor);
                async move { handle(cmd, supervisor).await }
            })
            .await;
    });

    (IpcClient::with_socket_path(&socket_path), task)
}

async fn send(client: &Arc<IpcClient>, command: Command) -> Response {
    let client = Arc::clone(client);
    tokio::task::spawn_blocking(move || client.send_command(command))
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_start_status_stop_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("warden.sock");
    let supervisor = Arc::new(RwLock::new(Supervisor::new(temp_dir.path().join("logs"))));

    let (client, server_task) = start_server(socket_path, Arc::clone(&supervisor));
    let client = Arc::new(client);

    // Start an app over the socket
    let response = send(
        &client,
        Command::StartConfig(vec![sleeper_spec("web")]),
    )
    .await;
    match response.result.unwrap() {
        ResponseData::Started(snapshots) => {
            assert_eq!(snapshots.len(), 1);
            assert_eq!(snapshots[0].app, "web");
        }
        other => panic!("unexpected response: {:?}", other),
    }

    // Status sees it
    let response = send(&client, Command::Status { name: None }).await;
    match response.result.unwrap() {
        ResponseData::Status(snapshots) => assert_eq!(snapshots.len(), 1),
        other => panic!("unexpected response: {:?}", other),
    }

    // Stop it
    let response = send(
        &client,
        Command::Stop {
            name: "web".to_string(),
        },
    )
    .await;
    match response.result.unwrap() {
        ResponseData::Stopped { name, count } => {
            assert_eq!(name, "web");
            assert_eq!(count, 1);
        }
        other => panic!("unexpected response: {:?}", other),
    }

    server_task.abort();
    supervisor.write().await.shutdown_all().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_remote_errors_arrive_as_strings() {
    let temp_dir = TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("warden.sock");
    let supervisor = Arc::new(RwLock::new(Supervisor::new(temp_dir.path().join("logs"))));

    let (client, server_task) = start_server(socket_path, Arc::clone(&supervisor));
    let client = Arc::new(client);

    let response = send(
        &client,
        Command::Stop {
            name: "ghost".to_string(),
        },
    )
    .await;

    let message = response.result.unwrap_err();
    assert!(
        message.starts_with("Application not found"),
        "got: {}",
        message
    );

    server_task.abort();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_clients() {
    let temp_dir = TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("warden.sock");
    let supervisor = Arc::new(RwLock::new(Supervisor::new(temp_dir.path().join("logs"))));

    let (client, server_task) = start_server(socket_path.clone(), Arc::clone(&supervisor));
    let client = Arc::new(client);

    send(
        &client,
        Command::StartConfig(vec![sleeper_spec("web")]),
    )
    .await;

    // Each connection is served on its own task; parallel status queries
    // must all come back with their own request ids intact
    let mut handles = Vec::new();
    for _ in 0..8 {
        let path = socket_path.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            let client = IpcClient::with_socket_path(&path);
            client.send_command(Command::Status { name: None })
        }));
    }

    for handle in handles {
        let response = handle.await.unwrap().unwrap();
        match response.result.unwrap() {
            ResponseData::Status(snapshots) => assert_eq!(snapshots.len(), 1),
            other => panic!("unexpected response: {:?}", other),
        }
    }

    server_task.abort();
    supervisor.write().await.shutdown_all().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
}
