use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio::sync::broadcast;

use configsync_core::settings::{LogFormat, LogSection};
use configsync_core::Settings;
use configsync_store::{open_backend, EntryStore};

use crate::cluster::ClusterFile;
use crate::error::{io_err, DaemonError};
use crate::node::SyncNode;
use crate::paths::{run_dir, socket_path};
use crate::protocol::{DaemonRequest, DaemonResponse, NodeRequest, NodeResponse};
use crate::transport::TcpTransport;

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path, settings: Settings) -> Result<(), DaemonError> {
    init_tracing(&settings.log);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), settings))
}

/// Run the daemon: node listener, admin socket, readiness gate and signal
/// handling, until `stop` or ctrl-c.
pub async fn run(home: PathBuf, settings: Settings) -> Result<(), DaemonError> {
    let store = EntryStore::new(open_backend(&settings), &settings)?;
    let node = Arc::new(SyncNode::new(
        &settings,
        store,
        Arc::new(ClusterFile::from_settings(&settings)),
        Arc::new(TcpTransport::new(settings.request_timeout())),
    ));
    let started_at_unix = unix_seconds_now();

    let listener = TcpListener::bind(&settings.node.listen_addr)
        .await
        .map_err(|e| io_err(&settings.node.listen_addr, e))?;
    tracing::info!(
        node = %node.name(),
        addr = %settings.node.listen_addr,
        backend = ?settings.store.backend,
        root = %settings.sync.config_path.display(),
        "node listening"
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let node_handle = {
        let shutdown = shutdown_tx.clone();
        let node = Arc::clone(&node);
        tokio::spawn(async move {
            let result = serve_node(listener, node, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let node = Arc::clone(&node);
        let home = home.clone();
        tokio::spawn(async move {
            let result = socket_server_task(
                home,
                node,
                shutdown.clone(),
                shutdown.subscribe(),
                started_at_unix,
            )
            .await;
            let _ = shutdown.send(());
            result
        })
    };

    let gate_handle = {
        let mut shutdown_rx = shutdown_tx.subscribe();
        let node = Arc::clone(&node);
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => {}
                outcome = node.start() => {
                    if let Some(outcome) = outcome {
                        tracing::info!(?outcome, "node ready");
                    }
                }
            }
            Ok::<(), DaemonError>(())
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (node_result, socket_result, gate_result, signal_result) =
        tokio::join!(node_handle, socket_handle, gate_handle, signal_handle);

    node.shutdown().await;
    handle_join("node_server", node_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("readiness_gate", gate_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("daemon stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// Node listener
// ---------------------------------------------------------------------------

/// Accept peer connections on `listener` until shutdown.
pub async fn serve_node(
    listener: TcpListener,
    node: Arc<SyncNode>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        tracing::warn!(error = %err, "node accept failed");
                        continue;
                    }
                };
                let node = Arc::clone(&node);
                tokio::spawn(async move {
                    if let Err(err) = handle_node_client(stream, node).await {
                        tracing::error!(peer = %peer, error = %err, "node client error");
                    }
                });
            }
        }
    }
    Ok(())
}

async fn handle_node_client(stream: TcpStream, node: Arc<SyncNode>) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("node socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<NodeRequest>(&line) {
            Ok(request) => {
                tracing::debug!(cmd = %request.cmd, "node request");
                node.handle(request).await
            }
            Err(err) => {
                NodeResponse::rejected(node.name(), None, format!("invalid request JSON: {err}"))
            }
        };
        write_line(&mut writer, &response, "node socket").await?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Admin socket
// ---------------------------------------------------------------------------

async fn socket_server_task(
    home: PathBuf,
    node: Arc<SyncNode>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let run = run_dir(&home);
    if !run.exists() {
        fs::create_dir_all(&run).map_err(|e| io_err(&run, e))?;
    }

    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let node = Arc::clone(&node);
                let shutdown_tx = shutdown_tx.clone();
                let socket = socket.clone();
                tokio::spawn(async move {
                    if let Err(err) =
                        handle_socket_client(stream, node, shutdown_tx, socket, started_at_unix).await
                    {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    node: Arc<SyncNode>,
    shutdown_tx: broadcast::Sender<()>,
    socket: PathBuf,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<DaemonRequest>(&line) {
            Ok(request) => request,
            Err(err) => {
                let response = DaemonResponse::error(format!("invalid request JSON: {err}"));
                write_line(&mut writer, &response, "daemon socket").await?;
                continue;
            }
        };

        let stop = request == DaemonRequest::Stop;
        let response = match request {
            DaemonRequest::Status => {
                let mut payload = node.status().await;
                if let Value::Object(map) = &mut payload {
                    map.insert("running".to_string(), json!(true));
                    map.insert("started_at_unix".to_string(), json!(started_at_unix));
                    map.insert("socket".to_string(), json!(socket.display().to_string()));
                }
                DaemonResponse::ok(payload)
            }
            DaemonRequest::Stop => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "acknowledged": true, "stopping": true }))
            }
            DaemonRequest::Flush => match node.flush_cluster().await {
                Ok(ack) => DaemonResponse::ok(json!({ "acknowledged": true, "nodes": ack.nodes })),
                Err(err) => DaemonResponse::error(err.to_string()),
            },
            DaemonRequest::Reset => match node.reset_cluster().await {
                Ok(ack) => DaemonResponse::ok(json!({ "acknowledged": true, "nodes": ack.nodes })),
                Err(err) => DaemonResponse::error(err.to_string()),
            },
            DaemonRequest::Wait { status, timeout_ms } => {
                match node.wait(status, Duration::from_millis(timeout_ms)).await {
                    Ok(report) => DaemonResponse::ok(json!({
                        "acknowledged": true,
                        "status": report.status,
                        "timed_out": report.timed_out,
                    })),
                    Err(err) => DaemonResponse::error(err.to_string()),
                }
            }
        };

        write_line(&mut writer, &response, "daemon socket").await?;
        if stop {
            break;
        }
    }

    Ok(())
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

async fn write_line<W, T>(writer: &mut W, message: &T, what: &'static str) -> Result<(), DaemonError>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let mut payload = serde_json::to_vec(message)?;
    payload.push(b'\n');
    writer
        .write_all(&payload)
        .await
        .map_err(|e| io_err(what, e))?;
    writer.flush().await.map_err(|e| io_err(what, e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Install the global subscriber. `RUST_LOG` wins over `log.level`.
pub fn init_tracing(log: &LogSection) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&log.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_target(false);
    let _ = match log.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
