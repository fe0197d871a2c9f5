use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot};

use lockstep_core::{JsonFileStore, Notification, PersistentStore, ProjectLayout};
use lockstep_sync::{
    DriftOutcome, Notifier, Session, SessionStatus, SnapshotCompletion, SyncTool,
};

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;
use crate::protocol::{DaemonRequest, DaemonResponse};
use crate::tool::ProcessTool;
use crate::watcher::watcher_task;

type DaemonSession = Session<JsonFileStore, ProcessTool, BroadcastNotifier>;

/// Everything the session task reacts to, besides snapshot completions.
#[derive(Debug)]
pub(crate) enum SessionEvent {
    FilesChanged(Vec<PathBuf>),
    Command {
        command: SessionCommand,
        respond_to: oneshot::Sender<CommandReply>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionCommand {
    Status,
    Check,
    LibraryMutated,
    Adopt,
}

/// Reply to a socket command: what reconciliation did, then the state after.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandReply {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outcomes: Vec<DriftOutcome>,
    pub status: SessionStatus,
}

/// Result of a one-shot `check` run outside the daemon.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub outcomes: Vec<DriftOutcome>,
    pub notifications: Vec<Notification>,
    pub status: SessionStatus,
}

/// Fans session notifications out to socket subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    pub fn new(tx: broadcast::Sender<Notification>) -> Self {
        Self { tx }
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&mut self, notification: Notification) {
        tracing::info!(notification = ?notification, "emitting notification");
        // No subscribers is not an error.
        let _ = self.tx.send(notification);
    }
}

/// Start the daemon for `project_dir` and block the current thread until it
/// exits.
pub fn start_blocking(project_dir: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(project_dir.to_path_buf()))
}

/// Run the daemon: watcher, session, socket server and signal handler.
pub async fn run(project_dir: PathBuf) -> Result<(), DaemonError> {
    let (config, layout) = ProjectLayout::load(&project_dir)?;
    let state_dir = layout.state_dir();
    fs::create_dir_all(&state_dir).map_err(|e| io_err(&state_dir, e))?;

    let (completion_tx, completion_rx) = mpsc::unbounded_channel::<SnapshotCompletion>();
    let (event_tx, event_rx) = mpsc::unbounded_channel::<SessionEvent>();
    let (notify_tx, _) = broadcast::channel::<Notification>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let tool = ProcessTool::new(&config.tool, &layout.project_dir, completion_tx);
    let store = JsonFileStore::for_project(&layout.project_dir);
    let session = Session::new(
        layout.clone(),
        store,
        tool,
        BroadcastNotifier::new(notify_tx.clone()),
    )
    .with_auto_snapshot(config.auto_snapshot);
    tracing::info!(
        project = %layout.project_dir.display(),
        lockfile = %layout.lockfile.display(),
        library = %layout.library.display(),
        "starting lockstep daemon",
    );

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let project_dir = layout.project_dir.clone();
        let event_tx = event_tx.clone();
        let window = config.debounce();
        tokio::spawn(async move {
            let result =
                watcher_task(project_dir, state_dir, window, event_tx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let session_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let result = session_task(session, event_rx, completion_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let project_dir = layout.project_dir.clone();
        let event_tx = event_tx.clone();
        let notify_tx = notify_tx.clone();
        tokio::spawn(async move {
            let result = socket_server_task(
                project_dir,
                event_tx,
                notify_tx,
                shutdown.clone(),
                shutdown.subscribe(),
            )
            .await;
            let _ = shutdown.send(());
            result
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

    let (watcher_result, session_result, socket_result, signal_result) =
        tokio::join!(watcher_handle, session_handle, socket_handle, signal_handle);

    handle_join("watcher", watcher_result)?;
    handle_join("session", session_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("lockstep daemon stopped");
    Ok(())
}

async fn session_task(
    mut session: DaemonSession,
    mut event_rx: mpsc::UnboundedReceiver<SessionEvent>,
    mut completion_rx: mpsc::UnboundedReceiver<SnapshotCompletion>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    // Catch up on anything that changed while no daemon was running.
    session.check_all();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                handle_event(&mut session, event);
            }
            completion = completion_rx.recv() => {
                let Some(completion) = completion else { break };
                session.on_snapshot_completed(completion);
            }
        }
    }

    if !session.is_idle() {
        tracing::warn!("shutting down with a snapshot still running");
    }
    Ok(())
}

fn handle_event<S, T, N>(session: &mut Session<S, T, N>, event: SessionEvent)
where
    S: PersistentStore,
    T: SyncTool,
    N: Notifier,
{
    match event {
        SessionEvent::FilesChanged(paths) => {
            let passes = session.on_files_changed(&paths);
            tracing::debug!(paths = paths.len(), passes, "processed file batch");
        }
        SessionEvent::Command {
            command,
            respond_to,
        } => {
            let reply = apply_command(session, command);
            let _ = respond_to.send(reply);
        }
    }
}

fn apply_command<S, T, N>(session: &mut Session<S, T, N>, command: SessionCommand) -> CommandReply
where
    S: PersistentStore,
    T: SyncTool,
    N: Notifier,
{
    let outcomes = match command {
        SessionCommand::Status => Vec::new(),
        SessionCommand::Check => session.check_all(),
        SessionCommand::LibraryMutated => session.on_library_mutated().into_iter().collect(),
        SessionCommand::Adopt => {
            session.adopt_current();
            Vec::new()
        }
    };
    CommandReply {
        outcomes,
        status: session.status(),
    }
}

async fn socket_server_task(
    project_dir: PathBuf,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    notify_tx: broadcast::Sender<Notification>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&project_dir);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "listening for control requests");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let event_tx = event_tx.clone();
                let notify_tx = notify_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, event_tx, notify_tx, shutdown_tx).await {
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
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    notify_tx: broadcast::Sender<Notification>,
    shutdown_tx: broadcast::Sender<()>,
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

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let command = match request.cmd.as_str() {
            "status" => SessionCommand::Status,
            "check" => SessionCommand::Check,
            "library-mutated" => SessionCommand::LibraryMutated,
            "adopt" => SessionCommand::Adopt,
            "subscribe" => {
                let notifications = notify_tx.subscribe();
                write_response(&mut writer, &DaemonResponse::ok(json!({ "subscribed": true })))
                    .await?;
                return stream_notifications(&mut writer, notifications, shutdown_tx.subscribe())
                    .await;
            }
            "stop" => {
                let _ = shutdown_tx.send(());
                write_response(&mut writer, &DaemonResponse::ok(json!({ "stopping": true })))
                    .await?;
                break;
            }
            other => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("unknown command '{other}'")),
                )
                .await?;
                continue;
            }
        };

        let response = match dispatch(&event_tx, command).await {
            Ok(reply) => DaemonResponse::ok(serde_json::to_value(reply)?),
            Err(err) => DaemonResponse::error(err.to_string()),
        };
        write_response(&mut writer, &response).await?;
    }

    Ok(())
}

async fn dispatch(
    event_tx: &mpsc::UnboundedSender<SessionEvent>,
    command: SessionCommand,
) -> Result<CommandReply, DaemonError> {
    let (tx, rx) = oneshot::channel();
    event_tx
        .send(SessionEvent::Command {
            command,
            respond_to: tx,
        })
        .map_err(|_| DaemonError::ChannelClosed("session queue"))?;
    rx.await
        .map_err(|_| DaemonError::ChannelClosed("session response"))
}

async fn stream_notifications(
    writer: &mut OwnedWriteHalf,
    mut notifications: broadcast::Receiver<Notification>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => return Ok(()),
            received = notifications.recv() => {
                let notification = match received {
                    Ok(notification) => notification,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "subscriber lagging, notifications dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                };
                let response = DaemonResponse::ok(serde_json::to_value(&notification)?);
                if let Err(err) = write_response(writer, &response).await {
                    tracing::debug!(error = %err, "subscriber disconnected");
                    return Ok(());
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// One-shot use from the CLI
// ---------------------------------------------------------------------------

/// Reconcile both artifacts once, waiting for any snapshot that starts (and
/// its follow-ups) to finish. Uses the project's persistent store, so it
/// must not run alongside a daemon for the same project.
pub async fn run_once(project_dir: &Path) -> Result<CheckReport, DaemonError> {
    let (config, layout) = ProjectLayout::load(project_dir)?;
    let (completion_tx, mut completion_rx) = mpsc::unbounded_channel();
    let tool = ProcessTool::new(&config.tool, &layout.project_dir, completion_tx);
    let store = JsonFileStore::for_project(&layout.project_dir);
    let mut session =
        Session::new(layout, store, tool, Vec::new()).with_auto_snapshot(config.auto_snapshot);

    let outcomes = session.check_all();
    while !session.is_idle() {
        let completion = completion_rx
            .recv()
            .await
            .ok_or(DaemonError::ChannelClosed("snapshot completion"))?;
        session.on_snapshot_completed(completion);
    }

    Ok(CheckReport {
        outcomes,
        notifications: session.notifier().clone(),
        status: session.status(),
    })
}

/// [`run_once`] on a fresh current-thread runtime.
pub fn check_blocking(project_dir: &Path) -> Result<CheckReport, DaemonError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run_once(project_dir))
}

/// Status computed directly from disk and the persisted store, without a
/// daemon. Starts nothing.
pub fn local_status(project_dir: &Path) -> Result<SessionStatus, DaemonError> {
    let (config, layout) = ProjectLayout::load(project_dir)?;
    let (completion_tx, _completion_rx) = mpsc::unbounded_channel();
    let tool = ProcessTool::new(&config.tool, &layout.project_dir, completion_tx);
    let store = JsonFileStore::for_project(&layout.project_dir);
    let session =
        Session::new(layout, store, tool, Vec::new()).with_auto_snapshot(config.auto_snapshot);
    Ok(session.status())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon already running for this project: {}",
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

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let mut payload = serde_json::to_vec(response)?;
    payload.push(b'\n');
    writer
        .write_all(&payload)
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))
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

/// Install the global subscriber on stderr. `RUST_LOG` overrides the `info`
/// default; `LOCKSTEP_LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOCKSTEP_LOG_FORMAT").is_ok_and(|format| format == "json");
    let _ = if json {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init()
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init()
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
