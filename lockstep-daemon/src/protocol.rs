use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use lockstep_core::Notification;

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

/// JSON newline-delimited request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonRequest {
    pub cmd: String,
}

impl DaemonRequest {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self { cmd: cmd.into() }
    }
}

/// JSON newline-delimited response. `subscribe` streams one of these per
/// notification after the initial acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

fn connect(project_dir: &Path) -> Result<UnixStream, DaemonError> {
    let socket = socket_path(project_dir);
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning { socket });
    }

    UnixStream::connect(&socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            DaemonError::DaemonNotRunning {
                socket: socket.clone(),
            }
        } else {
            io_err(&socket, err)
        }
    })
}

fn write_request(
    stream: &mut UnixStream,
    project_dir: &Path,
    request: &DaemonRequest,
) -> Result<(), DaemonError> {
    let socket = socket_path(project_dir);
    let payload = serde_json::to_string(request)?;
    stream
        .write_all(payload.as_bytes())
        .map_err(|e| io_err(&socket, e))?;
    stream.write_all(b"\n").map_err(|e| io_err(&socket, e))?;
    stream.flush().map_err(|e| io_err(&socket, e))
}

fn read_response(
    reader: &mut impl BufRead,
    project_dir: &Path,
) -> Result<Option<DaemonResponse>, DaemonError> {
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .map_err(|e| io_err(socket_path(project_dir), e))?;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(line.trim_end())?))
}

/// Send one JSON request to the project's daemon and return one response.
pub fn send_request(
    project_dir: &Path,
    request: &DaemonRequest,
) -> Result<DaemonResponse, DaemonError> {
    let mut stream = connect(project_dir)?;
    write_request(&mut stream, project_dir, request)?;

    let mut reader = BufReader::new(stream);
    read_response(&mut reader, project_dir)?.ok_or_else(|| {
        DaemonError::Protocol("daemon closed connection before responding".to_string())
    })
}

pub fn request_status(project_dir: &Path) -> Result<Value, DaemonError> {
    let request = DaemonRequest::new("status");

    // The socket may not be bound yet right after `daemon start`.
    let mut last_not_running: Option<DaemonError> = None;
    for attempt in 0..5 {
        match send_request(project_dir, &request) {
            Ok(response) => return response_into_data(response),
            Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                last_not_running = Some(err);
                if attempt < 4 {
                    sleep(Duration::from_millis(100));
                    continue;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_not_running.unwrap_or_else(|| {
        DaemonError::Protocol("daemon status retry loop exited unexpectedly".to_string())
    }))
}

pub fn request_stop(project_dir: &Path) -> Result<(), DaemonError> {
    let response = send_request(project_dir, &DaemonRequest::new("stop"))?;
    response_into_data(response).map(|_| ())
}

/// Reconcile both artifacts inside the running daemon.
pub fn request_check(project_dir: &Path) -> Result<Value, DaemonError> {
    response_into_data(send_request(project_dir, &DaemonRequest::new("check"))?)
}

/// Stream notifications from the daemon until it shuts down or `on_event`
/// returns `false`.
pub fn subscribe<F>(project_dir: &Path, mut on_event: F) -> Result<(), DaemonError>
where
    F: FnMut(Notification) -> bool,
{
    let mut stream = connect(project_dir)?;
    write_request(&mut stream, project_dir, &DaemonRequest::new("subscribe"))?;
    let mut reader = BufReader::new(stream);

    let ack = read_response(&mut reader, project_dir)?.ok_or_else(|| {
        DaemonError::Protocol("daemon closed connection before acknowledging".to_string())
    })?;
    response_into_data(ack)?;

    while let Some(response) = read_response(&mut reader, project_dir)? {
        let data = response_into_data(response)?;
        let notification: Notification = serde_json::from_value(data)?;
        if !on_event(notification) {
            break;
        }
    }
    Ok(())
}

fn response_into_data(response: DaemonResponse) -> Result<Value, DaemonError> {
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        Err(DaemonError::Protocol(
            response
                .error
                .unwrap_or_else(|| "unknown daemon error".to_string()),
        ))
    }
}
