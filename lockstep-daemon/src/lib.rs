//! Per-project daemon: file watcher + session task + control socket.

mod error;
pub mod paths;
pub mod protocol;
mod runtime;
pub mod tool;
mod watcher;

pub use error::DaemonError;
pub use protocol::{
    request_check, request_status, request_stop, send_request, subscribe, DaemonRequest,
    DaemonResponse,
};
pub use runtime::{
    check_blocking, init_tracing, local_status, run, run_once, start_blocking, BroadcastNotifier,
    CheckReport, CommandReply,
};
pub use tool::ProcessTool;
