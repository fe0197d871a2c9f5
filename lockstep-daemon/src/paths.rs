use std::path::{Path, PathBuf};

use lockstep_core::config::state_dir;

pub const DAEMON_SOCKET: &str = "daemon.sock";

/// `<project>/.lockstep/daemon.sock`
pub fn socket_path(project_dir: &Path) -> PathBuf {
    state_dir(project_dir).join(DAEMON_SOCKET)
}
