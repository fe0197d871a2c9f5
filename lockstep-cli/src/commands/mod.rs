pub mod check;
pub mod daemon;
pub mod init;
pub mod status;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use serde_json::Value;

use lockstep_core::{JsonFileStore, ProjectLayout};
use lockstep_daemon::{send_request, CommandReply, DaemonError, DaemonRequest};
use lockstep_sync::{HashStore, ReconciliationEngine, StateHasher};

/// `--project` shared by every command that operates on an existing project.
#[derive(Args, Debug, Clone)]
pub struct ProjectArg {
    /// Project directory (defaults to the current directory).
    #[arg(long, short = 'p', default_value = ".", global = true)]
    pub project: PathBuf,
}

impl ProjectArg {
    pub fn resolve(&self) -> Result<PathBuf> {
        self.project
            .canonicalize()
            .with_context(|| format!("cannot resolve project '{}'", self.project.display()))
    }
}

/// Send `cmd` to the project's daemon. `None` when no daemon is running.
pub fn query_daemon(project_dir: &Path, cmd: &str) -> Result<Option<CommandReply>> {
    match send_request(project_dir, &DaemonRequest::new(cmd)) {
        Ok(response) if response.ok => {
            let data = response.data.unwrap_or(Value::Null);
            let reply = serde_json::from_value(data)
                .with_context(|| format!("unexpected daemon reply to '{cmd}'"))?;
            Ok(Some(reply))
        }
        Ok(response) => bail!(
            "daemon rejected '{cmd}': {}",
            response.error.unwrap_or_else(|| "unknown error".to_string())
        ),
        Err(DaemonError::DaemonNotRunning { .. }) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("failed to send '{cmd}' to daemon")),
    }
}

/// Record the current lockfile and library hashes without a daemon.
/// Returns (lockfile, library).
pub fn adopt_local(layout: &ProjectLayout) -> (String, String) {
    let store = JsonFileStore::for_project(&layout.project_dir);
    let mut engine = ReconciliationEngine::new(HashStore::new(store), StateHasher::new(layout));
    engine.adopt_current()
}

/// Short display form of a stored or computed hash.
pub fn display_hash(hash: &str) -> String {
    if hash.is_empty() {
        "(none)".to_string()
    } else {
        hash.to_string()
    }
}
