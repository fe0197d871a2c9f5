//! [`SyncTool`] backed by real processes.
//!
//! The restore query and the version check run synchronously through
//! [`ToolCommands`]. Snapshots run as `tokio::process` children; a spawned
//! task forwards their output to `tracing` and reports exactly one
//! [`SnapshotCompletion`] on the completion channel.

use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use lockstep_core::{RestoreAction, ToolConfig};
use lockstep_sync::{SnapshotCompletion, SnapshotId, SnapshotJob, SyncTool, ToolCommands, ToolError};

pub struct ProcessTool {
    commands: ToolCommands,
    completions: mpsc::UnboundedSender<SnapshotCompletion>,
}

impl ProcessTool {
    pub fn new(
        config: &ToolConfig,
        project_dir: &Path,
        completions: mpsc::UnboundedSender<SnapshotCompletion>,
    ) -> Self {
        Self {
            commands: ToolCommands::new(config, project_dir),
            completions,
        }
    }
}

impl SyncTool for ProcessTool {
    fn is_available(&self) -> bool {
        self.commands.is_available()
    }

    fn pending_restore_actions(&self, _project_dir: &Path) -> Result<Vec<RestoreAction>, ToolError> {
        self.commands.query_restore_actions()
    }

    /// Must be called from within a tokio runtime.
    fn start_snapshot(&mut self, job: SnapshotJob) -> Result<(), ToolError> {
        let line = self.commands.snapshot()?;
        let child = Command::new(&line.program)
            .args(&line.args)
            .current_dir(&job.project_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false)
            .spawn()
            .map_err(|source| ToolError::Launch {
                program: line.program.clone(),
                source,
            })?;

        let completions = self.completions.clone();
        tokio::spawn(async move {
            let completion = wait_for_snapshot(job.id, child).await;
            if completions.send(completion).is_err() {
                tracing::warn!(snapshot = %job.id, "session gone before snapshot completed");
            }
        });
        Ok(())
    }
}

async fn wait_for_snapshot(id: SnapshotId, mut child: Child) -> SnapshotCompletion {
    let stdout = child
        .stdout
        .take()
        .map(|out| tokio::spawn(forward_lines(out, id, "stdout")));
    let stderr = child
        .stderr
        .take()
        .map(|err| tokio::spawn(forward_lines(err, id, "stderr")));

    let status = child.wait().await;
    for forwarder in [stdout, stderr].into_iter().flatten() {
        let _ = forwarder.await;
    }

    match status {
        Ok(status) => SnapshotCompletion {
            id,
            exit_code: status.code(),
            error: None,
        },
        Err(err) => SnapshotCompletion::failed(id, err.to_string()),
    }
}

async fn forward_lines<R>(reader: R, id: SnapshotId, stream: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::debug!(snapshot = %id, stream, "{line}"),
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(snapshot = %id, stream, error = %err, "failed to read snapshot output");
                break;
            }
        }
    }
}
