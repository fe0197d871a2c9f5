//! Single-flight scheduling of snapshot runs.
//!
//! At most one snapshot runs per project. A request for the state that is
//! already being snapshotted is absorbed; a request for a different state is
//! counted and served by one follow-up run once the current run succeeds.
//! The follow-up targets the library as it is at that moment, not any of the
//! queued targets.

use std::path::Path;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::tool::{SnapshotCompletion, SnapshotId, SnapshotJob, SyncTool};

/// Outcome of [`SnapshotScheduler::request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotRequest {
    Started(SnapshotId),
    /// A run toward the same target is already in flight.
    Absorbed,
    /// A run toward another target is in flight; a follow-up is owed.
    Queued { pending: u32 },
    /// The tool refused to start; nothing is recorded.
    LaunchFailed,
}

/// What the caller must do after [`SnapshotScheduler::complete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionAction {
    /// Completion for a run that is not the active one.
    Ignored,
    /// The run failed. Nothing is persisted; the next drift retries.
    Failed,
    /// Requests arrived mid-flight; request a snapshot of the current library.
    FollowUp,
    /// Fully caught up; persist both hashes and announce the change.
    CaughtUp,
}

#[derive(Debug, Clone)]
struct ActiveSnapshot {
    id: SnapshotId,
    target_hash: String,
    started_at: Instant,
}

/// Serializable view for status surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub active_id: Option<SnapshotId>,
    pub active_target: Option<String>,
    pub pending: u32,
}

#[derive(Debug, Default)]
pub struct SnapshotScheduler {
    active: Option<ActiveSnapshot>,
    pending: u32,
    next_id: u64,
}

impl SnapshotScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request<T: SyncTool + ?Sized>(
        &mut self,
        target_hash: &str,
        project_dir: &Path,
        tool: &mut T,
    ) -> SnapshotRequest {
        if let Some(active) = &self.active {
            if active.target_hash == target_hash {
                tracing::debug!(snapshot = %active.id, target_hash, "snapshot already running");
                return SnapshotRequest::Absorbed;
            }
            self.pending += 1;
            tracing::debug!(
                snapshot = %active.id,
                pending = self.pending,
                "snapshot requested while running, queueing",
            );
            return SnapshotRequest::Queued {
                pending: self.pending,
            };
        }

        self.next_id += 1;
        let id = SnapshotId(self.next_id);
        let job = SnapshotJob {
            id,
            project_dir: project_dir.to_path_buf(),
            target_hash: target_hash.to_string(),
        };
        match tool.start_snapshot(job) {
            Ok(()) => {
                tracing::info!(snapshot = %id, target_hash, "started snapshot");
                self.active = Some(ActiveSnapshot {
                    id,
                    target_hash: target_hash.to_string(),
                    started_at: Instant::now(),
                });
                SnapshotRequest::Started(id)
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to start snapshot");
                SnapshotRequest::LaunchFailed
            }
        }
    }

    pub fn complete(&mut self, completion: &SnapshotCompletion) -> CompletionAction {
        let Some(active) = self.active.as_ref() else {
            tracing::warn!(snapshot = %completion.id, "completion with no active snapshot");
            return CompletionAction::Ignored;
        };
        if active.id != completion.id {
            tracing::warn!(
                snapshot = %completion.id,
                active = %active.id,
                "completion for a snapshot that is not active",
            );
            return CompletionAction::Ignored;
        }

        let elapsed = active.started_at.elapsed();
        self.active = None;

        if !completion.is_success() {
            tracing::error!(
                snapshot = %completion.id,
                exit_code = ?completion.exit_code,
                error = completion.error.as_deref().unwrap_or(""),
                duration_ms = elapsed.as_millis() as u64,
                "snapshot failed",
            );
            return CompletionAction::Failed;
        }

        tracing::info!(
            snapshot = %completion.id,
            duration_ms = elapsed.as_millis() as u64,
            "finished snapshot",
        );
        if self.pending > 0 {
            tracing::debug!(pending = self.pending, "executing pending snapshot");
            self.pending = 0;
            CompletionAction::FollowUp
        } else {
            CompletionAction::CaughtUp
        }
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_none()
    }

    pub fn pending(&self) -> u32 {
        self.pending
    }

    pub fn active_target(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.target_hash.as_str())
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            active_id: self.active.as_ref().map(|a| a.id),
            active_target: self.active.as_ref().map(|a| a.target_hash.clone()),
            pending: self.pending,
        }
    }
}
