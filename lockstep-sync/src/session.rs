//! Per-project reconciliation session.
//!
//! The session owns the hash store, hasher, guard, scheduler, router, the
//! package tool and the notification sink. It is driven from a single task:
//! every file batch, library-mutated signal and snapshot completion is
//! handled to completion before the next one is looked at, so none of its
//! state needs locking.
//!
//! Nothing is reconciled while the package tool is unavailable. With
//! auto-snapshot off, library drift is reported but left unresolved.

use std::path::Path;

use serde::{Deserialize, Serialize};

use lockstep_core::{
    ArtifactKind, Notification, PersistentStore, ProjectLayout, TrackingContext,
};

use crate::engine::{DriftOutcome, ReconciliationEngine};
use crate::guard::ReconciliationGuard;
use crate::hash_store::HashStore;
use crate::hasher::StateHasher;
use crate::router::ChangeRouter;
use crate::scheduler::{CompletionAction, SchedulerStatus, SnapshotRequest, SnapshotScheduler};
use crate::tool::{SnapshotCompletion, SyncTool};

/// Receives notifications produced by the session.
pub trait Notifier {
    fn notify(&mut self, notification: Notification);
}

impl Notifier for Vec<Notification> {
    fn notify(&mut self, notification: Notification) {
        self.push(notification);
    }
}

/// Stored vs. computed hash for one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashStatus {
    pub artifact: ArtifactKind,
    pub stored: String,
    pub computed: String,
    pub drifted: bool,
}

/// Everything a status surface needs to render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub project_dir: String,
    pub context: TrackingContext,
    pub auto_snapshot: bool,
    pub hashes: Vec<HashStatus>,
    pub snapshot: SchedulerStatus,
}

pub struct Session<S, T, N> {
    layout: ProjectLayout,
    engine: ReconciliationEngine<S>,
    guard: ReconciliationGuard,
    scheduler: SnapshotScheduler,
    router: ChangeRouter,
    tool: T,
    notifier: N,
    auto_snapshot: bool,
}

impl<S, T, N> Session<S, T, N>
where
    S: PersistentStore,
    T: SyncTool,
    N: Notifier,
{
    pub fn new(layout: ProjectLayout, store: S, tool: T, notifier: N) -> Self {
        let engine = ReconciliationEngine::new(HashStore::new(store), StateHasher::new(&layout));
        Self {
            router: ChangeRouter::new(&layout),
            engine,
            guard: ReconciliationGuard::new(),
            scheduler: SnapshotScheduler::new(),
            tool,
            notifier,
            layout,
            auto_snapshot: true,
        }
    }

    /// Whether library drift starts a snapshot (the default) or is only
    /// reported.
    pub fn with_auto_snapshot(mut self, enabled: bool) -> Self {
        self.auto_snapshot = enabled;
        self
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Handle one batch of changed paths. Returns the number of
    /// reconciliation passes that ran.
    pub fn on_files_changed<P: AsRef<Path>>(&mut self, paths: &[P]) -> usize {
        let mut passes = 0;
        for kind in self.router.route(paths) {
            tracing::debug!(artifact = %kind, "detected change");
            if self.reconcile(kind).is_some() {
                passes += 1;
            }
        }
        passes
    }

    /// Another actor reports that the package library was modified.
    /// Ignored when the project has no library directory.
    pub fn on_library_mutated(&mut self) -> Option<DriftOutcome> {
        if !self.router.library_exists() {
            tracing::debug!("library mutation reported but project has no library");
            return None;
        }
        tracing::debug!("detected modification to library");
        self.reconcile(ArtifactKind::Library)
    }

    /// Reconcile both artifacts, lockfile first.
    pub fn check_all(&mut self) -> Vec<DriftOutcome> {
        ArtifactKind::ALL
            .into_iter()
            .filter_map(|kind| self.reconcile(kind))
            .collect()
    }

    /// One guarded pass for `primary`. Returns `None` if another pass holds
    /// the guard or the package tool is not applicable to this project.
    pub fn reconcile(&mut self, primary: ArtifactKind) -> Option<DriftOutcome> {
        let Some(_scope) = self.guard.enter() else {
            tracing::debug!(artifact = %primary, "dropping nested reconciliation");
            return None;
        };
        if !self.context().applicable {
            tracing::debug!(artifact = %primary, "package tool unavailable, skipping reconciliation");
            return None;
        }

        let outcome = self.engine.reconcile(primary);
        if let DriftOutcome::PrimaryDrifted { kind, new, .. } = &outcome {
            match kind {
                ArtifactKind::Lockfile => self.on_lockfile_drift(new),
                ArtifactKind::Library => self.on_library_drift(new),
            }
        }
        Some(outcome)
    }

    /// Deliver the completion event of a snapshot started by this session.
    pub fn on_snapshot_completed(&mut self, completion: SnapshotCompletion) -> CompletionAction {
        let action = self.scheduler.complete(&completion);
        match action {
            CompletionAction::Ignored | CompletionAction::Failed => {}
            CompletionAction::FollowUp => {
                let target = self.engine.hasher().library_hash();
                self.request_snapshot(&target);
            }
            CompletionAction::CaughtUp => {
                // Library and lockfile are now in sync.
                self.engine.adopt_current();
                self.notifier.notify(Notification::InstalledPackagesChanged);
            }
        }
        action
    }

    /// Record the current state of both artifacts as the baseline.
    pub fn adopt_current(&mut self) -> (String, String) {
        self.engine.adopt_current()
    }

    // -----------------------------------------------------------------------
    // Drift handlers
    // -----------------------------------------------------------------------

    fn on_lockfile_drift(&mut self, new_hash: &str) {
        let actions = match self.tool.pending_restore_actions(&self.layout.project_dir) {
            Ok(actions) => actions,
            Err(err) => {
                // Leave the stored hash alone; the next lockfile event retries.
                tracing::error!(error = %err, "pending restore query failed");
                return;
            }
        };

        if actions.is_empty() {
            tracing::debug!("no pending restore actions found, updating hash");
            self.engine.hashes_mut().set(ArtifactKind::Lockfile, new_hash);
        } else {
            tracing::info!(count = actions.len(), "found pending restore actions");
            self.notifier.notify(Notification::RestoreNeeded { actions });
        }
    }

    fn on_library_drift(&mut self, new_hash: &str) {
        if !self.auto_snapshot {
            tracing::info!(target_hash = new_hash, "library changed; auto-snapshot is off");
            return;
        }
        self.request_snapshot(new_hash);
    }

    fn request_snapshot(&mut self, target_hash: &str) -> SnapshotRequest {
        self.scheduler
            .request(target_hash, &self.layout.project_dir, &mut self.tool)
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    pub fn context(&self) -> TrackingContext {
        let available = self.tool.is_available();
        let applicable = available && self.layout.project_dir.is_dir();
        let tracked =
            applicable && (self.layout.lockfile.exists() || self.layout.library.is_dir());
        TrackingContext {
            available,
            applicable,
            tracked,
        }
    }

    pub fn hash_status(&self) -> Vec<HashStatus> {
        ArtifactKind::ALL
            .into_iter()
            .map(|artifact| {
                let stored = self.engine.hashes().get(artifact);
                let computed = self.engine.hasher().compute(artifact);
                HashStatus {
                    artifact,
                    drifted: stored != computed,
                    stored,
                    computed,
                }
            })
            .collect()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            project_dir: self.layout.project_dir.display().to_string(),
            context: self.context(),
            auto_snapshot: self.auto_snapshot,
            hashes: self.hash_status(),
            snapshot: self.scheduler.status(),
        }
    }

    /// No snapshot is running.
    pub fn is_idle(&self) -> bool {
        self.scheduler.is_idle()
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    pub fn guard(&self) -> &ReconciliationGuard {
        &self.guard
    }

    pub fn hashes(&self) -> &HashStore<S> {
        self.engine.hashes()
    }

    pub fn scheduler(&self) -> &SnapshotScheduler {
        &self.scheduler
    }

    pub fn tool(&self) -> &T {
        &self.tool
    }

    pub fn tool_mut(&mut self) -> &mut T {
        &mut self.tool
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }
}
