//! End-to-end reconciliation behaviour against a real project tree and a
//! scripted package tool.

use std::fs;
use std::path::{Path, PathBuf};

use lockstep_core::{
    ArtifactKind, MemoryStore, Notification, PersistentStore, ProjectConfig, ProjectLayout,
    RestoreAction,
};
use lockstep_sync::{
    hash_store::NAMESPACE, hasher::hash_bytes, CompletionAction, DriftOutcome, Session,
    SnapshotCompletion, SnapshotJob, SyncTool, ToolError,
};
use tempfile::TempDir;

#[derive(Debug, Clone)]
enum RestoreReply {
    Nothing,
    Actions(Vec<RestoreAction>),
    Fail,
}

struct ScriptedTool {
    restore: RestoreReply,
    started: Vec<SnapshotJob>,
}

impl ScriptedTool {
    fn new() -> Self {
        Self {
            restore: RestoreReply::Nothing,
            started: Vec::new(),
        }
    }
}

impl SyncTool for ScriptedTool {
    fn is_available(&self) -> bool {
        true
    }

    fn pending_restore_actions(&self, _: &Path) -> Result<Vec<RestoreAction>, ToolError> {
        match &self.restore {
            RestoreReply::Nothing => Ok(Vec::new()),
            RestoreReply::Actions(actions) => Ok(actions.clone()),
            RestoreReply::Fail => Err(ToolError::EmptyCommand {
                purpose: "restore query",
            }),
        }
    }

    fn start_snapshot(&mut self, job: SnapshotJob) -> Result<(), ToolError> {
        self.started.push(job);
        Ok(())
    }
}

type TestSession = Session<MemoryStore, ScriptedTool, Vec<Notification>>;

struct Fixture {
    _tmp: TempDir,
    layout: ProjectLayout,
}

impl Fixture {
    fn new() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        let tmp = TempDir::new().expect("tmp");
        let layout = ProjectLayout::resolve(tmp.path(), &ProjectConfig::default()).expect("layout");
        fs::create_dir_all(&layout.library).expect("library");
        Self { _tmp: tmp, layout }
    }

    fn write_lockfile(&self, content: &str) {
        fs::write(&self.layout.lockfile, content).expect("lockfile");
    }

    fn install(&self, package: &str, version: &str) -> PathBuf {
        let dir = self.layout.library.join(package);
        fs::create_dir_all(&dir).expect("pkg dir");
        let path = dir.join("DESCRIPTION");
        fs::write(&path, format!("Package: {package}\nVersion: {version}\n")).expect("desc");
        path
    }

    fn session_with(&self, stored_lockfile: &str, stored_library: &str) -> TestSession {
        let mut store = MemoryStore::new();
        store
            .put(NAMESPACE, ArtifactKind::Lockfile.store_key(), stored_lockfile)
            .expect("seed");
        store
            .put(NAMESPACE, ArtifactKind::Library.store_key(), stored_library)
            .expect("seed");
        Session::new(self.layout.clone(), store, ScriptedTool::new(), Vec::new())
    }

    fn lockfile_hash(&self) -> String {
        hash_bytes(&fs::read(&self.layout.lockfile).expect("read lockfile"))
    }

    fn library_hash(&self, descriptions: &[&str]) -> String {
        hash_bytes(descriptions.concat().as_bytes())
    }
}

fn digest_desc(version: &str) -> String {
    format!("Package: digest\nVersion: {version}\n")
}

// ---------------------------------------------------------------------------
// Lockfile path
// ---------------------------------------------------------------------------

#[test]
fn lockfile_change_with_nothing_to_restore_updates_hash_silently() {
    let fx = Fixture::new();
    fx.install("digest", "0.6.4");
    let library = fx.library_hash(&[&digest_desc("0.6.4")]);
    fx.write_lockfile("Package: digest\nVersion: 0.6.4\nSource: CRAN\n");

    let mut session = fx.session_with("A", &library);
    let passes = session.on_files_changed(&[fx.layout.lockfile.clone()]);

    assert_eq!(passes, 1);
    assert_eq!(session.hashes().get(ArtifactKind::Lockfile), fx.lockfile_hash());
    assert_eq!(session.hashes().get(ArtifactKind::Library), library);
    assert!(session.notifier().is_empty());
    assert!(session.tool().started.is_empty());
}

#[test]
fn lockfile_change_with_pending_restore_notifies_and_keeps_hash() {
    let fx = Fixture::new();
    fx.install("digest", "0.6.4");
    let library = fx.library_hash(&[&digest_desc("0.6.4")]);
    fx.write_lockfile("Package: digest\nVersion: 0.6.8\n");

    let mut session = fx.session_with("A", &library);
    let actions = vec![RestoreAction {
        package: "digest".to_string(),
        action: Some("upgrade".to_string()),
        library_version: Some("0.6.4".to_string()),
        lockfile_version: Some("0.6.8".to_string()),
    }];
    session.tool_mut().restore = RestoreReply::Actions(actions.clone());

    session.on_files_changed(&[fx.layout.lockfile.clone()]);

    assert_eq!(session.hashes().get(ArtifactKind::Lockfile), "A");
    assert_eq!(
        session.notifier().as_slice(),
        &[Notification::RestoreNeeded { actions }]
    );
    assert!(session.tool().started.is_empty());
}

#[test]
fn failed_restore_query_neither_persists_nor_notifies() {
    let fx = Fixture::new();
    fx.install("digest", "0.6.4");
    let library = fx.library_hash(&[&digest_desc("0.6.4")]);
    fx.write_lockfile("anything");

    let mut session = fx.session_with("A", &library);
    session.tool_mut().restore = RestoreReply::Fail;
    session.on_files_changed(&[fx.layout.lockfile.clone()]);

    assert_eq!(session.hashes().get(ArtifactKind::Lockfile), "A");
    assert!(session.notifier().is_empty());
}

// ---------------------------------------------------------------------------
// Library path and snapshot scheduling
// ---------------------------------------------------------------------------

#[test]
fn library_change_snapshots_then_refreshes_baseline() {
    let fx = Fixture::new();
    fx.write_lockfile("lock v1");
    let lockfile = fx.lockfile_hash();
    let desc = fx.install("digest", "0.6.8");
    let target = fx.library_hash(&[&digest_desc("0.6.8")]);

    let mut session = fx.session_with(&lockfile, "B");
    session.on_files_changed(&[desc]);

    assert_eq!(session.tool().started.len(), 1);
    let job = session.tool().started[0].clone();
    assert_eq!(job.target_hash, target);
    assert_eq!(job.project_dir, fx.layout.project_dir);
    assert_eq!(session.hashes().get(ArtifactKind::Library), "B");

    // The tool rewrites the lockfile before exiting.
    fx.write_lockfile("lock v2");
    let action = session.on_snapshot_completed(SnapshotCompletion::exited(job.id, 0));

    assert_eq!(action, CompletionAction::CaughtUp);
    assert_eq!(session.hashes().get(ArtifactKind::Library), target);
    assert_eq!(session.hashes().get(ArtifactKind::Lockfile), fx.lockfile_hash());
    assert_eq!(
        session.notifier().as_slice(),
        &[Notification::InstalledPackagesChanged]
    );
    assert!(session.is_idle());
}

#[test]
fn repeated_reconcile_without_disk_change_is_idempotent() {
    let fx = Fixture::new();
    fx.install("digest", "0.6.8");
    let mut session = fx.session_with("", "B");

    session.reconcile(ArtifactKind::Library);
    let started = session.tool().started.clone();
    assert_eq!(started.len(), 1);
    session.on_snapshot_completed(SnapshotCompletion::exited(started[0].id, 0));

    assert_eq!(
        session.reconcile(ArtifactKind::Library),
        Some(DriftOutcome::Unchanged)
    );
    assert_eq!(
        session.reconcile(ArtifactKind::Library),
        Some(DriftOutcome::Unchanged)
    );
    assert_eq!(session.tool().started.len(), 1);
}

#[test]
fn burst_for_same_state_launches_one_snapshot() {
    let fx = Fixture::new();
    let desc = fx.install("digest", "0.6.8");
    let mut session = fx.session_with("", "B");

    let pkg_dir = desc.parent().expect("pkg dir").to_path_buf();
    session.on_files_changed(&[pkg_dir, desc.clone(), desc]);

    assert_eq!(session.tool().started.len(), 1);
    assert_eq!(session.scheduler().pending(), 0);
}

#[test]
fn change_mid_flight_queues_one_follow_up_on_current_state() {
    let fx = Fixture::new();
    let desc = fx.install("digest", "0.6.8");
    let mut session = fx.session_with("", "B");

    session.on_files_changed(&[desc]);
    let first = session.tool().started[0].clone();

    let second = fx.install("zoo", "1.8");
    session.on_files_changed(&[second]);
    let third = fx.install("Rcpp", "1.0");
    session.on_files_changed(&[third]);
    assert_eq!(session.tool().started.len(), 1);
    assert_eq!(session.scheduler().pending(), 2);

    let action = session.on_snapshot_completed(SnapshotCompletion::exited(first.id, 0));
    assert_eq!(action, CompletionAction::FollowUp);
    assert_eq!(session.scheduler().pending(), 0);
    assert_eq!(session.tool().started.len(), 2);

    // sorted traversal: Rcpp < digest < zoo
    let current = fx.library_hash(&[
        "Package: Rcpp\nVersion: 1.0\n",
        &digest_desc("0.6.8"),
        "Package: zoo\nVersion: 1.8\n",
    ]);
    assert_eq!(session.tool().started[1].target_hash, current);
    assert!(session.notifier().is_empty(), "no announcement until caught up");

    let follow_up = session.tool().started[1].id;
    assert_eq!(
        session.on_snapshot_completed(SnapshotCompletion::exited(follow_up, 0)),
        CompletionAction::CaughtUp
    );
    assert_eq!(session.hashes().get(ArtifactKind::Library), current);
    assert_eq!(session.notifier().len(), 1);
}

#[test]
fn failed_snapshot_persists_nothing_and_retries_on_next_drift() {
    let fx = Fixture::new();
    let desc = fx.install("digest", "0.6.8");
    let mut session = fx.session_with("", "B");

    session.on_files_changed(&[desc.clone()]);
    let job = session.tool().started[0].clone();
    let action = session.on_snapshot_completed(SnapshotCompletion::exited(job.id, 1));

    assert_eq!(action, CompletionAction::Failed);
    assert_eq!(session.hashes().get(ArtifactKind::Library), "B");
    assert!(session.notifier().is_empty());
    assert!(session.is_idle());

    session.on_files_changed(&[desc]);
    assert_eq!(session.tool().started.len(), 2);
    assert_eq!(session.tool().started[1].target_hash, job.target_hash);
}

// ---------------------------------------------------------------------------
// Conflict policy and routing
// ---------------------------------------------------------------------------

#[test]
fn both_drifted_adopts_reality_without_actions() {
    let fx = Fixture::new();
    fx.write_lockfile("lock v2");
    let desc = fx.install("digest", "0.6.8");
    let mut session = fx.session_with("A", "B");
    session.tool_mut().restore = RestoreReply::Actions(vec![RestoreAction {
        package: "digest".to_string(),
        action: None,
        library_version: None,
        lockfile_version: None,
    }]);

    session.on_files_changed(&[fx.layout.lockfile.clone(), desc]);

    assert_eq!(session.hashes().get(ArtifactKind::Lockfile), fx.lockfile_hash());
    assert_eq!(
        session.hashes().get(ArtifactKind::Library),
        fx.library_hash(&[&digest_desc("0.6.8")])
    );
    assert!(session.tool().started.is_empty());
    assert!(session.notifier().is_empty());
}

#[test]
fn excluded_and_unrelated_paths_do_nothing() {
    let fx = Fixture::new();
    let bookkeeping = fx.install("rstudio", "1.0");
    let mut session = fx.session_with("", "");

    let passes = session.on_files_changed(&[
        bookkeeping,
        fx.layout.project_dir.join("analysis.R"),
        fx.layout.library.join("digest").join("NAMESPACE"),
    ]);
    assert_eq!(passes, 0);
    assert!(session.tool().started.is_empty());
}

#[test]
fn library_mutated_signal_runs_library_pass() {
    let fx = Fixture::new();
    fx.install("digest", "0.6.8");
    let mut session = fx.session_with("", "");

    let outcome = session.on_library_mutated();
    assert!(matches!(
        outcome,
        Some(DriftOutcome::PrimaryDrifted {
            kind: ArtifactKind::Library,
            ..
        })
    ));
    assert_eq!(session.tool().started.len(), 1);
}
