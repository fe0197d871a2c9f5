//! # lockstep-sync
//!
//! Hash-based reconciliation of a project's lockfile and package library.
//!
//! A [`Session`] owns one instance of every component for a single project
//! and is the only object that mutates reconciliation state. Feed it file
//! batches with [`Session::on_files_changed`] and snapshot completions with
//! [`Session::on_snapshot_completed`].

pub mod engine;
pub mod error;
pub mod guard;
pub mod hash_store;
pub mod hasher;
pub mod router;
pub mod scheduler;
pub mod session;
pub mod tool;

pub use engine::{DriftOutcome, ReconciliationEngine};
pub use error::ToolError;
pub use guard::{GuardScope, ReconciliationGuard};
pub use hash_store::HashStore;
pub use hasher::StateHasher;
pub use router::ChangeRouter;
pub use scheduler::{CompletionAction, SchedulerStatus, SnapshotRequest, SnapshotScheduler};
pub use session::{HashStatus, Notifier, Session, SessionStatus};
pub use tool::{SnapshotCompletion, SnapshotId, SnapshotJob, SyncTool, ToolCommands};
