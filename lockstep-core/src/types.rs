//! Domain types shared by the reconciliation engine, the daemon and the CLI.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

/// One of the two pieces of project state whose hashes are tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Lockfile,
    Library,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 2] = [ArtifactKind::Lockfile, ArtifactKind::Library];

    /// The counterpart consulted when this artifact drifts.
    pub fn other(self) -> ArtifactKind {
        match self {
            ArtifactKind::Lockfile => ArtifactKind::Library,
            ArtifactKind::Library => ArtifactKind::Lockfile,
        }
    }

    /// Key under which the last-known hash is persisted.
    pub fn store_key(self) -> &'static str {
        match self {
            ArtifactKind::Lockfile => "lockfileHash",
            ArtifactKind::Library => "libraryHash",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Lockfile => write!(f, "lockfile"),
            ArtifactKind::Library => write!(f, "library"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tool payloads and notifications
// ---------------------------------------------------------------------------

/// A restore step the package tool reports as pending for the current lockfile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreAction {
    pub package: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lockfile_version: Option<String>,
}

/// Events surfaced to whoever is listening on the session (socket
/// subscribers, the CLI).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    /// A snapshot caught up with the library; package listings are stale.
    InstalledPackagesChanged,
    /// The lockfile implies restore steps that need user approval.
    RestoreNeeded { actions: Vec<RestoreAction> },
}

/// Whether tracking is meaningful for a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrackingContext {
    /// The package tool is installed at the minimum version.
    pub available: bool,
    /// `available` and the project directory exists.
    pub applicable: bool,
    /// `applicable` and the project has a lockfile or a library directory.
    pub tracked: bool,
}
