//! Per-project configuration.
//!
//! # Storage layout
//!
//! ```text
//! <project>/
//!   .lockstep.yaml        (optional, defaults apply when absent)
//!   .lockstep/
//!     state.json          (persisted hashes, see `store`)
//!     daemon.sock         (daemon control socket)
//! ```
//!
//! Paths in the config are relative to the project directory. The resolved
//! form used by the engine is [`ProjectLayout`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{config_io_err, ConfigError};

pub const CONFIG_FILE: &str = ".lockstep.yaml";
pub const STATE_DIR: &str = ".lockstep";

/// Placeholder substituted with the project directory in tool argv templates.
pub const PROJECT_PLACEHOLDER: &str = "{project}";

// ---------------------------------------------------------------------------
// 1. Serialized config
// ---------------------------------------------------------------------------

/// Contents of `.lockstep.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Lockfile path, relative to the project directory.
    pub lockfile: PathBuf,
    /// Library directory, relative to the project directory.
    pub library: PathBuf,
    /// Per-package metadata file hashed to summarize the library.
    pub metadata_file: String,
    /// Editor bookkeeping directories inside the library whose changes are ignored.
    pub excluded_dirs: Vec<String>,
    /// Trailing debounce window applied to raw watcher events.
    pub debounce_ms: u64,
    /// Snapshot automatically when the library drifts. When off, drift is
    /// reported and the lockfile is left alone.
    pub auto_snapshot: bool,
    pub tool: ToolConfig,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            lockfile: PathBuf::from("packrat").join("packrat.lock"),
            library: PathBuf::from("packrat").join("lib"),
            metadata_file: "DESCRIPTION".to_string(),
            excluded_dirs: vec!["manipulate".to_string(), "rstudio".to_string()],
            debounce_ms: 250,
            auto_snapshot: true,
            tool: ToolConfig::default(),
        }
    }
}

/// Commands used to drive the external package tool.
///
/// Each command is an argv template; `{project}` is replaced with the
/// absolute project directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Re-derives the lockfile from the library. Runs asynchronously.
    pub snapshot: Vec<String>,
    /// Prints a JSON array of pending restore actions on stdout.
    pub restore_query: Vec<String>,
    /// Prints the installed tool version on stdout.
    pub version: Vec<String>,
    /// Minimum dotted version required for tracking to be available.
    pub min_version: String,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            snapshot: rscript(
                "packrat::snapshot(project = '{project}', prompt = FALSE, infer.dependencies = FALSE)",
            ),
            restore_query: rscript(
                "cat(jsonlite::toJSON(packrat:::pendingRestoreActions('{project}'), auto_unbox = TRUE))",
            ),
            version: rscript("cat(as.character(utils::packageVersion('packrat')))"),
            min_version: "0.2.0.100".to_string(),
        }
    }
}

fn rscript(expr: &str) -> Vec<String> {
    ["Rscript", "--vanilla", "-e", expr]
        .into_iter()
        .map(str::to_string)
        .collect()
}

impl ProjectConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// `<project>/.lockstep.yaml`. Pure, no I/O.
pub fn config_path(project_dir: &Path) -> PathBuf {
    project_dir.join(CONFIG_FILE)
}

/// `<project>/.lockstep/`. Pure, no I/O.
pub fn state_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(STATE_DIR)
}

// ---------------------------------------------------------------------------
// 2. Load / save
// ---------------------------------------------------------------------------

/// Load `.lockstep.yaml` for a project, falling back to defaults when the
/// file does not exist.
///
/// Returns `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(project_dir: &Path) -> Result<ProjectConfig, ConfigError> {
    let path = config_path(project_dir);
    if !path.exists() {
        return Ok(ProjectConfig::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| config_io_err(&path, e))?;
    if contents.trim().is_empty() {
        return Ok(ProjectConfig::default());
    }
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })
}

/// Write `config` to `<project>/.lockstep.yaml` atomically.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `rename`.
pub fn save_at(project_dir: &Path, config: &ProjectConfig) -> Result<PathBuf, ConfigError> {
    let path = config_path(project_dir);
    let yaml = serde_yaml::to_string(config)?;
    let tmp = project_dir.join(format!("{CONFIG_FILE}.tmp"));
    std::fs::write(&tmp, yaml).map_err(|e| config_io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| config_io_err(&path, e))?;
    Ok(path)
}

// ---------------------------------------------------------------------------
// 3. Resolved layout
// ---------------------------------------------------------------------------

/// Absolute paths and filters derived from a [`ProjectConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    pub project_dir: PathBuf,
    pub lockfile: PathBuf,
    pub library: PathBuf,
    pub metadata_file: String,
    pub excluded_dirs: Vec<String>,
}

impl ProjectLayout {
    /// Resolve `config` against `project_dir`.
    ///
    /// The project directory is canonicalized so that watcher paths (which
    /// arrive as real paths, e.g. `/private/var/...` on macOS) compare equal.
    pub fn resolve(project_dir: &Path, config: &ProjectConfig) -> Result<Self, ConfigError> {
        let project_dir = std::fs::canonicalize(project_dir).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                ConfigError::ProjectNotFound {
                    path: project_dir.to_path_buf(),
                }
            } else {
                config_io_err(project_dir, err)
            }
        })?;
        Ok(Self {
            lockfile: project_dir.join(&config.lockfile),
            library: project_dir.join(&config.library),
            metadata_file: config.metadata_file.clone(),
            excluded_dirs: config.excluded_dirs.clone(),
            project_dir,
        })
    }

    /// Load the project's config and resolve it in one step.
    pub fn load(project_dir: &Path) -> Result<(ProjectConfig, Self), ConfigError> {
        let config = load_at(project_dir)?;
        let layout = Self::resolve(project_dir, &config)?;
        Ok((config, layout))
    }

    pub fn state_dir(&self) -> PathBuf {
        state_dir(&self.project_dir)
    }
}
