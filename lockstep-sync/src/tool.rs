//! Boundary to the external package tool.
//!
//! The session only needs three things from the tool: whether it is usable,
//! which restore actions the current lockfile implies (a synchronous query),
//! and a way to start a snapshot whose completion is delivered back later as
//! a [`SnapshotCompletion`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};

use lockstep_core::{config::PROJECT_PLACEHOLDER, RestoreAction, ToolConfig};

use crate::error::ToolError;

/// Identifies one launched snapshot within a scheduler's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotId(pub u64);

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A snapshot the scheduler wants started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotJob {
    pub id: SnapshotId,
    pub project_dir: PathBuf,
    pub target_hash: String,
}

/// Single completion event for a started snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotCompletion {
    pub id: SnapshotId,
    /// `None` when the process was killed by a signal or never ran to exit.
    pub exit_code: Option<i32>,
    /// Set when waiting on the process failed.
    pub error: Option<String>,
}

impl SnapshotCompletion {
    pub fn exited(id: SnapshotId, exit_code: i32) -> Self {
        Self {
            id,
            exit_code: Some(exit_code),
            error: None,
        }
    }

    pub fn failed(id: SnapshotId, error: impl Into<String>) -> Self {
        Self {
            id,
            exit_code: None,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.exit_code == Some(0)
    }
}

/// The external package-management tool.
pub trait SyncTool {
    /// Installed at the required minimum version.
    fn is_available(&self) -> bool;

    /// Restore actions implied by the current lockfile. Empty means the
    /// library already matches it.
    fn pending_restore_actions(&self, project_dir: &Path)
        -> Result<Vec<RestoreAction>, ToolError>;

    /// Start `job` without waiting for it. Exactly one
    /// [`SnapshotCompletion`] for `job.id` must later reach the session if
    /// this returns `Ok`.
    fn start_snapshot(&mut self, job: SnapshotJob) -> Result<(), ToolError>;
}

// ---------------------------------------------------------------------------
// Command rendering
// ---------------------------------------------------------------------------

/// A program and its arguments, ready to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    /// `std::process::Command` with the project as working directory.
    pub fn to_command(&self, project_dir: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).current_dir(project_dir);
        command
    }
}

/// Tool commands from `.lockstep.yaml`, rendered for one project, plus the
/// synchronous halves of [`SyncTool`].
#[derive(Debug, Clone)]
pub struct ToolCommands {
    config: ToolConfig,
    project_dir: PathBuf,
}

impl ToolCommands {
    pub fn new(config: &ToolConfig, project_dir: &Path) -> Self {
        Self {
            config: config.clone(),
            project_dir: project_dir.to_path_buf(),
        }
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn snapshot(&self) -> Result<CommandLine, ToolError> {
        self.render(&self.config.snapshot, "snapshot")
    }

    pub fn restore_query(&self) -> Result<CommandLine, ToolError> {
        self.render(&self.config.restore_query, "restore query")
    }

    pub fn version(&self) -> Result<CommandLine, ToolError> {
        self.render(&self.config.version, "version check")
    }

    fn render(&self, template: &[String], purpose: &'static str) -> Result<CommandLine, ToolError> {
        let project = self.project_dir.to_string_lossy();
        let mut argv = template
            .iter()
            .map(|arg| arg.replace(PROJECT_PLACEHOLDER, &project));
        let Some(program) = argv.next() else {
            return Err(ToolError::EmptyCommand { purpose });
        };
        Ok(CommandLine {
            program,
            args: argv.collect(),
        })
    }

    /// Run the restore query and decode its JSON array output.
    pub fn query_restore_actions(&self) -> Result<Vec<RestoreAction>, ToolError> {
        let line = self.restore_query()?;
        let stdout = run_to_string(&line, &self.project_dir)?;
        parse_restore_actions(&line.program, &stdout)
    }

    /// Version string printed by the version command.
    pub fn installed_version(&self) -> Result<String, ToolError> {
        let line = self.version()?;
        Ok(run_to_string(&line, &self.project_dir)?.trim().to_string())
    }

    /// Installed and at least `min_version`. Failures read as unavailable.
    pub fn is_available(&self) -> bool {
        match self.installed_version() {
            Ok(version) => version_at_least(&version, &self.config.min_version),
            Err(err) => {
                tracing::debug!(error = %err, "package tool unavailable");
                false
            }
        }
    }
}

fn run_to_string(line: &CommandLine, project_dir: &Path) -> Result<String, ToolError> {
    let output = line
        .to_command(project_dir)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| ToolError::Launch {
            program: line.program.clone(),
            source,
        })?;
    if !output.status.success() {
        return Err(ToolError::Exit {
            program: line.program.clone(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Decode restore-query output. Blank output means no pending actions.
pub fn parse_restore_actions(program: &str, stdout: &str) -> Result<Vec<RestoreAction>, ToolError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(trimmed).map_err(|source| ToolError::Output {
        program: program.to_string(),
        source,
    })
}

/// Component-wise comparison of dotted numeric versions (`0.2.0.100`).
/// Missing components count as zero; non-numeric parts fail the check.
pub fn version_at_least(installed: &str, minimum: &str) -> bool {
    let (Some(installed), Some(minimum)) = (parse_version(installed), parse_version(minimum))
    else {
        return false;
    };
    let len = installed.len().max(minimum.len());
    let pad = |v: &[u64]| -> Vec<u64> {
        let mut v = v.to_vec();
        v.resize(len, 0);
        v
    };
    pad(&installed) >= pad(&minimum)
}

fn parse_version(version: &str) -> Option<Vec<u64>> {
    let version = version.trim();
    if version.is_empty() {
        return None;
    }
    version
        .split(['.', '-'])
        .map(|part| part.parse::<u64>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("0.2.0.100", "0.2.0.100", true)]
    #[case("0.4.8-1", "0.2.0.100", true)]
    #[case("0.2.0.99", "0.2.0.100", false)]
    #[case("0.2", "0.2.0", true)]
    #[case("1.0", "0.9.9", true)]
    #[case("", "0.1", false)]
    #[case("unknown", "0.1", false)]
    fn dotted_versions(#[case] installed: &str, #[case] minimum: &str, #[case] expected: bool) {
        assert_eq!(version_at_least(installed, minimum), expected);
    }

    #[test]
    fn placeholder_is_replaced_in_every_argument() {
        let config = ToolConfig {
            snapshot: vec!["tool".into(), "--dir={project}".into(), "{project}".into()],
            ..ToolConfig::default()
        };
        let commands = ToolCommands::new(&config, Path::new("/work/app"));
        let line = commands.snapshot().expect("render");
        assert_eq!(line.program, "tool");
        assert_eq!(line.args, vec!["--dir=/work/app", "/work/app"]);
    }

    #[test]
    fn empty_template_is_an_error() {
        let config = ToolConfig {
            restore_query: Vec::new(),
            ..ToolConfig::default()
        };
        let commands = ToolCommands::new(&config, Path::new("/work/app"));
        assert!(matches!(
            commands.query_restore_actions(),
            Err(ToolError::EmptyCommand { .. })
        ));
    }

    #[test]
    fn restore_output_parsing() {
        assert!(parse_restore_actions("r", "  \n").expect("blank").is_empty());
        assert!(parse_restore_actions("r", "[]").expect("empty").is_empty());

        let actions =
            parse_restore_actions("r", r#"[{"package":"digest","action":"add"}]"#).expect("parse");
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].package, "digest");

        assert!(matches!(
            parse_restore_actions("r", "Error in library(packrat)"),
            Err(ToolError::Output { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn shell_commands_drive_query_and_version() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = ToolConfig {
            restore_query: vec![
                "sh".into(),
                "-c".into(),
                r#"printf '[{"package":"Rcpp"}]'"#.into(),
            ],
            version: vec!["sh".into(), "-c".into(), "echo 0.5.0".into()],
            ..ToolConfig::default()
        };
        let commands = ToolCommands::new(&config, tmp.path());
        assert_eq!(commands.query_restore_actions().unwrap()[0].package, "Rcpp");
        assert_eq!(commands.installed_version().unwrap(), "0.5.0");
        assert!(commands.is_available());
    }

    #[cfg(unix)]
    #[test]
    fn failing_query_reports_exit_status() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = ToolConfig {
            restore_query: vec!["sh".into(), "-c".into(), "echo nope >&2; exit 3".into()],
            ..ToolConfig::default()
        };
        let commands = ToolCommands::new(&config, tmp.path());
        match commands.query_restore_actions() {
            Err(ToolError::Exit { code, stderr, .. }) => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "nope");
            }
            other => panic!("expected exit error, got {other:?}"),
        }
    }

    #[test]
    fn missing_program_is_unavailable() {
        let config = ToolConfig {
            version: vec!["lockstep-no-such-binary-for-tests".into()],
            ..ToolConfig::default()
        };
        let commands = ToolCommands::new(&config, Path::new("."));
        assert!(!commands.is_available());
    }
}
