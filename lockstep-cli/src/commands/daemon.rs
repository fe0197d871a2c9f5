//! `lockstep daemon`: per-project background watcher.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use lockstep_core::{ArtifactKind, ProjectLayout};
use lockstep_daemon::paths::socket_path;
use lockstep_daemon::{request_status, request_stop, start_blocking, subscribe, DaemonError};

use super::{adopt_local, display_hash, query_daemon, ProjectArg};

#[derive(Args, Debug)]
pub struct DaemonArgs {
    #[command(flatten)]
    pub project: ProjectArg,

    #[command(subcommand)]
    pub command: DaemonCommand,
}

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground (watcher + socket server).
    Start,
    /// Request graceful daemon shutdown over the project socket.
    Stop,
    /// Query daemon runtime status over the project socket.
    Status,
    /// Tell the daemon the library was modified outside its watcher.
    LibraryMutated,
    /// Record the current lockfile and library as the baseline.
    Adopt,
    /// Print notifications as JSON lines until the daemon stops.
    Watch,
}

impl DaemonArgs {
    pub fn run(self) -> Result<()> {
        let dir = self.project.resolve()?;

        match self.command {
            DaemonCommand::Start => {
                start_blocking(&dir).context("daemon exited with error")?;
            }
            DaemonCommand::Stop => match request_stop(&dir) {
                Ok(()) => println!("daemon stop requested"),
                Err(DaemonError::DaemonNotRunning { .. }) => {
                    println!("daemon is not running");
                }
                Err(err) => return Err(err).context("failed to stop daemon"),
            },
            DaemonCommand::Status => {
                let payload = match request_status(&dir) {
                    Ok(status) => serde_json::json!({
                        "running": true,
                        "socket": socket_path(&dir).display().to_string(),
                        "status": status["status"],
                    }),
                    Err(DaemonError::DaemonNotRunning { .. }) => serde_json::json!({
                        "running": false,
                        "socket": socket_path(&dir).display().to_string(),
                    }),
                    Err(err) => return Err(err).context("failed to query daemon status"),
                };
                println!(
                    "{}",
                    serde_json::to_string_pretty(&payload)
                        .context("failed to render daemon status JSON")?
                );
            }
            DaemonCommand::LibraryMutated => match query_daemon(&dir, "library-mutated")? {
                Some(reply) => {
                    let drifted = reply.status.hashes.iter().any(|h| h.drifted);
                    println!(
                        "library change reported{}",
                        if drifted { "; reconciling" } else { "" }
                    );
                }
                None => println!("daemon is not running; run 'lockstep check' instead"),
            },
            DaemonCommand::Adopt => {
                let (lockfile, library) = match query_daemon(&dir, "adopt")? {
                    Some(reply) => {
                        let stored = |artifact: ArtifactKind| {
                            reply
                                .status
                                .hashes
                                .iter()
                                .find(|h| h.artifact == artifact)
                                .map(|h| h.stored.clone())
                                .unwrap_or_default()
                        };
                        (stored(ArtifactKind::Lockfile), stored(ArtifactKind::Library))
                    }
                    None => {
                        let (_, layout) = ProjectLayout::load(&dir)
                            .with_context(|| format!("failed to load project '{}'", dir.display()))?;
                        adopt_local(&layout)
                    }
                };
                println!("✓ Recorded current state as baseline");
                println!("  lockfile: {}", display_hash(&lockfile));
                println!("  library:  {}", display_hash(&library));
            }
            DaemonCommand::Watch => {
                subscribe(&dir, |notification| {
                    match serde_json::to_string(&notification) {
                        Ok(line) => println!("{line}"),
                        Err(err) => eprintln!("failed to render notification: {err}"),
                    }
                    true
                })
                .context("failed to subscribe to daemon notifications")?;
            }
        }

        Ok(())
    }
}
