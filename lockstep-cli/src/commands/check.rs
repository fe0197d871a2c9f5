//! `lockstep check`: one reconciliation pass over both artifacts.
//!
//! With a daemon running the pass happens inside it (its subscribers get the
//! notifications); otherwise it runs in this process and waits for any
//! snapshot it starts.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use lockstep_core::{ArtifactKind, Notification};
use lockstep_daemon::{check_blocking, init_tracing};
use lockstep_sync::{DriftOutcome, SessionStatus};

use super::{query_daemon, ProjectArg};

#[derive(Args, Debug)]
pub struct CheckArgs {
    #[command(flatten)]
    pub project: ProjectArg,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct CheckJson {
    daemon_running: bool,
    outcomes: Vec<DriftOutcome>,
    notifications: Vec<Notification>,
    status: SessionStatus,
}

impl CheckArgs {
    pub fn run(self) -> Result<()> {
        let dir = self.project.resolve()?;

        let report = match query_daemon(&dir, "check")? {
            Some(reply) => CheckJson {
                daemon_running: true,
                outcomes: reply.outcomes,
                notifications: Vec::new(),
                status: reply.status,
            },
            None => {
                init_tracing();
                let report = check_blocking(&dir)
                    .with_context(|| format!("check failed for '{}'", dir.display()))?;
                CheckJson {
                    daemon_running: false,
                    outcomes: report.outcomes,
                    notifications: report.notifications,
                    status: report.status,
                }
            }
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize check JSON")?
            );
            return Ok(());
        }

        print_report(&report);
        Ok(())
    }
}

fn print_report(report: &CheckJson) {
    if !report.status.context.applicable {
        println!(
            "{} package tool unavailable; nothing reconciled",
            "!".yellow().bold()
        );
        return;
    }

    let drifted: Vec<&DriftOutcome> = report
        .outcomes
        .iter()
        .filter(|o| !matches!(o, DriftOutcome::Unchanged))
        .collect();
    if drifted.is_empty() {
        println!("{} lockfile and library are in sync", "✓".green());
    }
    for outcome in drifted {
        println!("{}", describe(outcome, report.status.auto_snapshot));
    }

    for notification in &report.notifications {
        match notification {
            Notification::InstalledPackagesChanged => {
                println!("{} snapshot finished; lockfile updated", "✓".green());
            }
            Notification::RestoreNeeded { actions } => {
                println!(
                    "{} lockfile needs {} restore action(s):",
                    "!".yellow().bold(),
                    actions.len()
                );
                for action in actions {
                    let versions = match (&action.library_version, &action.lockfile_version) {
                        (Some(lib), Some(lock)) => format!(" ({lib} -> {lock})"),
                        (None, Some(lock)) => format!(" (-> {lock})"),
                        (Some(lib), None) => format!(" ({lib} ->)"),
                        (None, None) => String::new(),
                    };
                    println!(
                        "  {} {}{}",
                        action.action.as_deref().unwrap_or("restore"),
                        action.package,
                        versions
                    );
                }
            }
        }
    }

    if report.daemon_running && report.status.snapshot.active_id.is_some() {
        println!("snapshot running in the daemon; see 'lockstep daemon watch'");
    }
}

fn describe(outcome: &DriftOutcome, auto_snapshot: bool) -> String {
    match outcome {
        DriftOutcome::Unchanged => "unchanged".to_string(),
        DriftOutcome::PrimaryDrifted {
            kind: ArtifactKind::Lockfile,
            ..
        } => "lockfile changed; checked for pending restore actions".to_string(),
        DriftOutcome::PrimaryDrifted {
            kind: ArtifactKind::Library,
            ..
        } if auto_snapshot => "library changed; snapshot requested".to_string(),
        DriftOutcome::PrimaryDrifted {
            kind: ArtifactKind::Library,
            ..
        } => "library changed; auto-snapshot is off, lockfile left as is".to_string(),
        DriftOutcome::BothDrifted { .. } => {
            "lockfile and library both changed; adopted current state".to_string()
        }
    }
}
