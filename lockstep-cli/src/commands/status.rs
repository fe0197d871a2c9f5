//! `lockstep status`: stored vs. current hashes and snapshot state.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use lockstep_daemon::local_status;
use lockstep_sync::{HashStatus, SessionStatus};

use super::{display_hash, query_daemon, ProjectArg};

/// Arguments for `lockstep status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub project: ProjectArg,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let dir = self.project.resolve()?;

        let (status, daemon_running) = match query_daemon(&dir, "status")? {
            Some(reply) => (reply.status, true),
            None => (
                local_status(&dir)
                    .with_context(|| format!("failed to read status of '{}'", dir.display()))?,
                false,
            ),
        };

        if self.json {
            let payload = StatusJson {
                daemon_running,
                status: &status,
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
            );
            return Ok(());
        }

        print_table(&status, daemon_running);
        Ok(())
    }
}

#[derive(Serialize)]
struct StatusJson<'a> {
    daemon_running: bool,
    #[serde(flatten)]
    status: &'a SessionStatus,
}

#[derive(Tabled)]
struct HashRow {
    #[tabled(rename = "artifact")]
    artifact: String,
    #[tabled(rename = "stored")]
    stored: String,
    #[tabled(rename = "current")]
    current: String,
    #[tabled(rename = "state")]
    state: String,
}

fn print_table(status: &SessionStatus, daemon_running: bool) {
    println!(
        "lockstep v{} | {} | daemon {} | tool {} | auto-snapshot {}",
        env!("CARGO_PKG_VERSION"),
        status.project_dir,
        if daemon_running {
            "running".green().to_string()
        } else {
            "stopped".bright_black().to_string()
        },
        if status.context.available {
            "available".green().to_string()
        } else {
            "unavailable".yellow().to_string()
        },
        if status.auto_snapshot { "on" } else { "off" },
    );

    if !status.context.tracked {
        println!("No lockfile or library found; nothing is tracked yet.");
    }

    let rows: Vec<HashRow> = status.hashes.iter().map(hash_row).collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    let snapshot = &status.snapshot;
    match (&snapshot.active_id, &snapshot.active_target) {
        (Some(id), Some(target)) => {
            println!("snapshot #{id} running toward {target}");
            if snapshot.pending > 0 {
                println!("  {} request(s) queued behind it", snapshot.pending);
            }
        }
        _ => println!("snapshot: idle"),
    }

    if !daemon_running && status.hashes.iter().any(|h| h.drifted) {
        println!("Run 'lockstep check' to reconcile.");
    }
}

fn hash_row(hash: &HashStatus) -> HashRow {
    HashRow {
        artifact: hash.artifact.to_string(),
        stored: display_hash(&hash.stored),
        current: display_hash(&hash.computed),
        state: if hash.drifted {
            "DRIFTED".red().bold().to_string()
        } else {
            "IN SYNC".green().bold().to_string()
        },
    }
}
