//! lockstep: keeps a project's lockfile and package library in sync.
//!
//! # Usage
//!
//! ```text
//! lockstep init [PATH] [--adopt] [--force]
//! lockstep status [--project PATH] [--json]
//! lockstep check [--project PATH] [--json]
//! lockstep daemon start|stop|status|library-mutated|adopt|watch [--project PATH]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{check::CheckArgs, daemon::DaemonArgs, init::InitArgs, status::StatusArgs};

#[derive(Parser, Debug)]
#[command(
    name = "lockstep",
    version,
    about = "Keep a project's dependency lockfile and installed library in sync",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default .lockstep.yaml for a project.
    Init(InitArgs),

    /// Show stored vs. current hashes and snapshot state.
    Status(StatusArgs),

    /// Reconcile the lockfile and library once.
    Check(CheckArgs),

    /// Run or talk to the per-project background daemon.
    Daemon(DaemonArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Check(args) => args.run(),
        Commands::Daemon(args) => args.run(),
    }
}
