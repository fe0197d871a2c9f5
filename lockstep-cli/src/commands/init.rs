//! `lockstep init [PATH] [--adopt] [--force]`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use lockstep_core::{config, ProjectConfig, ProjectLayout};

use super::{adopt_local, display_hash};

/// Write a default `.lockstep.yaml` for a project.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Project directory.
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Record the current lockfile and library as the in-sync baseline.
    #[arg(long)]
    pub adopt: bool,

    /// Overwrite an existing .lockstep.yaml with the defaults.
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let path = self
            .path
            .canonicalize()
            .with_context(|| format!("cannot resolve path '{}'", self.path.display()))?;

        let config_path = config::config_path(&path);
        let config = if config_path.exists() && !self.force {
            println!(
                "{} already exists; keeping it (use --force to overwrite)",
                config_path.display()
            );
            config::load_at(&path)
                .with_context(|| format!("failed to load '{}'", config_path.display()))?
        } else {
            let config = ProjectConfig::default();
            let written = config::save_at(&path, &config)
                .with_context(|| format!("failed to write '{}'", config_path.display()))?;
            println!("✓ Wrote {}", written.display());
            config
        };

        if self.adopt {
            let layout = ProjectLayout::resolve(&path, &config)
                .with_context(|| format!("failed to resolve project '{}'", path.display()))?;
            let (lockfile, library) = adopt_local(&layout);
            println!("✓ Recorded current state as baseline");
            println!("  lockfile: {}", display_hash(&lockfile));
            println!("  library:  {}", display_hash(&library));
        }
        Ok(())
    }
}
