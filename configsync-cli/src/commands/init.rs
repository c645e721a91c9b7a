//! `configsync init [--force]`

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Args;

use configsync_core::{settings, Settings};

/// Write a settings file populated with defaults.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing settings file.
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    pub fn run(self, explicit: Option<&Path>) -> Result<()> {
        let home = super::home()?;
        let path = explicit
            .map(Path::to_path_buf)
            .unwrap_or_else(|| settings::settings_path_at(&home));

        if path.exists() && !self.force {
            bail!(
                "{} already exists; pass --force to overwrite",
                path.display()
            );
        }

        settings::save_at(&path, &Settings::defaults_at(&home))
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("✓ Wrote settings to {}", path.display());
        Ok(())
    }
}
