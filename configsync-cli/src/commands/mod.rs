pub mod admin;
pub mod daemon;
pub mod file;
pub mod init;

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use serde_json::Value;

use configsync_core::{settings, Settings};

/// Home directory plus the settings every command runs with.
pub struct Context {
    pub home: PathBuf,
    pub settings: Settings,
}

impl Context {
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let home = home()?;
        let settings = settings::load_at(&home, explicit).context("failed to load settings")?;
        Ok(Self { home, settings })
    }

    /// A single-threaded runtime for store round trips.
    pub fn runtime(&self) -> Result<tokio::runtime::Runtime> {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to start async runtime")
    }
}

pub fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

pub fn print_json(value: &Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to render JSON")?
    );
    Ok(())
}
