//! configsync: replicate configuration files through a shared entry store.
//!
//! # Usage
//!
//! ```text
//! configsync [--config <path>] init [--force]
//! configsync file put <path> [--content <text> | --from-file <file> | --base64 <b64>]
//! configsync file get <path> [--json]
//! configsync file list [--from N] [--size N] [--fields a,b] [--sort field:order] [--table]
//! configsync file delete <path>
//! configsync flush | reset
//! configsync wait --status green|yellow|red [--timeout 30s]
//! configsync daemon start|stop|status
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    admin::WaitArgs, daemon::DaemonCommand, file::FileCommand, init::InitArgs, Context,
};

#[derive(Parser, Debug)]
#[command(
    name = "configsync",
    version,
    about = "Replicate configuration files across cluster nodes",
    long_about = None,
)]
struct Cli {
    /// Settings file (default: ~/.configsync/configsync.yaml).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default settings file.
    Init(InitArgs),

    /// Store, read, list and delete entries.
    File {
        #[command(subcommand)]
        command: FileCommand,
    },

    /// Run one reconciliation pass on every data node, one node at a time.
    Flush,

    /// Re-arm the scheduler on every data node.
    Reset,

    /// Block until the entry collection reaches a health status.
    Wait(WaitArgs),

    /// Run or control the local node daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.config.as_deref();
    match cli.command {
        Commands::Init(args) => args.run(config),
        Commands::File { command } => commands::file::run(&Context::load(config)?, command),
        Commands::Flush => commands::admin::flush(&Context::load(config)?),
        Commands::Reset => commands::admin::reset(&Context::load(config)?),
        Commands::Wait(args) => args.run(&Context::load(config)?),
        Commands::Daemon { command } => commands::daemon::run(Context::load(config)?, command),
    }
}
