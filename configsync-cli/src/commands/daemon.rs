//! `configsync daemon`: run the local node or control a running one.

use anyhow::{Context as _, Result};
use clap::Subcommand;

use configsync_daemon::paths::socket_path;
use configsync_daemon::{request, request_status, start_blocking, DaemonError, DaemonRequest};

use super::{print_json, Context};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the node in the foreground (node RPC, scheduler, admin socket).
    Start,
    /// Request graceful shutdown over the admin socket.
    Stop,
    /// Query node status over the admin socket.
    Status,
}

pub fn run(ctx: Context, command: DaemonCommand) -> Result<()> {
    match command {
        DaemonCommand::Start => {
            start_blocking(&ctx.home, ctx.settings).context("daemon exited with error")?;
        }
        DaemonCommand::Stop => match request(&ctx.home, &DaemonRequest::Stop) {
            Ok(_) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => println!("daemon is not running"),
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status => match request_status(&ctx.home) {
            Ok(status) => print_json(&status)?,
            Err(DaemonError::DaemonNotRunning { .. }) => print_json(&serde_json::json!({
                "running": false,
                "socket": socket_path(&ctx.home).display().to_string(),
            }))?,
            Err(err) => return Err(err).context("failed to query daemon status"),
        },
    }
    Ok(())
}
