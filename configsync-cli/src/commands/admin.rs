//! `configsync flush | reset | wait`, forwarded to the local daemon.

use anyhow::{anyhow, bail, Context as _, Result};
use clap::Args;
use colored::Colorize;

use configsync_core::{HealthStatus, Interval};
use configsync_daemon::{request, DaemonError, DaemonRequest};

use super::{print_json, Context};

pub fn flush(ctx: &Context) -> Result<()> {
    let data = forward(ctx, &DaemonRequest::Flush, "flush")?;
    print_json(&data)
}

pub fn reset(ctx: &Context) -> Result<()> {
    let data = forward(ctx, &DaemonRequest::Reset, "reset")?;
    print_json(&data)
}

/// Block until the entry collection reaches `--status`.
#[derive(Args, Debug)]
pub struct WaitArgs {
    /// green, yellow or red.
    #[arg(long, default_value = "yellow")]
    pub status: HealthStatus,

    /// Give up after this long (e.g. `500ms`, `30s`, `2m`).
    #[arg(long, default_value = "30s")]
    pub timeout: Interval,
}

impl WaitArgs {
    pub fn run(self, ctx: &Context) -> Result<()> {
        let timeout_ms = u64::try_from(self.timeout.millis()).unwrap_or(0);
        let data = forward(
            ctx,
            &DaemonRequest::Wait {
                status: self.status,
                timeout_ms,
            },
            "wait",
        )?;
        print_json(&data)?;

        if data["timed_out"].as_bool().unwrap_or(false) {
            bail!(
                "timed out after {} waiting for {}",
                self.timeout,
                self.status.to_string().bold()
            );
        }
        Ok(())
    }
}

fn forward(
    ctx: &Context,
    req: &DaemonRequest,
    what: &str,
) -> Result<serde_json::Value> {
    match request(&ctx.home, req) {
        Ok(data) => Ok(data),
        Err(DaemonError::DaemonNotRunning { socket }) => Err(anyhow!(
            "daemon is not running (no socket at {}); start it with `configsync daemon start`",
            socket.display()
        )),
        Err(err) => Err(err).with_context(|| format!("{what} failed")),
    }
}
