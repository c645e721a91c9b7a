use std::path::{Path, PathBuf};

use configsync_core::settings::configsync_root;

pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn run_dir(home: &Path) -> PathBuf {
    configsync_root(home).join("run")
}

/// `<home>/.configsync/run/daemon.sock`, the admin socket of the local node.
pub fn socket_path(home: &Path) -> PathBuf {
    run_dir(home).join(DAEMON_SOCKET)
}
