use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use configsync_store::StoreError;
use configsync_sync::SyncError;

/// Error surface for the daemon runtime and admin protocol.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("cluster view error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("broadcast failed: {0}")]
    Broadcast(#[from] BroadcastError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("daemon is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },
}

/// Reading the cluster view file.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("failed to read cluster view {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse cluster view {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Delivering one request to one peer node.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O with {addr} failed: {source}")]
    Io {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{addr} did not answer within {after:?}")]
    Timeout { addr: String, after: Duration },

    #[error("{addr} closed the connection before responding")]
    Closed { addr: String },

    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
}

/// A failed cluster-wide command. Always names the node that broke the chain.
#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("node {node} is unreachable: {source}")]
    NodeUnreachable {
        node: String,
        #[source]
        source: TransportError,
    },

    #[error("node {node} did not acknowledge: {reason}")]
    NodeAckFailed { node: String, reason: String },

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

impl BroadcastError {
    /// The node the broadcast stopped at, if any.
    pub fn node(&self) -> Option<&str> {
        match self {
            BroadcastError::NodeUnreachable { node, .. }
            | BroadcastError::NodeAckFailed { node, .. } => Some(node),
            BroadcastError::Cluster(_) => None,
        }
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
