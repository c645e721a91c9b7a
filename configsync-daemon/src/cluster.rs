//! Cluster membership and dynamic settings.
//!
//! The view is re-read on every call and never cached: a broadcast always
//! works from the membership that is current when it starts.
//!
//! ```yaml
//! nodes:
//!   - { name: node-1, addr: 10.0.0.1:9410, data: true }
//! settings:
//!   flush_interval: 30s
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use configsync_core::{Interval, Settings};

use crate::error::ClusterError;

/// One cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    /// `host:port` of the node RPC listener.
    pub addr: String,
    /// Data-bearing nodes materialize files and receive broadcasts.
    #[serde(default = "default_data")]
    pub data: bool,
}

fn default_data() -> bool {
    true
}

impl NodeInfo {
    pub fn local(settings: &Settings) -> Self {
        Self {
            name: settings.node.name.clone(),
            addr: settings.node.listen_addr.clone(),
            data: settings.node.data,
        }
    }
}

/// Cluster-wide settings that may change while nodes run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicSettings {
    pub flush_interval: Option<Interval>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ClusterDocument {
    nodes: Vec<NodeInfo>,
    settings: DynamicSettings,
}

#[async_trait]
pub trait ClusterView: Send + Sync {
    /// Live data-bearing nodes, in a stable order.
    async fn nodes(&self) -> Result<Vec<NodeInfo>, ClusterError>;

    /// Dynamic override of the reconciliation interval, if any.
    async fn flush_interval(&self) -> Result<Option<Interval>, ClusterError>;
}

/// [`ClusterView`] backed by `cluster.yaml`.
#[derive(Debug, Clone)]
pub struct ClusterFile {
    path: PathBuf,
    local: NodeInfo,
}

impl ClusterFile {
    pub fn new(path: impl Into<PathBuf>, local: NodeInfo) -> Self {
        Self {
            path: path.into(),
            local,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.cluster.config_path.clone(),
            NodeInfo::local(settings),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Option<ClusterDocument>, ClusterError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ClusterError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if text.trim().is_empty() {
            return Ok(Some(ClusterDocument::default()));
        }
        serde_yaml::from_str(&text)
            .map(Some)
            .map_err(|source| ClusterError::Parse {
                path: self.path.clone(),
                source,
            })
    }
}

#[async_trait]
impl ClusterView for ClusterFile {
    async fn nodes(&self) -> Result<Vec<NodeInfo>, ClusterError> {
        let nodes = match self.load().await? {
            Some(doc) => doc.nodes,
            None => {
                tracing::debug!(path = %self.path.display(), "no cluster view; using local node");
                vec![self.local.clone()]
            }
        };
        Ok(nodes.into_iter().filter(|node| node.data).collect())
    }

    async fn flush_interval(&self) -> Result<Option<Interval>, ClusterError> {
        Ok(self
            .load()
            .await?
            .and_then(|doc| doc.settings.flush_interval))
    }
}
