//! Cluster-wide commands.
//!
//! Nodes are visited one at a time in view order. The first node that cannot
//! be reached or does not acknowledge ends the broadcast; the nodes after it
//! are never contacted and nothing is retried.

use std::sync::Arc;

use serde::Serialize;

use crate::cluster::ClusterView;
use crate::error::BroadcastError;
use crate::protocol::{NodeCommand, NodeRequest, NodeResponse};
use crate::transport::NodeTransport;

/// Every visited node acknowledged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BroadcastAck {
    pub command: NodeCommand,
    pub nodes: Vec<NodeResponse>,
}

#[derive(Clone)]
pub struct Broadcaster {
    cluster: Arc<dyn ClusterView>,
    transport: Arc<dyn NodeTransport>,
    authorization: Option<String>,
}

impl Broadcaster {
    pub fn new(
        cluster: Arc<dyn ClusterView>,
        transport: Arc<dyn NodeTransport>,
        authorization: Option<String>,
    ) -> Self {
        Self {
            cluster,
            transport,
            authorization,
        }
    }

    pub async fn broadcast(&self, command: NodeCommand) -> Result<BroadcastAck, BroadcastError> {
        let nodes = self.cluster.nodes().await?;
        let request = NodeRequest {
            cmd: command,
            authorization: self.authorization.clone(),
        };
        tracing::debug!(%command, nodes = nodes.len(), "broadcasting");

        let mut acks = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let response = match self.transport.send(node, &request).await {
                Ok(response) => response,
                Err(source) => {
                    tracing::warn!(%command, node = %node.name, error = %source, "node unreachable");
                    return Err(BroadcastError::NodeUnreachable {
                        node: node.name.clone(),
                        source,
                    });
                }
            };
            if !response.acknowledged {
                let reason = response
                    .error
                    .unwrap_or_else(|| "not acknowledged".to_string());
                tracing::warn!(%command, node = %node.name, %reason, "node refused command");
                return Err(BroadcastError::NodeAckFailed {
                    node: node.name.clone(),
                    reason,
                });
            }
            tracing::debug!(%command, node = %node.name, "node acknowledged");
            acks.push(response);
        }

        tracing::info!(%command, nodes = acks.len(), "broadcast acknowledged");
        Ok(BroadcastAck {
            command,
            nodes: acks,
        })
    }
}
