//! Sequential broadcast over mock membership and transport.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use configsync_core::Interval;
use configsync_daemon::{
    BroadcastError, Broadcaster, ClusterError, ClusterView, NodeCommand, NodeInfo, NodeRequest,
    NodeResponse, NodeTransport, TransportError,
};

struct StaticCluster(Vec<NodeInfo>);

#[async_trait]
impl ClusterView for StaticCluster {
    async fn nodes(&self) -> Result<Vec<NodeInfo>, ClusterError> {
        Ok(self.0.clone())
    }

    async fn flush_interval(&self) -> Result<Option<Interval>, ClusterError> {
        Ok(None)
    }
}

/// Records every contacted node; nodes in `refuse` answer with a negative
/// ack, nodes in `down` cannot be reached.
#[derive(Default)]
struct RecordingTransport {
    contacted: Mutex<Vec<String>>,
    requests: Mutex<Vec<NodeRequest>>,
    refuse: HashSet<String>,
    down: HashSet<String>,
}

impl RecordingTransport {
    fn contacted(&self) -> Vec<String> {
        self.contacted.lock().unwrap().clone()
    }
}

#[async_trait]
impl NodeTransport for RecordingTransport {
    async fn send(
        &self,
        node: &NodeInfo,
        request: &NodeRequest,
    ) -> Result<NodeResponse, TransportError> {
        self.contacted.lock().unwrap().push(node.name.clone());
        self.requests.lock().unwrap().push(request.clone());
        if self.down.contains(&node.name) {
            return Err(TransportError::Closed {
                addr: node.addr.clone(),
            });
        }
        if self.refuse.contains(&node.name) {
            return Ok(NodeResponse::rejected(&node.name, None, "pass failed"));
        }
        Ok(NodeResponse {
            acknowledged: true,
            node: node.name.clone(),
            outcome: None,
            error: None,
        })
    }
}

fn nodes(n: usize) -> Vec<NodeInfo> {
    (1..=n)
        .map(|i| NodeInfo {
            name: format!("node-{i}"),
            addr: format!("10.0.0.{i}:9410"),
            data: true,
        })
        .collect()
}

fn broadcaster(cluster: Vec<NodeInfo>, transport: Arc<RecordingTransport>) -> Broadcaster {
    Broadcaster::new(Arc::new(StaticCluster(cluster)), transport, None)
}

#[tokio::test]
async fn all_nodes_acknowledge_in_order() {
    let transport = Arc::new(RecordingTransport::default());
    let ack = broadcaster(nodes(3), transport.clone())
        .broadcast(NodeCommand::Flush)
        .await
        .expect("broadcast");

    assert_eq!(transport.contacted(), vec!["node-1", "node-2", "node-3"]);
    assert_eq!(ack.command, NodeCommand::Flush);
    assert_eq!(ack.nodes.len(), 3);
}

#[tokio::test]
async fn failure_on_node_two_stops_before_node_three() {
    let transport = Arc::new(RecordingTransport {
        refuse: HashSet::from(["node-2".to_string()]),
        ..Default::default()
    });
    let err = broadcaster(nodes(3), transport.clone())
        .broadcast(NodeCommand::Flush)
        .await
        .unwrap_err();

    assert_eq!(transport.contacted(), vec!["node-1", "node-2"], "node-3 must not be contacted");
    assert_eq!(err.node(), Some("node-2"));
    match err {
        BroadcastError::NodeAckFailed { node, reason } => {
            assert_eq!(node, "node-2");
            assert_eq!(reason, "pass failed");
        }
        other => panic!("expected NodeAckFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_node_is_named() {
    let transport = Arc::new(RecordingTransport {
        down: HashSet::from(["node-1".to_string()]),
        ..Default::default()
    });
    let err = broadcaster(nodes(2), transport.clone())
        .broadcast(NodeCommand::Reset)
        .await
        .unwrap_err();

    assert!(matches!(err, BroadcastError::NodeUnreachable { ref node, .. } if node == "node-1"));
    assert!(err.to_string().contains("node-1"));
    assert_eq!(transport.contacted(), vec!["node-1"]);
}

#[tokio::test]
async fn empty_membership_trivially_succeeds() {
    let transport = Arc::new(RecordingTransport::default());
    let ack = broadcaster(Vec::new(), transport.clone())
        .broadcast(NodeCommand::Reset)
        .await
        .expect("broadcast");
    assert!(ack.nodes.is_empty());
    assert!(transport.contacted().is_empty());
}

#[tokio::test]
async fn credential_is_attached_to_every_request() {
    let transport = Arc::new(RecordingTransport::default());
    let broadcaster = Broadcaster::new(
        Arc::new(StaticCluster(nodes(2))),
        transport.clone(),
        Some("Basic YWRtaW4=".to_string()),
    );
    broadcaster.broadcast(NodeCommand::Flush).await.expect("broadcast");

    let requests = transport.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 2);
    assert!(requests
        .iter()
        .all(|r| r.authorization.as_deref() == Some("Basic YWRtaW4=")));
}
