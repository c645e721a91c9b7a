//! Two nodes talking over real TCP, sharing one in-memory store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use configsync_core::{EntryPath, Interval, Settings};
use configsync_daemon::{
    serve_node, ArmOutcome, BroadcastError, ClusterError, ClusterView, NodeInfo, NodeOutcome,
    SyncNode, TcpTransport,
};
use configsync_store::{EntryStore, MemoryBackend};

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

struct Cluster {
    tmp: TempDir,
    backend: Arc<MemoryBackend>,
    store: EntryStore,
    nodes: Vec<Arc<SyncNode>>,
    shutdown: broadcast::Sender<()>,
}

impl Cluster {
    fn root(&self, name: &str) -> std::path::PathBuf {
        self.tmp.path().join(name).join("config")
    }

    async fn stop(self) {
        let _ = self.shutdown.send(());
        for node in &self.nodes {
            node.shutdown().await;
        }
    }
}

/// Start `names.len()` nodes. Each node's own credential comes from
/// `users`; an empty string means none.
async fn cluster(names: &[&str], users: &[&str]) -> Cluster {
    let tmp = TempDir::new().expect("tmp");
    let backend = Arc::new(MemoryBackend::new());

    let mut listeners = Vec::new();
    let mut infos = Vec::new();
    for name in names {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        infos.push(NodeInfo {
            name: name.to_string(),
            addr: listener.local_addr().expect("addr").to_string(),
            data: true,
        });
        listeners.push(listener);
    }

    let view: Arc<dyn ClusterView> = Arc::new(StaticCluster(infos));
    let (shutdown, _) = broadcast::channel(4);
    let mut nodes = Vec::new();
    let mut store = None;
    for ((name, user), listener) in names.iter().zip(users).zip(listeners) {
        let mut settings = Settings::defaults_at(&tmp.path().join(name));
        settings.node.name = name.to_string();
        settings.sync.config_path = tmp.path().join(name).join("config");
        settings.store.security_user = user.to_string();

        let node_store = EntryStore::new(backend.clone(), &settings).expect("store");
        store.get_or_insert_with(|| node_store.clone());
        let node = Arc::new(SyncNode::new(
            &settings,
            node_store,
            Arc::clone(&view),
            Arc::new(TcpTransport::new(Duration::from_secs(5))),
        ));
        tokio::spawn(serve_node(listener, Arc::clone(&node), shutdown.subscribe()));
        nodes.push(node);
    }

    Cluster {
        tmp,
        backend,
        store: store.expect("at least one node"),
        nodes,
        shutdown,
    }
}

#[tokio::test]
async fn flush_broadcast_materializes_on_every_node() {
    let cluster = cluster(&["node-1", "node-2"], &["", ""]).await;
    let path = EntryPath::parse("app/config.yml").expect("path");
    cluster.store.put(&path, b"a: 1".to_vec()).await.expect("put");

    let ack = cluster.nodes[0].flush_cluster().await.expect("flush");
    let acked: Vec<_> = ack.nodes.iter().map(|r| r.node.as_str()).collect();
    assert_eq!(acked, vec!["node-1", "node-2"]);
    for response in &ack.nodes {
        match &response.outcome {
            Some(NodeOutcome::Completed { report }) => assert_eq!(report.written, 1),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    for name in ["node-1", "node-2"] {
        let file = cluster.root(name).join("app").join("config.yml");
        assert_eq!(std::fs::read(&file).expect("materialized"), b"a: 1", "{name}");
    }
    cluster.stop().await;
}

#[tokio::test]
async fn reset_broadcast_rearms_every_scheduler() {
    let cluster = cluster(&["node-1", "node-2"], &["", ""]).await;

    let ack = cluster.nodes[1].reset_cluster().await.expect("reset");
    assert_eq!(ack.nodes.len(), 2);
    for response in &ack.nodes {
        assert_eq!(
            response.outcome,
            Some(NodeOutcome::Rearmed {
                arm: ArmOutcome::Armed(Interval::from_mins(1))
            })
        );
    }
    for node in &cluster.nodes {
        assert!(node.scheduler().stats().armed.map(|a| a.is_armed()).unwrap_or(false));
    }
    cluster.stop().await;
}

#[tokio::test]
async fn wrong_credential_is_refused_by_the_peer() {
    let cluster = cluster(&["node-1", "node-2"], &["admin", "other"]).await;

    let err = cluster.nodes[0].flush_cluster().await.unwrap_err();
    match err {
        BroadcastError::NodeAckFailed { node, reason } => {
            assert_eq!(node, "node-2");
            assert_eq!(reason, "unauthorized");
        }
        other => panic!("expected NodeAckFailed, got {other:?}"),
    }
    cluster.stop().await;
}

#[tokio::test]
async fn flush_with_store_down_is_not_acknowledged() {
    let cluster = cluster(&["node-1"], &[""]).await;
    cluster.store.ensure_collection().await.expect("ensure");
    cluster.backend.set_available(false);

    let response = cluster.nodes[0].flush_local().await;
    assert!(!response.acknowledged);
    assert!(matches!(response.outcome, Some(NodeOutcome::Failed { .. })));

    let err = cluster.nodes[0].flush_cluster().await.unwrap_err();
    assert_eq!(err.node(), Some("node-1"));
    cluster.stop().await;
}
