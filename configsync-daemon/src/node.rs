//! The per-node service behind both protocols.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use configsync_core::{HealthStatus, Interval, Settings};
use configsync_store::{EntryStore, HealthReport, StoreError};
use configsync_sync::{Reconciler, TerminationFlag};

use crate::broadcast::{BroadcastAck, Broadcaster};
use crate::cluster::ClusterView;
use crate::error::BroadcastError;
use crate::protocol::{NodeCommand, NodeOutcome, NodeRequest, NodeResponse};
use crate::readiness::{GateState, ReadinessGate};
use crate::scheduler::{ArmOutcome, Scheduler, SchedulerStats};
use crate::transport::NodeTransport;

pub struct SyncNode {
    name: String,
    authorization: Option<String>,
    updater_enabled: bool,
    store: EntryStore,
    reconciler: Arc<Reconciler>,
    scheduler: Arc<Scheduler>,
    gate: ReadinessGate,
    broadcaster: Broadcaster,
}

impl SyncNode {
    pub fn new(
        settings: &Settings,
        store: EntryStore,
        cluster: Arc<dyn ClusterView>,
        transport: Arc<dyn NodeTransport>,
    ) -> Self {
        let reconciler = Arc::new(Reconciler::new(store.clone(), settings));
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&reconciler),
            Arc::clone(&cluster),
            settings.sync.flush_interval,
        ));
        let gate = ReadinessGate::new(store.clone(), Arc::clone(&scheduler), settings);
        let authorization = settings.authorization_token();
        Self {
            name: settings.node.name.clone(),
            broadcaster: Broadcaster::new(cluster, transport, authorization.clone()),
            authorization,
            updater_enabled: settings.sync.file_updater_enabled,
            store,
            reconciler,
            scheduler,
            gate,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &EntryStore {
        &self.store
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn gate(&self) -> &ReadinessGate {
        &self.gate
    }

    /// Run the readiness gate when the file updater is enabled.
    pub async fn start(&self) -> Option<ArmOutcome> {
        if !self.updater_enabled {
            tracing::info!("file updater disabled; not scheduling passes");
            return None;
        }
        Some(self.gate.run().await)
    }

    pub async fn shutdown(&self) {
        self.scheduler.terminate().await;
    }

    // -----------------------------------------------------------------------
    // Node protocol
    // -----------------------------------------------------------------------

    /// Answer a request from a peer (or from ourselves).
    pub async fn handle(&self, request: NodeRequest) -> NodeResponse {
        if !self.authorized(request.authorization.as_deref()) {
            tracing::warn!(cmd = %request.cmd, "rejected request with bad credentials");
            return NodeResponse::rejected(&self.name, None, "unauthorized");
        }
        match request.cmd {
            NodeCommand::Flush => self.flush_local().await,
            NodeCommand::Reset => self.reset_local().await,
        }
    }

    fn authorized(&self, presented: Option<&str>) -> bool {
        match &self.authorization {
            None => true,
            Some(expected) => presented == Some(expected.as_str()),
        }
    }

    /// One pass from a copy of the checkpoint. Acknowledged once the pass has
    /// run; per-record failures are in the report, not in the ack.
    pub async fn flush_local(&self) -> NodeResponse {
        match self.reconciler.flush_pass(&TerminationFlag::new()).await {
            Ok(report) => NodeResponse::acknowledged(&self.name, NodeOutcome::Completed { report }),
            Err(err) => {
                tracing::error!(error = %err, "flush pass failed");
                let reason = err.to_string();
                NodeResponse::rejected(
                    &self.name,
                    Some(NodeOutcome::Failed {
                        reason: reason.clone(),
                    }),
                    reason,
                )
            }
        }
    }

    /// Tear the scheduler down and arm it again. Acknowledged once it is armed
    /// or explicitly disabled.
    pub async fn reset_local(&self) -> NodeResponse {
        if !self.updater_enabled {
            self.scheduler.terminate().await;
            return NodeResponse::acknowledged(
                &self.name,
                NodeOutcome::Rearmed {
                    arm: ArmOutcome::Disabled(Interval::DISABLED),
                },
            );
        }
        match self.scheduler.restart().await {
            Ok(arm) => NodeResponse::acknowledged(&self.name, NodeOutcome::Rearmed { arm }),
            Err(err) => {
                tracing::error!(error = %err, "scheduler reset failed");
                NodeResponse::rejected(&self.name, None, err.to_string())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Admin operations
    // -----------------------------------------------------------------------

    pub async fn flush_cluster(&self) -> Result<BroadcastAck, BroadcastError> {
        self.broadcaster.broadcast(NodeCommand::Flush).await
    }

    pub async fn reset_cluster(&self) -> Result<BroadcastAck, BroadcastError> {
        self.broadcaster.broadcast(NodeCommand::Reset).await
    }

    pub async fn wait(
        &self,
        status: HealthStatus,
        timeout: Duration,
    ) -> Result<HealthReport, StoreError> {
        self.store.wait_for_health(status, timeout).await
    }

    pub async fn status(&self) -> Value {
        let stats: SchedulerStats = self.scheduler.stats();
        let gate: Option<GateState> = self.updater_enabled.then(|| self.gate.state());
        json!({
            "node": self.name,
            "collection": self.store.index(),
            "root": self.reconciler.root().display().to_string(),
            "file_updater_enabled": self.updater_enabled,
            "gate": gate,
            "scheduler": stats,
            "checkpoint": self.reconciler.checkpoint().await.last_checked(),
        })
    }
}
