//! Startup gate between process start and the first scheduled pass.
//!
//! ```text
//! WaitingForCluster -> CheckingStore -> {Creating, Ready}
//!        ^                                   |
//!        +----------- RetryScheduled <-------+ (any failure)
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;

use configsync_core::{HealthStatus, Settings};
use configsync_store::{EnsureOutcome, EntryStore, StoreError};

use crate::scheduler::{ArmOutcome, Scheduler};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    WaitingForCluster,
    CheckingStore,
    Creating,
    Ready,
    RetryScheduled,
}

pub struct ReadinessGate {
    store: EntryStore,
    scheduler: Arc<Scheduler>,
    cluster_timeout: Duration,
    retry_delay: Duration,
    state: watch::Sender<GateState>,
}

impl ReadinessGate {
    pub fn new(store: EntryStore, scheduler: Arc<Scheduler>, settings: &Settings) -> Self {
        Self::with_timing(
            store,
            scheduler,
            settings.health_timeout(),
            settings.retry_delay(),
        )
    }

    pub fn with_timing(
        store: EntryStore,
        scheduler: Arc<Scheduler>,
        cluster_timeout: Duration,
        retry_delay: Duration,
    ) -> Self {
        let (state, _) = watch::channel(GateState::WaitingForCluster);
        Self {
            store,
            scheduler,
            cluster_timeout,
            retry_delay,
            state,
        }
    }

    pub fn state(&self) -> GateState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<GateState> {
        self.state.subscribe()
    }

    /// Loop until the store is usable and the scheduler is armed. Never gives
    /// up; callers stop it by dropping the future.
    pub async fn run(&self) -> ArmOutcome {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            match self.attempt().await {
                Ok(outcome) => return outcome,
                Err(err) => {
                    self.state.send_replace(GateState::RetryScheduled);
                    tracing::warn!(
                        attempt,
                        error = %err,
                        retry_in = ?self.retry_delay,
                        "store not ready"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }

    async fn attempt(&self) -> Result<ArmOutcome, StoreError> {
        self.state.send_replace(GateState::WaitingForCluster);
        let health = self
            .store
            .wait_for_cluster(HealthStatus::Green, self.cluster_timeout)
            .await?;
        if health.timed_out {
            tracing::warn!(status = %health.status, "store is not green; continuing");
        }

        self.state.send_replace(GateState::CheckingStore);
        if !self
            .store
            .backend()
            .collection_exists(self.store.index())
            .await?
        {
            self.state.send_replace(GateState::Creating);
        }
        match self.store.ensure_collection().await? {
            EnsureOutcome::Created => tracing::info!(collection = %self.store.index(), "collection ready"),
            EnsureOutcome::Existed => {}
        }

        self.state.send_replace(GateState::Ready);
        Ok(self.scheduler.start().await)
    }
}
