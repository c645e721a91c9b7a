//! Scheduler arming and the readiness gate, on paused time.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use configsync_core::{HealthStatus, Interval, Settings};
use configsync_daemon::{
    ArmOutcome, ClusterError, ClusterView, GateState, NodeInfo, ReadinessGate, Scheduler,
};
use configsync_store::{EntryStore, MemoryBackend};
use configsync_sync::Reconciler;

/// Membership is irrelevant here; only the dynamic interval matters.
#[derive(Default)]
struct IntervalCluster(Mutex<Option<Interval>>);

impl IntervalCluster {
    fn set(&self, interval: Option<Interval>) {
        *self.0.lock().unwrap() = interval;
    }
}

#[async_trait]
impl ClusterView for IntervalCluster {
    async fn nodes(&self) -> Result<Vec<NodeInfo>, ClusterError> {
        Ok(Vec::new())
    }

    async fn flush_interval(&self) -> Result<Option<Interval>, ClusterError> {
        Ok(*self.0.lock().unwrap())
    }
}

struct Fixture {
    _tmp: TempDir,
    backend: Arc<MemoryBackend>,
    store: EntryStore,
    cluster: Arc<IntervalCluster>,
    scheduler: Arc<Scheduler>,
}

fn fixture(default_interval: Interval) -> Fixture {
    let tmp = TempDir::new().expect("tmp");
    let backend = Arc::new(MemoryBackend::new());
    let store = EntryStore::new(backend.clone(), &Settings::default()).expect("store");
    let reconciler = Arc::new(Reconciler::with_options(
        store.clone(),
        tmp.path().join("config"),
        10,
        Duration::from_secs(60),
    ));
    let cluster = Arc::new(IntervalCluster::default());
    let scheduler = Arc::new(Scheduler::new(reconciler, cluster.clone(), default_interval));
    Fixture {
        _tmp: tmp,
        backend,
        store,
        cluster,
        scheduler,
    }
}

#[tokio::test(start_paused = true)]
async fn negative_interval_runs_nothing_until_reset() {
    let fx = fixture(Interval::from_mins(1));
    fx.cluster.set(Some(Interval::from_millis(-1)));

    let outcome = fx.scheduler.start().await;
    assert_eq!(outcome, ArmOutcome::Disabled(Interval::from_millis(-1)));
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(fx.scheduler.stats().passes_started, 0);

    fx.cluster.set(Some(Interval::from_secs(1)));
    let outcome = fx.scheduler.restart().await.expect("restart");
    assert_eq!(outcome, ArmOutcome::Armed(Interval::from_secs(1)));

    tokio::time::sleep(Duration::from_millis(3_500)).await;
    let stats = fx.scheduler.stats();
    assert!(stats.passes_started >= 2, "passes: {}", stats.passes_started);
    assert_eq!(stats.passes_failed, 0);
    assert!(stats.last_report.is_some());

    fx.scheduler.terminate().await;
}

#[tokio::test(start_paused = true)]
async fn static_interval_is_used_without_a_dynamic_override() {
    let fx = fixture(Interval::from_secs(30));
    assert_eq!(fx.scheduler.start().await, ArmOutcome::Armed(Interval::from_secs(30)));

    tokio::time::sleep(Duration::from_secs(29)).await;
    assert_eq!(fx.scheduler.stats().passes_started, 0, "first pass waits one interval");
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(fx.scheduler.stats().passes_started, 1);

    fx.scheduler.terminate().await;
}

#[tokio::test(start_paused = true)]
async fn interval_is_reread_after_every_pass() {
    let fx = fixture(Interval::from_mins(1));
    fx.cluster.set(Some(Interval::from_secs(1)));
    assert!(fx.scheduler.start().await.is_armed());

    // Takes effect at the next re-arm, after the pass already scheduled.
    fx.cluster.set(Some(Interval::DISABLED));
    tokio::time::sleep(Duration::from_secs(10)).await;

    let stats = fx.scheduler.stats();
    assert_eq!(stats.passes_started, 1);
    assert_eq!(stats.armed, Some(ArmOutcome::Disabled(Interval::DISABLED)));
}

#[tokio::test(start_paused = true)]
async fn terminate_cancels_the_pending_timer() {
    let fx = fixture(Interval::from_secs(1));
    assert!(fx.scheduler.start().await.is_armed());
    fx.scheduler.terminate().await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    let stats = fx.scheduler.stats();
    assert_eq!(stats.passes_started, 0);
    assert_eq!(stats.armed, None);
}

#[tokio::test(start_paused = true)]
async fn restarting_replaces_the_timer() {
    let fx = fixture(Interval::from_secs(1));
    fx.scheduler.start().await;
    fx.scheduler.start().await;

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(fx.scheduler.stats().passes_started, 1, "only one timer may be live");
    fx.scheduler.terminate().await;
}

#[tokio::test(start_paused = true)]
async fn failed_pass_is_counted_and_rearmed() {
    let fx = fixture(Interval::from_secs(1));
    fx.store.ensure_collection().await.expect("ensure");
    fx.scheduler.start().await;
    fx.backend.set_available(false);

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    let stats = fx.scheduler.stats();
    assert_eq!(stats.passes_started, 2, "a failure re-arms like a success");
    assert_eq!(stats.passes_failed, 2);
    assert!(stats.armed.map(|a| a.is_armed()).unwrap_or(false));

    fx.scheduler.terminate().await;
}

// ---------------------------------------------------------------------------
// Readiness gate
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn gate_retries_until_the_store_is_reachable() {
    let fx = fixture(Interval::from_mins(1));
    fx.backend.set_available(false);
    let gate = Arc::new(ReadinessGate::with_timing(
        fx.store.clone(),
        fx.scheduler.clone(),
        Duration::from_secs(1),
        Duration::from_secs(15),
    ));

    let mut states = gate.subscribe();
    let task = tokio::spawn({
        let gate = gate.clone();
        async move { gate.run().await }
    });

    states
        .wait_for(|s| *s == GateState::RetryScheduled)
        .await
        .expect("retry state");
    assert!(fx.scheduler.stats().armed.is_none(), "not armed before ready");

    tokio::time::sleep(Duration::from_secs(40)).await;
    assert!(!task.is_finished(), "the gate keeps retrying");

    fx.backend.set_available(true);
    let outcome = task.await.expect("gate task");
    assert_eq!(outcome, ArmOutcome::Armed(Interval::from_mins(1)));
    assert_eq!(gate.state(), GateState::Ready);
    assert!(fx.store.backend().collection_exists(fx.store.index()).await.expect("exists"));

    fx.scheduler.terminate().await;
}

#[tokio::test(start_paused = true)]
async fn gate_continues_when_cluster_stays_yellow() {
    let fx = fixture(Interval::from_mins(1));
    fx.backend.set_health(HealthStatus::Yellow);
    let gate = ReadinessGate::with_timing(
        fx.store.clone(),
        fx.scheduler.clone(),
        Duration::from_secs(5),
        Duration::from_secs(15),
    );

    let outcome = gate.run().await;
    assert!(outcome.is_armed());
    assert_eq!(gate.state(), GateState::Ready);
    fx.scheduler.terminate().await;
}
