//! Periodic reconciliation.
//!
//! The scheduler owns at most one timer task. `start`, `restart` and
//! `terminate` all replace it under one lock, so two timers never run at
//! once. The task sleeps for the current interval, runs a pass, then reads the
//! interval again from the cluster view before sleeping again. A negative
//! interval ends the task until the next `start`.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use configsync_core::{now_millis, Interval};
use configsync_store::StoreError;
use configsync_sync::{PassReport, Reconciler, TerminationFlag};

use crate::cluster::ClusterView;

/// Result of arming the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "interval", rename_all = "snake_case")]
pub enum ArmOutcome {
    Armed(Interval),
    Disabled(Interval),
}

impl ArmOutcome {
    pub fn interval(&self) -> Interval {
        match self {
            ArmOutcome::Armed(interval) | ArmOutcome::Disabled(interval) => *interval,
        }
    }

    pub fn is_armed(&self) -> bool {
        matches!(self, ArmOutcome::Armed(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchedulerStats {
    /// `None` until the first arm and after `terminate`.
    pub armed: Option<ArmOutcome>,
    pub passes_started: u64,
    pub passes_failed: u64,
    pub last_pass_at: Option<DateTime<Utc>>,
    pub last_report: Option<PassReport>,
}

struct Timer {
    handle: JoinHandle<()>,
    flag: TerminationFlag,
    cancel: watch::Sender<bool>,
}

pub struct Scheduler {
    reconciler: Arc<Reconciler>,
    cluster: Arc<dyn ClusterView>,
    default_interval: Interval,
    timer: Mutex<Option<Timer>>,
    stats: Arc<StdMutex<SchedulerStats>>,
}

impl Scheduler {
    pub fn new(
        reconciler: Arc<Reconciler>,
        cluster: Arc<dyn ClusterView>,
        default_interval: Interval,
    ) -> Self {
        Self {
            reconciler,
            cluster,
            default_interval,
            timer: Mutex::new(None),
            stats: Arc::new(StdMutex::new(SchedulerStats::default())),
        }
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn stats(&self) -> SchedulerStats {
        lock_stats(&self.stats).clone()
    }

    /// Arm the timer with the current interval, replacing any running one.
    pub async fn start(&self) -> ArmOutcome {
        let mut slot = self.timer.lock().await;
        stop_timer(slot.take()).await;

        let interval = current_interval(self.cluster.as_ref(), self.default_interval).await;
        let Some(delay) = interval.as_duration() else {
            tracing::info!(interval = %interval, "scheduler disabled");
            lock_stats(&self.stats).armed = Some(ArmOutcome::Disabled(interval));
            return ArmOutcome::Disabled(interval);
        };

        let flag = TerminationFlag::new();
        let (cancel, cancelled) = watch::channel(false);
        let task = TimerTask {
            reconciler: Arc::clone(&self.reconciler),
            cluster: Arc::clone(&self.cluster),
            default_interval: self.default_interval,
            stats: Arc::clone(&self.stats),
            flag: flag.clone(),
        };
        let handle = tokio::spawn(task.run(delay, cancelled));
        *slot = Some(Timer {
            handle,
            flag,
            cancel,
        });

        lock_stats(&self.stats).armed = Some(ArmOutcome::Armed(interval));
        tracing::info!(interval = %interval, "scheduler armed");
        ArmOutcome::Armed(interval)
    }

    /// Stop the timer. An in-flight pass stops at its next page boundary;
    /// returns once the timer task has exited.
    pub async fn terminate(&self) {
        let mut slot = self.timer.lock().await;
        stop_timer(slot.take()).await;
        lock_stats(&self.stats).armed = None;
    }

    /// Terminate, re-check the entry collection, then arm again.
    pub async fn restart(&self) -> Result<ArmOutcome, StoreError> {
        self.terminate().await;
        self.reconciler.store().ensure_collection().await?;
        Ok(self.start().await)
    }
}

async fn stop_timer(timer: Option<Timer>) {
    let Some(timer) = timer else { return };
    timer.flag.terminate();
    let _ = timer.cancel.send(true);
    if let Err(err) = timer.handle.await {
        if !err.is_cancelled() {
            tracing::warn!(error = %err, "scheduler task ended abnormally");
        }
    }
}

async fn current_interval(cluster: &dyn ClusterView, fallback: Interval) -> Interval {
    match cluster.flush_interval().await {
        Ok(Some(interval)) => interval,
        Ok(None) => fallback,
        Err(err) => {
            tracing::warn!(error = %err, fallback = %fallback, "cannot read dynamic interval");
            fallback
        }
    }
}

fn lock_stats(stats: &StdMutex<SchedulerStats>) -> std::sync::MutexGuard<'_, SchedulerStats> {
    stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct TimerTask {
    reconciler: Arc<Reconciler>,
    cluster: Arc<dyn ClusterView>,
    default_interval: Interval,
    stats: Arc<StdMutex<SchedulerStats>>,
    flag: TerminationFlag,
}

impl TimerTask {
    async fn run(self, mut delay: Duration, mut cancelled: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancelled.changed() => return,
            }

            {
                let mut stats = lock_stats(&self.stats);
                stats.passes_started += 1;
                stats.last_pass_at = Some(now_millis());
            }
            match self.reconciler.run_pass(&self.flag).await {
                Ok(report) => lock_stats(&self.stats).last_report = Some(report),
                Err(err) if err.is_terminated() => {
                    tracing::debug!("scheduled pass terminated");
                    return;
                }
                Err(err) => {
                    lock_stats(&self.stats).passes_failed += 1;
                    tracing::error!(error = %err, "scheduled pass failed");
                }
            }
            if self.flag.is_terminated() {
                return;
            }

            let interval = current_interval(self.cluster.as_ref(), self.default_interval).await;
            let mut stats = lock_stats(&self.stats);
            match interval.as_duration() {
                Some(next) => {
                    stats.armed = Some(ArmOutcome::Armed(interval));
                    delay = next;
                }
                None => {
                    tracing::info!(interval = %interval, "scheduler disabled");
                    stats.armed = Some(ArmOutcome::Disabled(interval));
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm_outcome_serializes_with_state_tag() {
        let json = serde_json::to_value(ArmOutcome::Armed(Interval::from_secs(30))).unwrap();
        assert_eq!(json, serde_json::json!({"state": "armed", "interval": "30s"}));
        let back: ArmOutcome = serde_json::from_value(
            serde_json::json!({"state": "disabled", "interval": -1}),
        )
        .unwrap();
        assert_eq!(back, ArmOutcome::Disabled(Interval::DISABLED));
        assert!(!back.is_armed());
    }
}
