//! Health monitor — one background probe task per instance.
//!
//! Each watched instance gets a task that waits the initial delay, then
//! probes on a fixed period and folds the outcome into that instance's
//! [`HealthRecord`]. Records live behind a single `RwLock`; the probe
//! task is the only writer for its record, and the reconcile loop reads
//! a snapshot once per tick.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use convoy_core::ReadinessPolicy;
use convoy_state::InstanceId;

use crate::probe::{HealthRecord, Prober};

/// Per-instance watch state.
struct WatchSlot {
    /// Handle to the background probe task.
    handle: JoinHandle<()>,
    /// Shutdown signal for this watch.
    shutdown_tx: watch::Sender<bool>,
}

type RecordMap = Arc<RwLock<HashMap<InstanceId, HealthRecord>>>;

/// Manages probe tasks for the instances of one service.
pub struct HealthMonitor {
    prober: Arc<dyn Prober>,
    records: RecordMap,
    watches: Arc<RwLock<HashMap<InstanceId, WatchSlot>>>,
}

impl HealthMonitor {
    pub fn new(prober: Arc<dyn Prober>) -> Self {
        Self {
            prober,
            records: Arc::new(RwLock::new(HashMap::new())),
            watches: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start probing an instance. Replaces any existing watch for the id.
    pub async fn watch_instance(&self, instance_id: &str, address: &str, policy: &ReadinessPolicy) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let id = instance_id.to_string();
        let task_address = address.to_string();
        let policy = policy.clone();
        let prober = Arc::clone(&self.prober);
        let records = Arc::clone(&self.records);

        let handle = tokio::spawn(async move {
            run_probe_loop(id, task_address, policy, prober, records, shutdown_rx).await;
        });

        let mut watches = self.watches.write().await;
        if let Some(old) = watches.insert(
            instance_id.to_string(),
            WatchSlot {
                handle,
                shutdown_tx,
            },
        ) {
            let _ = old.shutdown_tx.send(true);
            old.handle.abort();
        }
        debug!(instance = %instance_id, %address, "probe watch started");
    }

    /// Stop probing an instance and drop its record.
    pub async fn unwatch_instance(&self, instance_id: &str) {
        let mut watches = self.watches.write().await;
        if let Some(slot) = watches.remove(instance_id) {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            debug!(instance = %instance_id, "probe watch stopped");
        }
        drop(watches);
        self.records.write().await.remove(instance_id);
    }

    /// Stop all probe tasks (for graceful shutdown).
    pub async fn stop_all(&self) {
        let mut watches = self.watches.write().await;
        for (id, slot) in watches.drain() {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            debug!(instance = %id, "probe watch stopped");
        }
        drop(watches);
        self.records.write().await.clear();
        info!("all probe watches stopped");
    }

    /// Instance ids with an active watch.
    pub async fn watched(&self) -> Vec<InstanceId> {
        let watches = self.watches.read().await;
        watches.keys().cloned().collect()
    }

    pub async fn is_watching(&self, instance_id: &str) -> bool {
        let watches = self.watches.read().await;
        watches.contains_key(instance_id)
    }

    /// Copy of all current records, for one reconcile tick.
    pub async fn snapshot(&self) -> HashMap<InstanceId, HealthRecord> {
        self.records.read().await.clone()
    }

    /// Record for a single instance, if any probes have run.
    pub async fn record_for(&self, instance_id: &str) -> Option<HealthRecord> {
        self.records.read().await.get(instance_id).cloned()
    }
}

/// The probe loop for a single instance.
async fn run_probe_loop(
    instance_id: InstanceId,
    address: String,
    policy: ReadinessPolicy,
    prober: Arc<dyn Prober>,
    records: RecordMap,
    mut shutdown: watch::Receiver<bool>,
) {
    let initial_delay = Duration::from_millis(policy.initial_delay_ms);
    let period = Duration::from_millis(policy.period_ms);
    let timeout = Duration::from_millis(policy.timeout_ms);

    debug!(instance = %instance_id, path = %policy.path, "probe loop starting");

    tokio::select! {
        _ = tokio::time::sleep(initial_delay) => {}
        _ = shutdown.changed() => return,
    }

    loop {
        let outcome = prober.probe(&address, &policy.path, timeout).await;
        {
            let mut records = records.write().await;
            records.entry(instance_id.clone()).or_default().record(outcome);
        }

        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = shutdown.changed() => {
                debug!(instance = %instance_id, "probe loop shutting down");
                break;
            }
        }
    }
}
