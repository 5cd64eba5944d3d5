//! Reconciler supervision — one long-lived task per service.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ReconcileError, ReconcileResult};
use crate::reconciler::{ControlCommand, Reconciler};

/// Command queue depth per reconciler.
const COMMAND_BUFFER: usize = 16;

struct ReconcilerSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
    commands: mpsc::Sender<ControlCommand>,
}

/// Owns the running reconciler task for each service.
///
/// Ticks for one service are serialized by construction: the service's
/// only reconciler lives on the single task this set spawned for it.
#[derive(Clone)]
pub struct ReconcilerSet {
    slots: Arc<RwLock<HashMap<String, ReconcilerSlot>>>,
}

impl ReconcilerSet {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start the reconciler task for a service. A task already running
    /// under the same name is aborted and replaced.
    pub async fn spawn(&self, reconciler: Reconciler) {
        let service = reconciler.service().to_string();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let handle = tokio::spawn(reconciler.run(command_rx, shutdown_rx));

        let mut slots = self.slots.write().await;
        if let Some(old) = slots.insert(
            service.clone(),
            ReconcilerSlot {
                handle,
                shutdown_tx,
                commands: command_tx,
            },
        ) {
            warn!(service = %service, "replacing running reconciler");
            old.handle.abort();
        }
        debug!(service = %service, "reconciler spawned");
    }

    /// Route a control command to a service's reconciler.
    pub async fn command(&self, service: &str, command: ControlCommand) -> ReconcileResult<()> {
        let sender = {
            let slots = self.slots.read().await;
            let slot = slots
                .get(service)
                .ok_or_else(|| ReconcileError::ServiceNotRunning(service.to_string()))?;
            slot.commands.clone()
        };
        sender
            .send(command)
            .await
            .map_err(|_| ReconcileError::CommandRejected(service.to_string()))
    }

    /// Stop and forget one service's reconciler. Returns false when no
    /// reconciler was running for it.
    pub async fn remove(&self, service: &str) -> bool {
        let slot = { self.slots.write().await.remove(service) };
        match slot {
            Some(slot) => {
                let _ = slot.shutdown_tx.send(true);
                let _ = slot.handle.await;
                info!(%service, "reconciler removed");
                true
            }
            None => false,
        }
    }

    /// Signal every reconciler and wait for each to finish its tick.
    pub async fn shutdown_all(&self) {
        let drained: Vec<(String, ReconcilerSlot)> =
            { self.slots.write().await.drain().collect() };
        for (service, slot) in drained {
            let _ = slot.shutdown_tx.send(true);
            let _ = slot.handle.await;
            debug!(%service, "reconciler stopped");
        }
        info!("all reconcilers stopped");
    }

    pub async fn services(&self) -> Vec<String> {
        let slots = self.slots.read().await;
        let mut names: Vec<String> = slots.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn is_running(&self, service: &str) -> bool {
        self.slots.read().await.contains_key(service)
    }
}

impl Default for ReconcilerSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoy_core::{ReadinessPolicy, ReplicaBounds, RolloutLimits, ServiceSpec};
    use convoy_health::{HealthMonitor, ProbeFuture, ProbeOutcome, Prober};
    use convoy_metrics::{MetricPoller, StaticSource};
    use convoy_runtime::{ReplicaSetManager, SimRuntime};
    use convoy_state::{RolloutPhase, StateStore};
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::time::sleep;

    struct StaticProber(ProbeOutcome);

    impl Prober for StaticProber {
        fn probe(&self, _target: &str, _path: &str, _timeout: Duration) -> ProbeFuture {
            let outcome = self.0;
            Box::pin(async move { outcome })
        }
    }

    fn test_spec(name: &str) -> ServiceSpec {
        ServiceSpec {
            name: name.to_string(),
            image: "shop/api:v1".to_string(),
            port: 8080,
            env: HashMap::new(),
            replicas: ReplicaBounds { min: 1, max: 10 },
            target_utilization_pct: 80.0,
            limits: RolloutLimits {
                max_surge: 1,
                max_unavailable: 0,
            },
            readiness: ReadinessPolicy {
                path: "/healthz".to_string(),
                initial_delay_ms: 0,
                period_ms: 10,
                timeout_ms: 10,
                success_threshold: 1,
            },
            termination_grace_secs: 1,
            scale_cooldown_ms: 0,
        }
    }

    fn test_reconciler(store: &StateStore, name: &str, interval: Duration) -> Reconciler {
        let spec = test_spec(name);
        store.put_spec(&spec).unwrap();
        let manager = ReplicaSetManager::new(name, Arc::new(SimRuntime::new()));
        let monitor = HealthMonitor::new(Arc::new(StaticProber(ProbeOutcome::Healthy)));
        let poller = Arc::new(MetricPoller::new(
            store.clone(),
            Arc::new(StaticSource::new()),
            Duration::from_secs(60),
            Duration::from_secs(60),
        ));
        Reconciler::new(spec, store.clone(), manager, monitor, poller, interval).unwrap()
    }

    #[tokio::test]
    async fn spawn_tracks_and_shutdown_clears() {
        let store = StateStore::open_in_memory().unwrap();
        let set = ReconcilerSet::new();

        set.spawn(test_reconciler(&store, "api", Duration::from_secs(60)))
            .await;
        set.spawn(test_reconciler(&store, "worker", Duration::from_secs(60)))
            .await;

        assert!(set.is_running("api").await);
        assert_eq!(
            set.services().await,
            vec!["api".to_string(), "worker".to_string()]
        );

        set.shutdown_all().await;
        assert!(!set.is_running("api").await);
        assert!(set.services().await.is_empty());
    }

    #[tokio::test]
    async fn command_to_unknown_service_fails() {
        let set = ReconcilerSet::new();
        let err = set
            .command("ghost", ControlCommand::Pause)
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::ServiceNotRunning(_)));
    }

    #[tokio::test]
    async fn pause_command_reaches_the_store() {
        let store = StateStore::open_in_memory().unwrap();
        let set = ReconcilerSet::new();
        set.spawn(test_reconciler(&store, "api", Duration::from_secs(60)))
            .await;

        set.command("api", ControlCommand::Pause).await.unwrap();
        sleep(Duration::from_millis(100)).await;

        let rollout = store.get_rollout("api").unwrap().unwrap();
        assert_eq!(rollout.phase, RolloutPhase::Paused);

        set.command("api", ControlCommand::Resume).await.unwrap();
        sleep(Duration::from_millis(100)).await;

        let rollout = store.get_rollout("api").unwrap().unwrap();
        assert_eq!(rollout.phase, RolloutPhase::Idle);

        set.shutdown_all().await;
    }

    #[tokio::test]
    async fn remove_unknown_service_is_false() {
        let set = ReconcilerSet::new();
        assert!(!set.remove("ghost").await);
    }

    #[tokio::test]
    async fn remove_stops_the_task() {
        let store = StateStore::open_in_memory().unwrap();
        let set = ReconcilerSet::new();
        set.spawn(test_reconciler(&store, "api", Duration::from_millis(10)))
            .await;

        sleep(Duration::from_millis(50)).await;
        assert!(set.remove("api").await);
        assert!(!set.is_running("api").await);
    }

    #[tokio::test]
    async fn running_reconciler_converges_the_fleet() {
        let store = StateStore::open_in_memory().unwrap();
        let set = ReconcilerSet::new();
        set.spawn(test_reconciler(&store, "api", Duration::from_millis(20)))
            .await;

        sleep(Duration::from_millis(300)).await;
        set.shutdown_all().await;

        let records = store.list_instances_for_service("api").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, convoy_state::InstanceStatus::Ready);
    }
}
