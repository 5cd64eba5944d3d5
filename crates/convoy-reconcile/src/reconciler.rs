//! Per-service reconciliation — one serialized tick at a time.
//!
//! A `Reconciler` owns every moving part for one service: the replica-set
//! manager, the health monitor, the rollout controller, and the persisted
//! scaling state. Each tick folds the latest observations into at most one
//! instance-mutating action, so two ticks for the same service can never
//! race each other.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use convoy_core::ServiceSpec;
use convoy_health::{HealthMonitor, HealthVerdict};
use convoy_metrics::MetricPoller;
use convoy_rollout::{FleetObservation, InstanceObservation, RolloutAction, RolloutController};
use convoy_runtime::ReplicaSetManager;
use convoy_state::{now_ms, InstanceStatus, RolloutState, ScalingState, StateStore};

use crate::error::{ReconcileError, ReconcileResult};

/// Commands the API surface feeds into a running reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Pause,
    Resume,
}

/// Longest delay between provisioning retries.
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Doubling delay over consecutive provisioning failures.
///
/// While a backoff window is open the tick still observes, probes, and
/// persists; only the instance-mutating action is withheld.
#[derive(Debug)]
struct Backoff {
    base: Duration,
    streak: u32,
    /// Wall-clock ms until which actions are withheld; 0 when clear.
    until: u64,
}

impl Backoff {
    fn new(base: Duration) -> Self {
        Self {
            base,
            streak: 0,
            until: 0,
        }
    }

    fn active(&self, now: u64) -> bool {
        now < self.until
    }

    fn record_failure(&mut self, now: u64) -> Duration {
        let delay = self
            .base
            .saturating_mul(2u32.saturating_pow(self.streak.min(16)))
            .min(MAX_BACKOFF);
        self.streak += 1;
        self.until = now + delay.as_millis() as u64;
        delay
    }

    fn reset(&mut self) {
        self.streak = 0;
        self.until = 0;
    }
}

/// Drives one service toward its spec.
pub struct Reconciler {
    service: String,
    spec: ServiceSpec,
    store: StateStore,
    manager: ReplicaSetManager,
    monitor: HealthMonitor,
    poller: Arc<MetricPoller>,
    controller: RolloutController,
    scaling: ScalingState,
    interval: Duration,
    backoff: Backoff,
}

impl Reconciler {
    /// Build a reconciler around persisted state, seeding the store with
    /// fresh rollout and scaling records when none exist yet.
    pub fn new(
        spec: ServiceSpec,
        store: StateStore,
        manager: ReplicaSetManager,
        monitor: HealthMonitor,
        poller: Arc<MetricPoller>,
        interval: Duration,
    ) -> ReconcileResult<Self> {
        let rollout = match store.get_rollout(&spec.name)? {
            Some(rollout) => rollout,
            None => {
                let rollout = RolloutState::new(&spec.name, &spec.image);
                store.put_rollout(&rollout)?;
                rollout
            }
        };
        let scaling = match store.get_scaling(&spec.name)? {
            Some(scaling) => scaling,
            None => {
                let scaling = ScalingState::new(&spec.name, spec.replicas.min);
                store.put_scaling(&scaling)?;
                scaling
            }
        };

        Ok(Self {
            service: spec.name.clone(),
            spec,
            store,
            manager,
            monitor,
            poller,
            controller: RolloutController::new(rollout),
            scaling,
            interval,
            backoff: Backoff::new(interval),
        })
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn manager(&self) -> &ReplicaSetManager {
        &self.manager
    }

    pub fn controller(&self) -> &RolloutController {
        &self.controller
    }

    pub fn scaling(&self) -> &ScalingState {
        &self.scaling
    }

    /// One reconcile pass: observe, decide, apply at most one action,
    /// persist what changed.
    pub async fn tick(&mut self) -> ReconcileResult<()> {
        // The freshest spec wins; a vanished spec means teardown raced us.
        let Some(spec) = self.store.get_spec(&self.service)? else {
            return Err(ReconcileError::SpecMissing(self.service.clone()));
        };
        self.spec = spec;

        let rollout_before = self.controller.state().clone();
        let records_before = self.manager.records();

        // Fold the runtime's view in and drop watches for pruned handles.
        let pruned = self.manager.sweep().await;
        for id in &pruned {
            self.monitor.unwatch_instance(id).await;
        }

        self.reconcile_health().await;

        let desired = self.evaluate_scale().await?;

        // The spec image drives the rollout target.
        self.controller.begin(&self.spec.image);

        let now = now_ms();
        if self.backoff.active(now) {
            debug!(
                service = %self.service,
                streak = self.backoff.streak,
                "provisioning backoff open, withholding actions"
            );
        } else {
            let observation = self.observe();
            if let Some(action) = self.controller.step(&self.spec, &observation, desired) {
                self.apply_action(action).await;
            }
        }

        if self.controller.state() != &rollout_before {
            self.store.put_rollout(self.controller.state())?;
        }
        let records = self.manager.records();
        if records != records_before {
            self.store
                .replace_instances_for_service(&self.service, &records)?;
        }
        Ok(())
    }

    /// Run ticks until shutdown, applying control commands as they arrive.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<ControlCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(service = %self.service, interval = ?self.interval, "reconciler started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Commands queued since the last wake apply first.
                    while let Ok(command) = commands.try_recv() {
                        self.apply_command(command);
                    }
                    if let Err(e) = self.tick().await {
                        error!(service = %self.service, error = %e, "reconcile tick failed");
                    }
                }
                command = commands.recv() => {
                    match command {
                        Some(command) => {
                            self.apply_command(command);
                            // Make the phase change visible before the next tick.
                            if let Err(e) = self.store.put_rollout(self.controller.state()) {
                                error!(service = %self.service, error = %e, "failed to persist phase");
                            }
                        }
                        // All senders gone: the supervisor dropped this slot.
                        None => break,
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.monitor.stop_all().await;
        info!(service = %self.service, "reconciler shutting down");
    }

    fn apply_command(&mut self, command: ControlCommand) {
        debug!(service = %self.service, ?command, "applying control command");
        match command {
            ControlCommand::Pause => self.controller.pause(),
            ControlCommand::Resume => self.controller.resume(),
        }
    }

    /// Watch everything alive, retire watches for everything that is not,
    /// then apply this tick's probe verdicts to the handles.
    async fn reconcile_health(&mut self) {
        for handle in self.manager.instances().to_vec() {
            match handle.status {
                InstanceStatus::Starting | InstanceStatus::Ready => {
                    if !self.monitor.is_watching(&handle.id).await {
                        self.monitor
                            .watch_instance(&handle.id, &handle.address, &self.spec.readiness)
                            .await;
                    }
                }
                InstanceStatus::Terminating | InstanceStatus::Failed => {
                    self.monitor.unwatch_instance(&handle.id).await;
                }
            }
        }

        let threshold = self.spec.readiness.success_threshold;
        for (id, record) in self.monitor.snapshot().await {
            let Some(status) = self.manager.get(&id).map(|h| h.status) else {
                continue;
            };
            match record.verdict(threshold) {
                HealthVerdict::Ready if status == InstanceStatus::Starting => {
                    self.manager.mark_ready(&id);
                }
                HealthVerdict::Exceeded
                    if matches!(status, InstanceStatus::Starting | InstanceStatus::Ready) =>
                {
                    self.manager.mark_failed(&id);
                }
                _ => {}
            }
        }
    }

    /// Fold the latest utilization sample into the scaling state and
    /// return the desired replica count for this tick.
    async fn evaluate_scale(&mut self) -> ReconcileResult<u32> {
        let before = self.scaling.clone();

        // Spec bounds win over whatever was persisted before a config change.
        let clamped = self
            .scaling
            .desired_replicas
            .clamp(self.spec.replicas.min, self.spec.replicas.max);
        if clamped != self.scaling.desired_replicas {
            info!(
                service = %self.service,
                from = self.scaling.desired_replicas,
                to = clamped,
                "desired replicas clamped to spec bounds"
            );
            self.scaling.desired_replicas = clamped;
            self.scaling.updated_at = now_ms();
        }

        let sample = self.poller.latest(&self.service).await;
        convoy_autoscale::evaluate(&self.spec, &mut self.scaling, sample.as_ref(), now_ms());

        if self.scaling != before {
            self.store.put_scaling(&self.scaling)?;
        }
        Ok(self.scaling.desired_replicas)
    }

    fn observe(&self) -> FleetObservation {
        FleetObservation::new(
            self.manager
                .instances()
                .iter()
                .map(|handle| InstanceObservation {
                    id: handle.id.clone(),
                    version: handle.version.clone(),
                    status: handle.status,
                    seq: handle.seq,
                })
                .collect(),
        )
    }

    /// Apply one controller action through the manager, folding failures
    /// into the provisioning backoff.
    async fn apply_action(&mut self, action: RolloutAction) {
        let result = match action {
            RolloutAction::Create { version } => {
                match self.manager.create_instance(&self.spec, &version).await {
                    Ok(handle) => {
                        self.monitor
                            .watch_instance(&handle.id, &handle.address, &self.spec.readiness)
                            .await;
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            RolloutAction::Destroy { instance, .. } => {
                self.monitor.unwatch_instance(&instance).await;
                let grace = Duration::from_secs(self.spec.termination_grace_secs);
                self.manager.destroy_instance(&instance, grace).await
            }
        };

        match result {
            Ok(()) => self.backoff.reset(),
            Err(e) => {
                let delay = self.backoff.record_failure(now_ms());
                warn!(
                    service = %self.service,
                    error = %e,
                    retry_in = ?delay,
                    "provisioning failed, backing off"
                );
            }
        }
    }
}
