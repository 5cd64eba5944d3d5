//! Control-loop integration tests.
//!
//! Exercises the daemon's moving parts together against the simulated
//! runtime: rolling updates under surge and availability limits, aborts
//! when the replacement build cannot stay healthy, restart recovery
//! from persisted state, and cooldown-gated autoscaling.
//!
//! These tests run entirely in-process with an in-memory store. Ticks
//! are driven by hand with a pause in between, long enough for probe
//! verdicts to land.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::sleep;

use convoy_core::{ReadinessPolicy, ReplicaBounds, RolloutLimits, ServiceSpec};
use convoy_health::{HealthMonitor, ProbeFuture, ProbeOutcome, Prober};
use convoy_metrics::{MetricPoller, StaticSource};
use convoy_reconcile::Reconciler;
use convoy_runtime::{ReplicaSetManager, SimRuntime};
use convoy_state::{InstanceStatus, RolloutPhase, StateStore};

/// Always-healthy probe target.
struct HealthyProber;

impl Prober for HealthyProber {
    fn probe(&self, _target: &str, _path: &str, _timeout: Duration) -> ProbeFuture {
        Box::pin(async { ProbeOutcome::Healthy })
    }
}

/// Passes every probe until armed, then fails instances running the
/// marked image. Stands in for a build that boots fine but cannot stay
/// healthy once it takes traffic.
struct BadImageProber {
    sim: SimRuntime,
    bad_image: String,
    armed: Arc<AtomicBool>,
}

impl Prober for BadImageProber {
    fn probe(&self, target: &str, _path: &str, _timeout: Duration) -> ProbeFuture {
        let sim = self.sim.clone();
        let bad = self.bad_image.clone();
        let armed = self.armed.load(Ordering::SeqCst);
        let target = target.to_string();
        Box::pin(async move {
            if !armed {
                return ProbeOutcome::Healthy;
            }
            match sim.image_at(&target).await {
                Some(image) if image == bad => ProbeOutcome::Unhealthy,
                Some(_) => ProbeOutcome::Healthy,
                None => ProbeOutcome::Unknown,
            }
        })
    }
}

fn fleet_spec(name: &str, image: &str, min: u32, max: u32) -> ServiceSpec {
    ServiceSpec {
        name: name.to_string(),
        image: image.to_string(),
        port: 8080,
        env: HashMap::new(),
        replicas: ReplicaBounds { min, max },
        target_utilization_pct: 80.0,
        limits: RolloutLimits {
            max_surge: 2,
            max_unavailable: 1,
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

struct Cluster {
    store: StateStore,
    sim: SimRuntime,
    source: Arc<StaticSource>,
    poller: Arc<MetricPoller>,
}

impl Cluster {
    fn new() -> Self {
        let store = StateStore::open_in_memory().unwrap();
        let source = Arc::new(StaticSource::new());
        let poller = Arc::new(MetricPoller::new(
            store.clone(),
            source.clone(),
            Duration::from_secs(60),
            Duration::from_secs(60),
        ));
        Self {
            store,
            sim: SimRuntime::new(),
            source,
            poller,
        }
    }

    /// Wire a reconciler the way the daemon does: persist the spec,
    /// adopt whatever instances the store already records, fresh monitor.
    async fn reconciler(&self, spec: &ServiceSpec, prober: Arc<dyn Prober>) -> Reconciler {
        self.store.put_spec(spec).unwrap();
        let records = self.store.list_instances_for_service(&spec.name).unwrap();
        let manager =
            ReplicaSetManager::adopt(&spec.name, Arc::new(self.sim.clone()), records).await;
        let monitor = HealthMonitor::new(prober);
        Reconciler::new(
            spec.clone(),
            self.store.clone(),
            manager,
            monitor,
            self.poller.clone(),
            Duration::from_secs(60),
        )
        .unwrap()
    }
}

async fn settle(reconciler: &mut Reconciler, ticks: u32, pause: Duration) {
    for _ in 0..ticks {
        sleep(pause).await;
        reconciler.tick().await.unwrap();
    }
}

// ── Rolling updates ────────────────────────────────────────────────

#[tokio::test]
async fn rolling_update_holds_availability_and_surge_limits() {
    let cluster = Cluster::new();
    let spec = fleet_spec("shop", "shop/api:v1", 3, 3);
    let mut reconciler = cluster.reconciler(&spec, Arc::new(HealthyProber)).await;

    settle(&mut reconciler, 6, Duration::from_millis(40)).await;
    assert_eq!(reconciler.manager().counts().ready, 3);

    // Push the new image the way the API does: rewrite the spec.
    let mut updated = spec.clone();
    updated.image = "shop/api:v2".to_string();
    cluster.store.put_spec(&updated).unwrap();

    // desired 3, surge 2, unavailable 1: never more than 5 recorded
    // instances, never fewer than 2 ready.
    let mut max_total = 0usize;
    let mut min_ready = usize::MAX;
    let mut finished = false;
    for _ in 0..30 {
        sleep(Duration::from_millis(40)).await;
        reconciler.tick().await.unwrap();

        let records = cluster.store.list_instances_for_service("shop").unwrap();
        let ready = records
            .iter()
            .filter(|r| r.status == InstanceStatus::Ready)
            .count();
        max_total = max_total.max(records.len());
        min_ready = min_ready.min(ready);

        let rollout = cluster.store.get_rollout("shop").unwrap().unwrap();
        if rollout.phase == RolloutPhase::Idle && rollout.current_version == "shop/api:v2" {
            finished = true;
            break;
        }
    }

    assert!(
        finished,
        "rollout did not converge (max_total={max_total} min_ready={min_ready})"
    );
    assert!(max_total <= 5, "surge limit breached: {max_total}");
    assert!(min_ready >= 2, "availability floor breached: {min_ready}");

    // The fleet ends at desired, all on the new image.
    assert_eq!(cluster.sim.running_count().await, 3);
    for id in cluster.sim.instance_ids().await {
        assert_eq!(
            cluster.sim.image_of(&id).await.as_deref(),
            Some("shop/api:v2")
        );
    }
}

#[tokio::test]
async fn failing_target_image_aborts_the_rollout() {
    let cluster = Cluster::new();
    let spec = fleet_spec("shop", "shop/api:v1", 3, 3);
    let armed = Arc::new(AtomicBool::new(false));
    let prober = Arc::new(BadImageProber {
        sim: cluster.sim.clone(),
        bad_image: "shop/api:v2".to_string(),
        armed: armed.clone(),
    });
    let mut reconciler = cluster.reconciler(&spec, prober).await;

    settle(&mut reconciler, 6, Duration::from_millis(40)).await;
    assert_eq!(reconciler.manager().counts().ready, 3);

    let mut updated = spec.clone();
    updated.image = "shop/api:v2".to_string();
    cluster.store.put_spec(&updated).unwrap();

    // Drive the surge until all three replacements have been attempted,
    // then let the bad build start failing its probes.
    let mut attempted = 0;
    for _ in 0..10 {
        sleep(Duration::from_millis(40)).await;
        reconciler.tick().await.unwrap();
        attempted = cluster
            .store
            .get_rollout("shop")
            .unwrap()
            .unwrap()
            .target_attempted;
        if attempted == 3 {
            break;
        }
    }
    assert_eq!(attempted, 3);
    armed.store(true, Ordering::SeqCst);
    sleep(Duration::from_millis(150)).await;

    // The first failed destroy leaves one failure in three attempts; the
    // second puts failures over a third and trips the abort.
    let mut min_ready = usize::MAX;
    let mut aborted = false;
    for _ in 0..10 {
        reconciler.tick().await.unwrap();

        let records = cluster.store.list_instances_for_service("shop").unwrap();
        let ready = records
            .iter()
            .filter(|r| r.status == InstanceStatus::Ready)
            .count();
        min_ready = min_ready.min(ready);

        let rollout = cluster.store.get_rollout("shop").unwrap().unwrap();
        if rollout.phase == RolloutPhase::Failed {
            aborted = true;
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    assert!(aborted, "rollout did not abort");

    let rollout = cluster.store.get_rollout("shop").unwrap().unwrap();
    assert_eq!(rollout.target_attempted, 3);
    assert_eq!(rollout.target_failed, 2);
    assert_eq!(rollout.current_version, "shop/api:v1");
    assert!(
        min_ready >= 2,
        "availability floor breached during abort: {min_ready}"
    );

    // Failed is terminal: ticks keep observing but stop acting.
    let before = cluster.sim.instance_ids().await;
    settle(&mut reconciler, 3, Duration::from_millis(20)).await;
    assert_eq!(cluster.sim.instance_ids().await, before);

    // The established fleet still serves.
    let records = cluster.store.list_instances_for_service("shop").unwrap();
    let ready_v1 = records
        .iter()
        .filter(|r| r.version == "shop/api:v1" && r.status == InstanceStatus::Ready)
        .count();
    assert_eq!(ready_v1, 2, "established fleet lost: {records:?}");
}

// ── Restart recovery ───────────────────────────────────────────────

#[tokio::test]
async fn restart_resumes_rollout_from_persisted_state() {
    let cluster = Cluster::new();
    let spec = fleet_spec("shop", "shop/api:v1", 2, 2);
    let mut reconciler = cluster.reconciler(&spec, Arc::new(HealthyProber)).await;
    settle(&mut reconciler, 4, Duration::from_millis(40)).await;
    assert_eq!(reconciler.manager().counts().ready, 2);

    let mut updated = spec.clone();
    updated.image = "shop/api:v2".to_string();
    cluster.store.put_spec(&updated).unwrap();

    // One tick into the rollout, then drop the reconciler mid-flight.
    settle(&mut reconciler, 1, Duration::from_millis(40)).await;
    let rollout = cluster.store.get_rollout("shop").unwrap().unwrap();
    assert_eq!(rollout.phase, RolloutPhase::Progressing);
    assert_eq!(rollout.target_attempted, 1);
    drop(reconciler);

    // A fresh reconciler adopts the recorded instances and the persisted
    // rollout; the sim plays the surviving runtime.
    let mut resumed = cluster.reconciler(&updated, Arc::new(HealthyProber)).await;
    assert_eq!(resumed.manager().counts().total(), 3);

    let mut finished = false;
    for _ in 0..20 {
        sleep(Duration::from_millis(40)).await;
        resumed.tick().await.unwrap();
        let rollout = cluster.store.get_rollout("shop").unwrap().unwrap();
        if rollout.phase == RolloutPhase::Idle && rollout.current_version == "shop/api:v2" {
            finished = true;
            break;
        }
    }
    assert!(finished, "resumed rollout did not converge");

    // One target created before the restart, one after.
    let rollout = cluster.store.get_rollout("shop").unwrap().unwrap();
    assert_eq!(rollout.target_attempted, 2);

    assert_eq!(cluster.sim.running_count().await, 2);
    // Adopted sequence numbers continue where the first run stopped.
    let records = cluster.store.list_instances_for_service("shop").unwrap();
    assert!(
        records.iter().all(|r| r.seq >= 2),
        "seq restarted: {records:?}"
    );
    assert!(records.iter().all(|r| r.version == "shop/api:v2"));
}

// ── Autoscaling ────────────────────────────────────────────────────

#[tokio::test]
async fn scale_cooldown_holds_desired_between_bursts() {
    let cluster = Cluster::new();
    let mut spec = fleet_spec("shop", "shop/api:v1", 1, 10);
    spec.scale_cooldown_ms = 60_000;
    let mut reconciler = cluster.reconciler(&spec, Arc::new(HealthyProber)).await;
    settle(&mut reconciler, 3, Duration::from_millis(40)).await;
    assert_eq!(reconciler.manager().counts().ready, 1);

    // First burst scales up: a never-scaled service has no window to
    // wait out. ceil(1 * 90 / 80) = 2.
    cluster.source.set("shop", 90.0).await;
    cluster.poller.poll_once().await.unwrap();
    settle(&mut reconciler, 3, Duration::from_millis(40)).await;

    let scaling = cluster.store.get_scaling("shop").unwrap().unwrap();
    assert_eq!(scaling.desired_replicas, 2);
    assert_eq!(cluster.sim.running_count().await, 2);

    // A second burst inside the cooldown is recorded but not acted on.
    cluster.source.set("shop", 95.0).await;
    cluster.poller.poll_once().await.unwrap();
    settle(&mut reconciler, 2, Duration::from_millis(40)).await;

    let scaling = cluster.store.get_scaling("shop").unwrap().unwrap();
    assert_eq!(scaling.desired_replicas, 2);
    assert_eq!(scaling.last_observed_utilization, Some(95.0));
    assert_eq!(cluster.sim.running_count().await, 2);
}
