//! Replica-set management — the instance handles for one service.
//!
//! The manager is the single owner of its handles and the only component
//! that talks to the runtime. It never decides policy: the rollout
//! controller and reconcile loop tell it what to create and destroy, one
//! action at a time.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use convoy_core::{image, ServiceSpec};
use convoy_state::{now_ms, InstanceId, InstanceRecord, InstanceStatus};

use crate::client::{
    ProvisioningError, RuntimeClient, RuntimeStatus, StartRequest, RUNTIME_CALL_TIMEOUT,
};

/// Live view of one instance, owned exclusively by its manager.
#[derive(Debug, Clone)]
pub struct InstanceHandle {
    pub id: InstanceId,
    /// Canonical image reference this instance runs.
    pub version: String,
    /// Probe address (`host:port`).
    pub address: String,
    pub status: InstanceStatus,
    /// Monotonic creation sequence; never reused, even for failed starts.
    pub seq: u64,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Per-status instance counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub starting: u32,
    pub ready: u32,
    pub terminating: u32,
    pub failed: u32,
}

impl StatusCounts {
    pub fn total(&self) -> u32 {
        self.starting + self.ready + self.terminating + self.failed
    }
}

/// Owns and mutates the fleet of instances for a single service.
pub struct ReplicaSetManager {
    service: String,
    runtime: Arc<dyn RuntimeClient>,
    /// Ordered by `seq` (creation order); removals preserve the order.
    instances: Vec<InstanceHandle>,
    next_seq: u64,
}

impl ReplicaSetManager {
    pub fn new(service: &str, runtime: Arc<dyn RuntimeClient>) -> Self {
        Self {
            service: service.to_string(),
            runtime,
            instances: Vec::new(),
            next_seq: 0,
        }
    }

    /// Rebuild a manager from persisted records after a restart.
    ///
    /// Every record is re-checked against the runtime: Terminating records
    /// whose instance is gone are dropped, records whose instance died are
    /// marked Failed, the rest keep their persisted status.
    pub async fn adopt(
        service: &str,
        runtime: Arc<dyn RuntimeClient>,
        records: Vec<InstanceRecord>,
    ) -> Self {
        let mut manager = Self::new(service, runtime);
        for record in records {
            manager.next_seq = manager.next_seq.max(record.seq + 1);
            manager.instances.push(InstanceHandle {
                id: record.id,
                version: record.version,
                address: record.address,
                status: record.status,
                seq: record.seq,
                created_at: record.created_at,
                updated_at: record.updated_at,
            });
        }
        manager.instances.sort_by_key(|i| i.seq);
        let adopted = manager.instances.len();
        let pruned = manager.sweep().await.len();
        info!(%service, adopted, pruned, "replica set adopted from store");
        manager
    }

    /// Launch one instance of `version` under the service's spec.
    ///
    /// The runtime call is bounded by [`RUNTIME_CALL_TIMEOUT`]; a timeout is
    /// a failure. The sequence number is consumed either way, so an instance
    /// the runtime may have started anyway can never collide with a later id.
    pub async fn create_instance(
        &mut self,
        spec: &ServiceSpec,
        version: &str,
    ) -> Result<InstanceHandle, ProvisioningError> {
        let seq = self.next_seq;
        self.next_seq += 1;
        let id = format!("{}-{}-{}", self.service, image::revision(version), seq);

        let request = StartRequest {
            service: self.service.clone(),
            instance_id: id.clone(),
            image: version.to_string(),
            port: spec.port,
            env: spec.env.clone(),
        };
        let started =
            match tokio::time::timeout(RUNTIME_CALL_TIMEOUT, self.runtime.start(request)).await {
                Ok(Ok(started)) => started,
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(ProvisioningError::Timeout(RUNTIME_CALL_TIMEOUT)),
            };

        let now = now_ms();
        let handle = InstanceHandle {
            id: id.clone(),
            version: version.to_string(),
            address: started.address,
            status: InstanceStatus::Starting,
            seq,
            created_at: now,
            updated_at: now,
        };
        self.instances.push(handle.clone());
        info!(
            service = %self.service,
            instance = %id,
            %version,
            address = %handle.address,
            "instance created"
        );
        Ok(handle)
    }

    /// Stop an instance. Idempotent: unknown ids and instances already
    /// Terminating are a successful no-op.
    ///
    /// The handle stays Terminating (and keeps occupying capacity) until a
    /// later [`sweep`](Self::sweep) confirms the runtime dropped it. On
    /// error the previous status is restored so the next tick retries.
    pub async fn destroy_instance(
        &mut self,
        id: &str,
        grace: Duration,
    ) -> Result<(), ProvisioningError> {
        let Some(position) = self.instances.iter().position(|i| i.id == id) else {
            return Ok(());
        };
        if self.instances[position].status == InstanceStatus::Terminating {
            return Ok(());
        }
        let previous = self.instances[position].status;
        self.instances[position].status = InstanceStatus::Terminating;
        self.instances[position].updated_at = now_ms();

        let outcome =
            tokio::time::timeout(RUNTIME_CALL_TIMEOUT, self.runtime.stop(id, grace)).await;
        match outcome {
            Ok(Ok(())) => {
                info!(service = %self.service, instance = %id, "instance stopping");
                Ok(())
            }
            // The runtime already dropped it; the sweep will prune the handle.
            Ok(Err(ProvisioningError::UnknownInstance(_))) => Ok(()),
            Ok(Err(e)) => {
                self.instances[position].status = previous;
                Err(e)
            }
            Err(_) => {
                self.instances[position].status = previous;
                Err(ProvisioningError::Timeout(RUNTIME_CALL_TIMEOUT))
            }
        }
    }

    /// Reconcile handles against the runtime's view of the world.
    ///
    /// Prunes Terminating handles the runtime no longer tracks and marks
    /// instances that died outside the controller as Failed. Status-call
    /// errors leave the handle untouched until the next tick. Returns the
    /// pruned ids.
    pub async fn sweep(&mut self) -> Vec<InstanceId> {
        let snapshot: Vec<(InstanceId, InstanceStatus)> = self
            .instances
            .iter()
            .map(|i| (i.id.clone(), i.status))
            .collect();
        let mut removed = Vec::new();

        for (id, status) in snapshot {
            let runtime_status =
                match tokio::time::timeout(RUNTIME_CALL_TIMEOUT, self.runtime.status(&id)).await {
                    Ok(Ok(s)) => s,
                    Ok(Err(e)) => {
                        debug!(instance = %id, error = %e, "status check failed");
                        continue;
                    }
                    Err(_) => {
                        debug!(instance = %id, "status check timed out");
                        continue;
                    }
                };
            match (status, runtime_status) {
                (InstanceStatus::Terminating, RuntimeStatus::Gone) => {
                    self.instances.retain(|i| i.id != id);
                    debug!(service = %self.service, instance = %id, "instance pruned");
                    removed.push(id);
                }
                (
                    InstanceStatus::Starting | InstanceStatus::Ready,
                    RuntimeStatus::Exited | RuntimeStatus::Gone,
                ) => {
                    if let Some(instance) = self.instances.iter_mut().find(|i| i.id == id) {
                        warn!(
                            service = %self.service,
                            instance = %id,
                            "instance died outside the controller"
                        );
                        instance.status = InstanceStatus::Failed;
                        instance.updated_at = now_ms();
                    }
                }
                _ => {}
            }
        }
        removed
    }

    /// Promote a Starting instance to Ready. Only the reconcile tick calls
    /// this; probe tasks never touch handles directly.
    pub fn mark_ready(&mut self, id: &str) -> bool {
        match self.instances.iter_mut().find(|i| i.id == id) {
            Some(instance) if instance.status == InstanceStatus::Starting => {
                instance.status = InstanceStatus::Ready;
                instance.updated_at = now_ms();
                info!(service = %self.service, instance = %id, "instance ready");
                true
            }
            _ => false,
        }
    }

    /// Mark a Starting or Ready instance as Failed.
    pub fn mark_failed(&mut self, id: &str) -> bool {
        match self.instances.iter_mut().find(|i| i.id == id) {
            Some(instance)
                if matches!(
                    instance.status,
                    InstanceStatus::Starting | InstanceStatus::Ready
                ) =>
            {
                instance.status = InstanceStatus::Failed;
                instance.updated_at = now_ms();
                warn!(service = %self.service, instance = %id, "instance failed");
                true
            }
            _ => false,
        }
    }

    /// Handles in creation order.
    pub fn instances(&self) -> &[InstanceHandle] {
        &self.instances
    }

    /// Handles of one version, in creation order.
    pub fn instances_of<'a>(
        &'a self,
        version: &'a str,
    ) -> impl Iterator<Item = &'a InstanceHandle> {
        self.instances.iter().filter(move |i| i.version == version)
    }

    pub fn get(&self, id: &str) -> Option<&InstanceHandle> {
        self.instances.iter().find(|i| i.id == id)
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Counts across all versions.
    pub fn counts(&self) -> StatusCounts {
        Self::tally(self.instances.iter())
    }

    /// Counts for one version only.
    pub fn counts_for(&self, version: &str) -> StatusCounts {
        Self::tally(self.instances_of(version))
    }

    fn tally<'a>(instances: impl Iterator<Item = &'a InstanceHandle>) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for instance in instances {
            match instance.status {
                InstanceStatus::Starting => counts.starting += 1,
                InstanceStatus::Ready => counts.ready += 1,
                InstanceStatus::Terminating => counts.terminating += 1,
                InstanceStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Snapshot for persistence.
    pub fn records(&self) -> Vec<InstanceRecord> {
        self.instances
            .iter()
            .map(|i| InstanceRecord {
                id: i.id.clone(),
                service: self.service.clone(),
                version: i.version.clone(),
                address: i.address.clone(),
                status: i.status,
                seq: i.seq,
                created_at: i.created_at,
                updated_at: i.updated_at,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimRuntime;
    use convoy_core::{ReadinessPolicy, ReplicaBounds, RolloutLimits};
    use std::collections::HashMap;

    fn test_spec() -> ServiceSpec {
        ServiceSpec {
            name: "api".to_string(),
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
                period_ms: 100,
                timeout_ms: 100,
                success_threshold: 1,
            },
            termination_grace_secs: 1,
            scale_cooldown_ms: 0,
        }
    }

    fn grace() -> Duration {
        Duration::from_secs(1)
    }

    #[tokio::test]
    async fn create_assigns_monotonic_seq() {
        let sim = SimRuntime::new();
        let mut manager = ReplicaSetManager::new("api", Arc::new(sim));
        let spec = test_spec();

        let a = manager.create_instance(&spec, "shop/api:v1").await.unwrap();
        let b = manager.create_instance(&spec, "shop/api:v1").await.unwrap();

        assert_eq!(a.seq, 0);
        assert_eq!(b.seq, 1);
        assert_eq!(a.status, InstanceStatus::Starting);
        assert_ne!(a.id, b.id);
        assert_eq!(manager.counts().total(), 2);
    }

    #[tokio::test]
    async fn rejected_create_still_consumes_seq() {
        let sim = SimRuntime::new();
        sim.reject_next_starts(1).await;
        let mut manager = ReplicaSetManager::new("api", Arc::new(sim));
        let spec = test_spec();

        assert!(manager.create_instance(&spec, "shop/api:v1").await.is_err());
        assert!(manager.instances().is_empty());

        let b = manager.create_instance(&spec, "shop/api:v1").await.unwrap();
        assert_eq!(b.seq, 1);
    }

    #[tokio::test]
    async fn destroy_is_idempotent() {
        let sim = SimRuntime::new();
        let mut manager = ReplicaSetManager::new("api", Arc::new(sim));
        let spec = test_spec();
        let handle = manager.create_instance(&spec, "shop/api:v1").await.unwrap();

        manager.destroy_instance(&handle.id, grace()).await.unwrap();
        assert_eq!(
            manager.get(&handle.id).unwrap().status,
            InstanceStatus::Terminating
        );

        // Second destroy of the same instance is a no-op.
        manager.destroy_instance(&handle.id, grace()).await.unwrap();
        // Destroy of an id that never existed is a no-op too.
        manager.destroy_instance("ghost", grace()).await.unwrap();
    }

    #[tokio::test]
    async fn terminating_counts_until_sweep_confirms() {
        let sim = SimRuntime::new();
        let mut manager = ReplicaSetManager::new("api", Arc::new(sim));
        let spec = test_spec();
        let handle = manager.create_instance(&spec, "shop/api:v1").await.unwrap();

        manager.destroy_instance(&handle.id, grace()).await.unwrap();
        assert_eq!(manager.counts().terminating, 1);
        assert_eq!(manager.counts().total(), 1);

        let removed = manager.sweep().await;
        assert_eq!(removed, vec![handle.id]);
        assert_eq!(manager.counts().total(), 0);
    }

    #[tokio::test]
    async fn sweep_marks_external_death_failed() {
        let sim = SimRuntime::new();
        let mut manager = ReplicaSetManager::new("api", Arc::new(sim.clone()));
        let spec = test_spec();
        let handle = manager.create_instance(&spec, "shop/api:v1").await.unwrap();
        manager.mark_ready(&handle.id);

        sim.kill(&handle.id).await;
        let removed = manager.sweep().await;

        assert!(removed.is_empty());
        assert_eq!(
            manager.get(&handle.id).unwrap().status,
            InstanceStatus::Failed
        );
    }

    #[tokio::test]
    async fn mark_ready_only_from_starting() {
        let sim = SimRuntime::new();
        let mut manager = ReplicaSetManager::new("api", Arc::new(sim));
        let spec = test_spec();
        let handle = manager.create_instance(&spec, "shop/api:v1").await.unwrap();

        assert!(manager.mark_ready(&handle.id));
        assert!(!manager.mark_ready(&handle.id));
        assert!(manager.mark_failed(&handle.id));
        assert!(!manager.mark_ready(&handle.id));
    }

    #[tokio::test]
    async fn counts_split_by_version() {
        let sim = SimRuntime::new();
        let mut manager = ReplicaSetManager::new("api", Arc::new(sim));
        let spec = test_spec();

        let old = manager.create_instance(&spec, "shop/api:v1").await.unwrap();
        manager.create_instance(&spec, "shop/api:v2").await.unwrap();
        manager.mark_ready(&old.id);

        assert_eq!(manager.counts_for("shop/api:v1").ready, 1);
        assert_eq!(manager.counts_for("shop/api:v2").starting, 1);
        assert_eq!(manager.counts().total(), 2);
    }

    #[tokio::test]
    async fn instances_of_lists_one_version_in_order() {
        let sim = SimRuntime::new();
        let mut manager = ReplicaSetManager::new("api", Arc::new(sim));
        let spec = test_spec();

        manager.create_instance(&spec, "shop/api:v1").await.unwrap();
        manager.create_instance(&spec, "shop/api:v2").await.unwrap();
        manager.create_instance(&spec, "shop/api:v1").await.unwrap();

        let seqs: Vec<u64> = manager.instances_of("shop/api:v1").map(|i| i.seq).collect();
        assert_eq!(seqs, vec![0, 2]);
        assert_eq!(manager.instances_of("shop/api:v3").count(), 0);
    }

    #[tokio::test]
    async fn adopt_restores_handles_and_reaps_the_dead() {
        let sim = SimRuntime::new();
        let spec = test_spec();
        let records = {
            let mut manager = ReplicaSetManager::new("api", Arc::new(sim.clone()));
            let a = manager.create_instance(&spec, "shop/api:v1").await.unwrap();
            let b = manager.create_instance(&spec, "shop/api:v1").await.unwrap();
            manager.create_instance(&spec, "shop/api:v1").await.unwrap();
            manager.mark_ready(&a.id);
            // b crashed while the controller was down.
            sim.kill(&b.id).await;
            manager.records()
        };

        let manager = ReplicaSetManager::adopt("api", Arc::new(sim), records).await;

        assert_eq!(manager.counts().total(), 3);
        assert_eq!(manager.counts().ready, 1);
        assert_eq!(manager.counts().failed, 1);
        assert_eq!(manager.counts().starting, 1);
    }

    #[tokio::test]
    async fn adopt_prunes_terminating_leftovers() {
        let sim = SimRuntime::new();
        let spec = test_spec();
        let records = {
            let mut manager = ReplicaSetManager::new("api", Arc::new(sim.clone()));
            let a = manager.create_instance(&spec, "shop/api:v1").await.unwrap();
            manager.destroy_instance(&a.id, grace()).await.unwrap();
            // Crash before the sweep: the Terminating record is persisted.
            manager.records()
        };
        assert_eq!(records.len(), 1);

        let manager = ReplicaSetManager::adopt("api", Arc::new(sim), records).await;
        assert_eq!(manager.counts().total(), 0);
        // Seq continues past the pruned record.
        assert_eq!(manager.next_seq, 1);
    }
}
