//! Domain types for the Convoy state store.
//!
//! These types represent the persisted control-loop state: where each
//! service's rollout stands, what the autoscaler last decided, and which
//! instances were alive at the last tick. All types are serializable
//! to/from JSON for storage in redb tables.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Unique identifier for a service.
pub type ServiceName = String;

/// Unique identifier for an instance within a service.
pub type InstanceId = String;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ── Rollout ───────────────────────────────────────────────────────

/// Phase of a service's rollout state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutPhase {
    /// No rollout has run yet; the fleet converges on `current_version`.
    Idle,
    /// Actively replacing `current_version` with `target_version`.
    Progressing,
    /// Frozen by an operator; no instances are created or destroyed.
    Paused,
    /// The last rollout completed; the fleet converges on `current_version`.
    Succeeded,
    /// The last rollout gave up; no new instances are created until the
    /// image changes again.
    Failed,
}

impl RolloutPhase {
    /// True while a rollout is in flight (possibly paused).
    pub fn is_active(&self) -> bool {
        matches!(self, RolloutPhase::Progressing | RolloutPhase::Paused)
    }

    /// True in the resting phases where steady-state convergence runs.
    pub fn is_settled(&self) -> bool {
        matches!(self, RolloutPhase::Idle | RolloutPhase::Succeeded)
    }
}

/// Persisted rollout state for one service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RolloutState {
    pub service: ServiceName,
    /// The established version: the only version when settled, the one
    /// being replaced while progressing.
    pub current_version: String,
    /// The version being rolled out, present only while active or failed.
    pub target_version: Option<String>,
    pub phase: RolloutPhase,
    /// Target instances created during the active rollout.
    pub target_attempted: u32,
    /// Target instances that failed health checks during the active rollout.
    pub target_failed: u32,
    pub updated_at: u64,
}

impl RolloutState {
    pub fn new(service: &str, version: &str) -> Self {
        RolloutState {
            service: service.to_string(),
            current_version: version.to_string(),
            target_version: None,
            phase: RolloutPhase::Idle,
            target_attempted: 0,
            target_failed: 0,
            updated_at: now_ms(),
        }
    }

    /// Build the key for the rollouts table.
    pub fn table_key(&self) -> String {
        self.service.clone()
    }
}

// ── Scaling ───────────────────────────────────────────────────────

/// Persisted autoscaler state for one service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingState {
    pub service: ServiceName,
    /// Replica count the reconcile loop currently steers toward.
    pub desired_replicas: u32,
    /// Most recent non-stale utilization sample, in percent.
    pub last_observed_utilization: Option<f64>,
    /// When the desired count last changed (ms epoch, 0 = never).
    pub last_scale_at: u64,
    pub updated_at: u64,
}

impl ScalingState {
    pub fn new(service: &str, desired_replicas: u32) -> Self {
        ScalingState {
            service: service.to_string(),
            desired_replicas,
            last_observed_utilization: None,
            last_scale_at: 0,
            updated_at: now_ms(),
        }
    }

    /// Build the key for the scaling table.
    pub fn table_key(&self) -> String {
        self.service.clone()
    }
}

// ── Instances ─────────────────────────────────────────────────────

/// Lifecycle status of a service instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Created but not yet past its readiness threshold.
    Starting,
    /// Passed readiness; counted toward availability.
    Ready,
    /// Destroy issued; still occupying capacity until the runtime
    /// confirms it is gone.
    Terminating,
    /// Health checks exceeded the failure ceiling, or the runtime
    /// reported the instance dead.
    Failed,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Starting => "starting",
            InstanceStatus::Ready => "ready",
            InstanceStatus::Terminating => "terminating",
            InstanceStatus::Failed => "failed",
        }
    }
}

/// Snapshot of one live instance, persisted each tick for crash recovery
/// and the status API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceRecord {
    pub id: InstanceId,
    pub service: ServiceName,
    /// Canonical image reference this instance runs.
    pub version: String,
    /// Probe address (`host:port`).
    pub address: String,
    pub status: InstanceStatus,
    /// Monotonic creation sequence within the service; orders replacement
    /// decisions deterministically.
    pub seq: u64,
    pub created_at: u64,
    pub updated_at: u64,
}

impl InstanceRecord {
    /// Build the composite key for the instances table.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.service, self.id)
    }
}
