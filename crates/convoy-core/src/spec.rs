//! Validated service specifications shared across Convoy crates.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Desired state for one service, produced by config validation.
///
/// A spec is immutable between edits; the reconcile loop compares the stored
/// spec against live state every tick. Changing `image` is what starts a
/// rollout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    /// Canonical image reference (tag always present).
    pub image: String,
    pub port: u16,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub replicas: ReplicaBounds,
    /// Utilization the autoscaler steers toward, in percent.
    pub target_utilization_pct: f64,
    pub limits: RolloutLimits,
    pub readiness: ReadinessPolicy,
    pub termination_grace_secs: u64,
    pub scale_cooldown_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaBounds {
    pub min: u32,
    pub max: u32,
}

/// Rolling-update headroom. At least one of the two must be nonzero or the
/// rollout could never make progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutLimits {
    /// Extra instances allowed above the desired count while updating.
    pub max_surge: u32,
    /// Ready instances the update may dip below the desired count.
    pub max_unavailable: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessPolicy {
    /// Probe endpoint path, e.g. `/healthz`.
    pub path: String,
    pub initial_delay_ms: u64,
    pub period_ms: u64,
    pub timeout_ms: u64,
    /// Consecutive successes before an instance counts as Ready.
    pub success_threshold: u32,
}

impl ServiceSpec {
    /// Ceiling on live instances during a rollout.
    pub fn max_instances(&self, desired: u32) -> u32 {
        desired + self.limits.max_surge
    }

    /// Floor on ready instances during a rollout.
    pub fn min_healthy(&self, desired: u32) -> u32 {
        desired.saturating_sub(self.limits.max_unavailable)
    }
}
