//! Rollout controller — drives the rollout state machine.
//!
//! The controller owns a persisted [`RolloutState`] and emits at most one
//! instance-mutating action per tick. During `Progressing` it surges
//! target-version instances under the total-instance cap and drains
//! superseded ones only while the fleet-wide ready count stays at or
//! above the availability floor. Settled phases converge the fleet onto
//! the current version at the desired count.

use tracing::{debug, info, warn};

use convoy_core::ServiceSpec;
use convoy_state::{now_ms, InstanceStatus, RolloutPhase, RolloutState};

use crate::fleet::FleetObservation;

/// Why an instance is being destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyReason {
    /// Health failure ceiling exceeded, or the runtime reported it dead.
    FailedHealth,
    /// Old version drained during a rollout.
    Superseded,
    /// Fleet larger than the desired count.
    ScaledDown,
}

/// One instance-mutating command for the reconcile tick to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RolloutAction {
    Create {
        version: String,
    },
    Destroy {
        instance: String,
        reason: DestroyReason,
    },
}

/// State machine over one service's [`RolloutState`].
#[derive(Debug)]
pub struct RolloutController {
    state: RolloutState,
}

impl RolloutController {
    pub fn new(state: RolloutState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &RolloutState {
        &self.state
    }

    pub fn phase(&self) -> RolloutPhase {
        self.state.phase
    }

    /// The version the controller is converging toward.
    pub fn effective_version(&self) -> &str {
        self.state
            .target_version
            .as_deref()
            .unwrap_or(&self.state.current_version)
    }

    /// Retarget the rollout at a new image.
    ///
    /// A no-op (returns false) when `new_image` already is the effective
    /// version; re-submitting the image of a `Failed` rollout does not
    /// restart it. Any other image enters `Progressing`
    /// with fresh attempt counters; while `Paused` the new target is
    /// recorded but the freeze holds until `resume`.
    pub fn begin(&mut self, new_image: &str) -> bool {
        if self.effective_version() == new_image {
            return false;
        }

        info!(
            service = %self.state.service,
            source = %self.state.current_version,
            image = %new_image,
            "rollout starting"
        );
        self.state.target_version = Some(new_image.to_string());
        self.state.target_attempted = 0;
        self.state.target_failed = 0;
        if self.state.phase != RolloutPhase::Paused {
            self.state.phase = RolloutPhase::Progressing;
        }
        self.state.updated_at = now_ms();
        true
    }

    /// Freeze all instance-mutating actions. Health checks keep running
    /// elsewhere. No-op once `Failed`.
    pub fn pause(&mut self) {
        if matches!(self.state.phase, RolloutPhase::Paused | RolloutPhase::Failed) {
            return;
        }
        info!(service = %self.state.service, "rollout paused");
        self.state.phase = RolloutPhase::Paused;
        self.state.updated_at = now_ms();
    }

    /// Lift a pause: back to `Progressing` when a rollout is in flight,
    /// otherwise `Idle`.
    pub fn resume(&mut self) {
        if self.state.phase != RolloutPhase::Paused {
            return;
        }
        info!(service = %self.state.service, "rollout resumed");
        self.state.phase = if self.state.target_version.is_some() {
            RolloutPhase::Progressing
        } else {
            RolloutPhase::Idle
        };
        self.state.updated_at = now_ms();
    }

    /// Advance by at most one action, given the fleet as observed this
    /// tick and the desired replica count.
    pub fn step(
        &mut self,
        spec: &ServiceSpec,
        observation: &FleetObservation,
        desired: u32,
    ) -> Option<RolloutAction> {
        match self.state.phase {
            RolloutPhase::Paused | RolloutPhase::Failed => None,
            RolloutPhase::Idle | RolloutPhase::Succeeded => self.step_settled(observation, desired),
            RolloutPhase::Progressing => self.step_progressing(spec, observation, desired),
        }
    }

    /// Steady-state convergence on `current_version`.
    fn step_settled(&mut self, obs: &FleetObservation, desired: u32) -> Option<RolloutAction> {
        if self.state.phase == RolloutPhase::Succeeded {
            // Success stays observable for one tick, then the label flattens.
            self.state.phase = RolloutPhase::Idle;
            self.state.updated_at = now_ms();
        }

        if let Some(victim) = obs.oldest_failed() {
            debug!(
                service = %self.state.service,
                instance = %victim.id,
                "replacing failed instance"
            );
            return Some(RolloutAction::Destroy {
                instance: victim.id.clone(),
                reason: DestroyReason::FailedHealth,
            });
        }

        if obs.total_all() < desired {
            return Some(RolloutAction::Create {
                version: self.state.current_version.clone(),
            });
        }

        if obs.total_all() > desired {
            // Prefer not-yet-ready victims, then stale versions, then the
            // newest instance; the oldest ready ones are the most proven.
            let victim = obs
                .instances()
                .iter()
                .filter(|i| {
                    matches!(i.status, InstanceStatus::Starting | InstanceStatus::Ready)
                })
                .max_by_key(|i| {
                    (
                        i.status != InstanceStatus::Ready,
                        i.version != self.state.current_version,
                        i.seq,
                    )
                })?;
            return Some(RolloutAction::Destroy {
                instance: victim.id.clone(),
                reason: DestroyReason::ScaledDown,
            });
        }

        None
    }

    /// One `Progressing` tick: drain failed, surge target, drain source,
    /// settle.
    fn step_progressing(
        &mut self,
        spec: &ServiceSpec,
        obs: &FleetObservation,
        desired: u32,
    ) -> Option<RolloutAction> {
        let Some(target) = self.state.target_version.clone() else {
            // Progressing without a target is a stale record; settle it.
            self.state.phase = RolloutPhase::Idle;
            self.state.updated_at = now_ms();
            return None;
        };
        let max_instances = spec.max_instances(desired);
        let min_healthy = spec.min_healthy(desired);

        // 1. Failed instances drain before anything else. A failed target
        //    counts against the image; too many and the rollout is over.
        if let Some(victim) = obs.oldest_failed() {
            if victim.version == target {
                self.state.target_failed += 1;
                self.state.updated_at = now_ms();
                if self.state.target_attempted > 0
                    && 3 * self.state.target_failed > self.state.target_attempted
                {
                    warn!(
                        service = %self.state.service,
                        image = %target,
                        failed = self.state.target_failed,
                        attempted = self.state.target_attempted,
                        "too many target failures, rollout failed"
                    );
                    self.state.phase = RolloutPhase::Failed;
                }
            }
            return Some(RolloutAction::Destroy {
                instance: victim.id.clone(),
                reason: DestroyReason::FailedHealth,
            });
        }

        // 2. Surge one target instance inside both bounds.
        if obs.total(&target) < desired && obs.total_all() < max_instances {
            self.state.target_attempted += 1;
            self.state.updated_at = now_ms();
            debug!(
                service = %self.state.service,
                image = %target,
                attempt = self.state.target_attempted,
                "surging target instance"
            );
            return Some(RolloutAction::Create { version: target });
        }

        // 3. Drain the oldest superseded instance the availability floor
        //    allows. Removing a non-ready instance never lowers the floor.
        if obs.total_excluding(&target) > 0 {
            if let Some(victim) = obs.oldest_active_excluding(&target) {
                let ready_after = if victim.status == InstanceStatus::Ready {
                    obs.ready_all().saturating_sub(1)
                } else {
                    obs.ready_all()
                };
                if ready_after >= min_healthy {
                    debug!(
                        service = %self.state.service,
                        instance = %victim.id,
                        version = %victim.version,
                        "draining superseded instance"
                    );
                    return Some(RolloutAction::Destroy {
                        instance: victim.id.clone(),
                        reason: DestroyReason::Superseded,
                    });
                }
            }
            return None;
        }

        // 4. Only target instances remain; settle once they are all ready.
        if obs.ready(&target) >= desired {
            info!(
                service = %self.state.service,
                image = %target,
                attempted = self.state.target_attempted,
                failed = self.state.target_failed,
                "rollout succeeded"
            );
            self.state.current_version = target;
            self.state.target_version = None;
            self.state.phase = RolloutPhase::Succeeded;
            self.state.updated_at = now_ms();
        }
        None
    }
}
