//! Scaling evaluation.
//!
//! A pure function over the persisted [`ScalingState`]: the cooldown
//! clock and the current replica target live in the store, so a restart
//! resumes suppression windows instead of resetting them.

use tracing::{debug, warn};

use convoy_core::ServiceSpec;
use convoy_metrics::UtilizationSample;
use convoy_state::ScalingState;

/// A scaling decision for a single service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Move `desired_replicas` to the given count.
    ScaleTo(u32),
    /// No change needed.
    NoChange,
}

/// Evaluate one service against its latest utilization sample.
///
/// `sample` is `None` when the poller has nothing fresh; the current
/// scale holds and `state` is left untouched. On a decision the state's
/// `desired_replicas` and `last_scale_at` are updated in place; the
/// caller persists.
pub fn evaluate(
    spec: &ServiceSpec,
    state: &mut ScalingState,
    sample: Option<&UtilizationSample>,
    now: u64,
) -> ScaleDecision {
    let Some(sample) = sample else {
        debug!(service = %spec.name, "no utilization sample, holding scale");
        return ScaleDecision::NoChange;
    };

    if !sample.percent.is_finite() {
        warn!(service = %spec.name, percent = sample.percent, "unusable utilization sample");
        return ScaleDecision::NoChange;
    }

    state.last_observed_utilization = Some(sample.percent);
    state.updated_at = now;

    let current = state.desired_replicas;
    let ratio = sample.percent / spec.target_utilization_pct;
    let want = ((current as f64) * ratio).ceil() as u32;
    let clamped = want.clamp(spec.replicas.min, spec.replicas.max);

    if clamped == current {
        return ScaleDecision::NoChange;
    }

    // last_scale_at == 0 means never scaled; no window to wait out.
    let since_last = now.saturating_sub(state.last_scale_at);
    if state.last_scale_at > 0 && since_last < spec.scale_cooldown_ms {
        debug!(
            service = %spec.name,
            from = current,
            held = clamped,
            remaining_ms = spec.scale_cooldown_ms - since_last,
            "scale change suppressed by cooldown"
        );
        return ScaleDecision::NoChange;
    }

    debug!(
        service = %spec.name,
        from = current,
        to = clamped,
        percent = sample.percent,
        target = spec.target_utilization_pct,
        "scaling"
    );
    state.desired_replicas = clamped;
    state.last_scale_at = now;
    ScaleDecision::ScaleTo(clamped)
}
