//! convoy-autoscale — utilization-driven replica targets.
//!
//! Compares the latest utilization sample against a service's target and
//! moves `desired_replicas` on the persisted `ScalingState`. Instances are
//! never touched here; the reconcile tick consumes the new target through
//! the rollout step.
//!
//! # Scaling Algorithm
//!
//! ```text
//! percent = latest mean utilization across ready instances
//! target  = spec.target_utilization_pct
//!
//! want = ceil(desired_replicas * percent / target)
//! want = clamp(want, replicas.min, replicas.max)
//!
//! if no sample (missing or stale):      NoChange, state untouched
//! if within cooldown of last_scale_at:  NoChange (sample still recorded)
//! if want == desired_replicas:          NoChange
//! else:                                 ScaleTo(want)
//! ```
//!
//! The cooldown suppresses both directions; a burst right after a scale-up
//! waits out the window rather than thrashing.

pub mod scaler;

pub use scaler::{evaluate, ScaleDecision};
