//! convoy-rollout — surge-bounded version transitions.
//!
//! This crate provides the rollout state machine that moves a service's
//! fleet from one image version to another without breaking availability:
//! new-version instances surge in under a total-instance cap, old-version
//! instances drain only while the fleet-wide ready count stays above the
//! availability floor, and a bad image trips the rollout into a terminal
//! `Failed` phase instead of burning through replacements forever.
//!
//! # Components
//!
//! - **`fleet`** — Per-tick snapshot of the instance fleet and counting helpers
//! - **`controller`** — Rollout state machine (begin, step, pause, resume)

pub mod controller;
pub mod fleet;

pub use controller::{DestroyReason, RolloutAction, RolloutController};
pub use fleet::{FleetObservation, InstanceObservation};
