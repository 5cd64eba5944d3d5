//! convoy-reconcile — the control loop that converges services.
//!
//! One [`Reconciler`] per service folds health verdicts, utilization
//! samples, and the rollout state machine into at most one instance
//! mutation per tick. The [`ReconcilerSet`] supervises those tasks and
//! routes pause/resume commands from the API into them.
//!
//! ```text
//!  ReconcilerSet
//!    ├── Reconciler("api")     tick → sweep → probe verdicts → scale →
//!    ├── Reconciler("worker")         rollout step → apply → persist
//!    └── Reconciler("jobs")
//! ```

pub mod error;
pub mod reconciler;
pub mod supervisor;

pub use error::{ReconcileError, ReconcileResult};
pub use reconciler::{ControlCommand, Reconciler, MAX_BACKOFF};
pub use supervisor::ReconcilerSet;
