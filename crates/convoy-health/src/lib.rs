//! convoy-health — readiness probes and per-instance health records.
//!
//! Probes are deliberately three-valued: a 2xx answer is Healthy, any
//! other answer is Unhealthy, and a probe that could not run at all
//! (connection refused, timeout) is Unknown. Unknown moves no counter:
//! a flaky network must neither promote nor demote an instance.
//!
//! [`HealthMonitor`] runs one background probe task per instance and
//! collects [`HealthRecord`]s; the reconcile loop reads them once per
//! tick and applies the verdicts.

pub mod monitor;
pub mod probe;

pub use monitor::HealthMonitor;
pub use probe::{
    http_probe, HealthRecord, HealthVerdict, HttpProber, ProbeFuture, ProbeOutcome, Prober,
    FAILURE_CEILING,
};
