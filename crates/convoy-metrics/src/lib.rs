//! convoy-metrics — utilization signals for the autoscaler.
//!
//! Samples per-instance stats endpoints, caches the latest reading per
//! service behind a staleness bound, and renders controller state in the
//! Prometheus text exposition format.
//!
//! # Architecture
//!
//! ```text
//! MetricPoller
//!   ├── poll_once() ← samples every service through a MetricSource
//!   ├── latest()    → staleness-checked reading for the reconcile tick
//!   └── run()       → periodic poll loop
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics
//! ```

pub mod poller;
pub mod prometheus;
pub mod source;

pub use poller::MetricPoller;
pub use prometheus::{render_prometheus, ServiceMetrics};
pub use source::{
    HttpMetricSource, MetricError, MetricFuture, MetricResult, MetricSource, StaticSource,
    StatsPayload, UtilizationSample, DEFAULT_STATS_PATH, SAMPLE_TIMEOUT,
};
