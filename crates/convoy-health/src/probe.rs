//! Readiness probe logic.
//!
//! Performs HTTP probes against instance endpoints and keeps consecutive
//! success/failure counters per instance.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::debug;

use convoy_state::now_ms;

/// Result of a single readiness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The endpoint answered 2xx.
    Healthy,
    /// The endpoint answered, but not with 2xx.
    Unhealthy,
    /// The probe could not run: connection refused, handshake error, or
    /// timeout. Says nothing about the instance either way.
    Unknown,
}

/// Consecutive failures past this ceiling mark an instance Failed.
///
/// Fixed, not configurable: the per-service `success_threshold` gates
/// readiness, this ceiling gates replacement.
pub const FAILURE_CEILING: u32 = 3;

/// Probe bookkeeping for one instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthRecord {
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub last_check_at: u64,
}

impl HealthRecord {
    /// Record one probe outcome.
    ///
    /// Healthy and Unhealthy reset each other's counter; Unknown moves
    /// neither.
    pub fn record(&mut self, outcome: ProbeOutcome) {
        self.last_check_at = now_ms();
        match outcome {
            ProbeOutcome::Healthy => {
                self.consecutive_failures = 0;
                self.consecutive_successes += 1;
            }
            ProbeOutcome::Unhealthy => {
                self.consecutive_successes = 0;
                self.consecutive_failures += 1;
            }
            ProbeOutcome::Unknown => {}
        }
    }

    /// Judge the record against a service's readiness threshold.
    pub fn verdict(&self, success_threshold: u32) -> HealthVerdict {
        if self.consecutive_failures > FAILURE_CEILING {
            HealthVerdict::Exceeded
        } else if self.consecutive_successes >= success_threshold {
            HealthVerdict::Ready
        } else {
            HealthVerdict::Pending
        }
    }
}

/// What the reconcile loop should do with an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthVerdict {
    /// Not enough evidence yet.
    Pending,
    /// Readiness threshold met; the instance counts toward availability.
    Ready,
    /// Failure ceiling exceeded; destroy and replace the instance.
    Exceeded,
}

/// Boxed future returned by [`Prober::probe`].
pub type ProbeFuture = Pin<Box<dyn Future<Output = ProbeOutcome> + Send>>;

/// A readiness prober.
///
/// Implementations must not borrow from the arguments in the returned
/// future.
pub trait Prober: Send + Sync {
    /// Probe `target` (`host:port`) at `path`.
    fn probe(&self, target: &str, path: &str, timeout: Duration) -> ProbeFuture;
}

/// Probes over plain HTTP/1.1.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpProber;

impl Prober for HttpProber {
    fn probe(&self, target: &str, path: &str, timeout: Duration) -> ProbeFuture {
        let target = target.to_string();
        let path = path.to_string();
        Box::pin(async move { http_probe(&target, &path, timeout).await })
    }
}

/// Perform an HTTP readiness probe against an endpoint.
///
/// Returns `Healthy` for 2xx, `Unhealthy` for any other response, and
/// `Unknown` when the connection fails or the probe times out.
pub async fn http_probe(address: &str, path: &str, timeout: Duration) -> ProbeOutcome {
    let uri = format!("http://{address}{path}");

    let result = tokio::time::timeout(timeout, async {
        let stream = match tokio::net::TcpStream::connect(address).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, %uri, "probe connection failed");
                return ProbeOutcome::Unknown;
            }
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, %uri, "probe handshake failed");
                return ProbeOutcome::Unknown;
            }
        };

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("GET")
            .uri(&uri)
            .header("host", address)
            .header("user-agent", "convoy-health/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
            .unwrap();

        match sender.send_request(req).await {
            Ok(resp) => {
                if resp.status().is_success() {
                    ProbeOutcome::Healthy
                } else {
                    debug!(status = %resp.status(), %uri, "probe non-2xx");
                    ProbeOutcome::Unhealthy
                }
            }
            Err(e) => {
                debug!(error = %e, %uri, "probe request failed");
                ProbeOutcome::Unknown
            }
        }
    })
    .await;

    match result {
        Ok(outcome) => outcome,
        Err(_) => {
            debug!(%uri, "probe timed out");
            ProbeOutcome::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_starts_pending() {
        let record = HealthRecord::default();
        assert_eq!(record.verdict(2), HealthVerdict::Pending);
        assert_eq!(record.consecutive_successes, 0);
        assert_eq!(record.consecutive_failures, 0);
    }

    #[test]
    fn ready_at_success_threshold() {
        let mut record = HealthRecord::default();
        record.record(ProbeOutcome::Healthy);
        assert_eq!(record.verdict(2), HealthVerdict::Pending);
        record.record(ProbeOutcome::Healthy);
        assert_eq!(record.verdict(2), HealthVerdict::Ready);
    }

    #[test]
    fn unhealthy_resets_success_streak() {
        let mut record = HealthRecord::default();
        record.record(ProbeOutcome::Healthy);
        record.record(ProbeOutcome::Unhealthy);
        assert_eq!(record.consecutive_successes, 0);
        assert_eq!(record.consecutive_failures, 1);
        record.record(ProbeOutcome::Healthy);
        assert_eq!(record.consecutive_failures, 0);
        assert_eq!(record.consecutive_successes, 1);
    }

    #[test]
    fn unknown_moves_no_counter() {
        let mut record = HealthRecord::default();
        record.record(ProbeOutcome::Healthy);
        record.record(ProbeOutcome::Unknown);
        record.record(ProbeOutcome::Unknown);
        assert_eq!(record.consecutive_successes, 1);
        assert_eq!(record.consecutive_failures, 0);

        // A success streak survives an Unknown gap.
        record.record(ProbeOutcome::Healthy);
        assert_eq!(record.consecutive_successes, 2);
        assert_eq!(record.verdict(2), HealthVerdict::Ready);
    }

    #[test]
    fn exceeded_past_failure_ceiling() {
        let mut record = HealthRecord::default();
        for _ in 0..FAILURE_CEILING {
            record.record(ProbeOutcome::Unhealthy);
        }
        // At the ceiling, not past it.
        assert_ne!(record.verdict(1), HealthVerdict::Exceeded);

        record.record(ProbeOutcome::Unhealthy);
        assert_eq!(record.verdict(1), HealthVerdict::Exceeded);
    }

    #[test]
    fn unknown_does_not_drive_toward_exceeded() {
        let mut record = HealthRecord::default();
        for _ in 0..20 {
            record.record(ProbeOutcome::Unknown);
        }
        assert_eq!(record.verdict(1), HealthVerdict::Pending);
    }

    #[tokio::test]
    async fn probe_to_closed_port_is_unknown() {
        // Nothing listens on port 1.
        let outcome = http_probe("127.0.0.1:1", "/healthz", Duration::from_millis(100)).await;
        assert_eq!(outcome, ProbeOutcome::Unknown);
    }
}
