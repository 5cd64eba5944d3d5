//! Utilization sources.
//!
//! A [`MetricSource`] turns a service's ready instances into one
//! aggregated utilization reading. The HTTP source scrapes a JSON stats
//! endpoint on each instance and averages the values; the static source
//! serves scripted readings for tests and the simulated runtime.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use convoy_state::now_ms;

/// Per-instance budget for one stats scrape.
pub const SAMPLE_TIMEOUT: Duration = Duration::from_secs(2);

/// Path instances serve their stats payload on.
pub const DEFAULT_STATS_PATH: &str = "/stats";

/// Why a sample attempt produced no reading.
#[derive(Debug, Error)]
pub enum MetricError {
    #[error("metric endpoint unreachable: {0}")]
    Unreachable(String),
    #[error("metric payload rejected: {0}")]
    BadPayload(String),
    #[error("metric sample timed out")]
    Timeout,
}

pub type MetricResult<T> = Result<T, MetricError>;

/// One aggregated utilization reading for a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilizationSample {
    pub service: String,
    /// Mean utilization across the sampled instances, in percent.
    pub percent: f64,
    /// When the sample was taken (epoch milliseconds).
    pub at: u64,
}

/// Wire payload instances serve at the stats path.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StatsPayload {
    pub utilization_pct: f64,
}

/// Boxed future returned by [`MetricSource::sample`].
pub type MetricFuture = Pin<Box<dyn Future<Output = MetricResult<UtilizationSample>> + Send>>;

/// Supplies utilization readings for a service.
///
/// `addresses` are the serving addresses of the service's ready
/// instances; sources that query an external system may ignore them.
/// Implementations must not borrow from the arguments in the returned
/// future.
pub trait MetricSource: Send + Sync {
    fn sample(&self, service: &str, addresses: &[String]) -> MetricFuture;
}

/// Scrapes each instance's stats endpoint over plain HTTP/1.1.
#[derive(Debug, Clone)]
pub struct HttpMetricSource {
    path: String,
    timeout: Duration,
}

impl HttpMetricSource {
    pub fn new(path: &str, timeout: Duration) -> Self {
        Self {
            path: path.to_string(),
            timeout,
        }
    }
}

impl Default for HttpMetricSource {
    fn default() -> Self {
        Self::new(DEFAULT_STATS_PATH, SAMPLE_TIMEOUT)
    }
}

impl MetricSource for HttpMetricSource {
    fn sample(&self, service: &str, addresses: &[String]) -> MetricFuture {
        let service = service.to_string();
        let addresses = addresses.to_vec();
        let path = self.path.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            if addresses.is_empty() {
                return Err(MetricError::Unreachable("no ready instances".to_string()));
            }

            let mut values = Vec::new();
            let mut first_err = None;
            for address in &addresses {
                match tokio::time::timeout(timeout, fetch_value(address, &path)).await {
                    Ok(Ok(value)) => values.push(value),
                    Ok(Err(e)) => {
                        debug!(%address, error = %e, "stats scrape failed");
                        first_err.get_or_insert(e);
                    }
                    Err(_) => {
                        debug!(%address, "stats scrape timed out");
                        first_err.get_or_insert(MetricError::Timeout);
                    }
                }
            }

            if values.is_empty() {
                return Err(
                    first_err.unwrap_or(MetricError::Unreachable("no ready instances".to_string()))
                );
            }
            let percent = values.iter().sum::<f64>() / values.len() as f64;
            Ok(UtilizationSample {
                service,
                percent,
                at: now_ms(),
            })
        })
    }
}

/// Scrape one instance's stats endpoint.
async fn fetch_value(address: &str, path: &str) -> MetricResult<f64> {
    let uri = format!("http://{address}{path}");

    let stream = tokio::net::TcpStream::connect(address)
        .await
        .map_err(|e| MetricError::Unreachable(format!("{address}: {e}")))?;

    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| MetricError::Unreachable(format!("{address}: {e}")))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let req = http::Request::builder()
        .method("GET")
        .uri(&uri)
        .header("host", address)
        .header("user-agent", "convoy-metrics/0.1")
        .body(Empty::<Bytes>::new())
        .map_err(|e| MetricError::BadPayload(e.to_string()))?;

    let response = sender
        .send_request(req)
        .await
        .map_err(|e| MetricError::Unreachable(format!("{address}: {e}")))?;

    if !response.status().is_success() {
        return Err(MetricError::BadPayload(format!(
            "{address}: status {}",
            response.status()
        )));
    }

    let body = response
        .into_body()
        .collect()
        .await
        .map_err(|e| MetricError::BadPayload(e.to_string()))?
        .to_bytes();
    let payload: StatsPayload = serde_json::from_slice(&body)
        .map_err(|e| MetricError::BadPayload(format!("{address}: {e}")))?;
    Ok(payload.utilization_pct)
}

/// Scripted utilization source for tests and simulated runs.
#[derive(Clone, Default)]
pub struct StaticSource {
    levels: Arc<Mutex<HashMap<String, f64>>>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the reading for a service.
    pub async fn set(&self, service: &str, percent: f64) {
        self.levels.lock().await.insert(service.to_string(), percent);
    }

    /// Remove the reading so the next sample misses.
    pub async fn clear(&self, service: &str) {
        self.levels.lock().await.remove(service);
    }
}

impl MetricSource for StaticSource {
    fn sample(&self, service: &str, _addresses: &[String]) -> MetricFuture {
        let levels = Arc::clone(&self.levels);
        let service = service.to_string();
        Box::pin(async move {
            let levels = levels.lock().await;
            match levels.get(&service) {
                Some(percent) => Ok(UtilizationSample {
                    percent: *percent,
                    at: now_ms(),
                    service,
                }),
                None => Err(MetricError::Unreachable("no reading".to_string())),
            }
        })
    }
}
