//! Periodic utilization sampling with a staleness-aware cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use convoy_state::{now_ms, InstanceStatus, StateResult, StateStore};

use crate::source::{MetricSource, UtilizationSample};

/// Samples every known service on a fixed interval and caches the latest
/// reading.
///
/// The reconcile tick reads through [`MetricPoller::latest`], which hides
/// readings older than the staleness bound; the autoscaler treats the
/// miss as "no sample" and holds the current scale.
pub struct MetricPoller {
    store: StateStore,
    source: Arc<dyn MetricSource>,
    cache: Arc<RwLock<HashMap<String, UtilizationSample>>>,
    interval: Duration,
    staleness: Duration,
}

impl MetricPoller {
    pub fn new(
        store: StateStore,
        source: Arc<dyn MetricSource>,
        interval: Duration,
        staleness: Duration,
    ) -> Self {
        Self {
            store,
            source,
            cache: Arc::new(RwLock::new(HashMap::new())),
            interval,
            staleness,
        }
    }

    /// Sample every service in the store once.
    ///
    /// Only ready instances are scraped. A failed sample leaves the
    /// previous cache entry in place; staleness filtering in
    /// [`MetricPoller::latest`] retires it.
    pub async fn poll_once(&self) -> StateResult<()> {
        let specs = self.store.list_specs()?;
        for spec in specs {
            let instances = self.store.list_instances_for_service(&spec.name)?;
            let addresses: Vec<String> = instances
                .iter()
                .filter(|record| record.status == InstanceStatus::Ready)
                .map(|record| record.address.clone())
                .collect();

            match self.source.sample(&spec.name, &addresses).await {
                Ok(sample) => {
                    debug!(
                        service = %spec.name,
                        percent = sample.percent,
                        "utilization sampled"
                    );
                    self.cache.write().await.insert(spec.name.clone(), sample);
                }
                Err(e) => {
                    debug!(service = %spec.name, error = %e, "utilization sample missed");
                }
            }
        }
        Ok(())
    }

    /// Latest reading for a service, or `None` when absent or stale.
    pub async fn latest(&self, service: &str) -> Option<UtilizationSample> {
        let cache = self.cache.read().await;
        let sample = cache.get(service)?;
        if now_ms().saturating_sub(sample.at) > self.staleness.as_millis() as u64 {
            return None;
        }
        Some(sample.clone())
    }

    /// Drop a service's cached reading (when the service is removed).
    pub async fn forget(&self, service: &str) {
        self.cache.write().await.remove(service);
    }

    /// Run the poll loop until shutdown signal.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            "metric poller started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.poll_once().await {
                        warn!(error = %e, "metric poll failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("metric poller shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::StaticSource;
    use convoy_core::{ReadinessPolicy, ReplicaBounds, RolloutLimits, ServiceSpec};
    use convoy_state::InstanceRecord;

    fn test_spec(name: &str) -> ServiceSpec {
        ServiceSpec {
            name: name.to_string(),
            image: "shop/api:v1".to_string(),
            port: 8080,
            env: HashMap::new(),
            replicas: ReplicaBounds { min: 1, max: 10 },
            target_utilization_pct: 80.0,
            limits: RolloutLimits {
                max_surge: 1,
                max_unavailable: 0,
            },
            readiness: ReadinessPolicy {
                path: "/healthz".to_string(),
                initial_delay_ms: 2000,
                period_ms: 5000,
                timeout_ms: 2000,
                success_threshold: 2,
            },
            termination_grace_secs: 10,
            scale_cooldown_ms: 60_000,
        }
    }

    fn test_instance(service: &str, seq: u64, status: InstanceStatus) -> InstanceRecord {
        InstanceRecord {
            id: format!("{service}-abcd1234-{seq}"),
            service: service.to_string(),
            version: "shop/api:v1".to_string(),
            address: format!("127.0.0.1:{}", 9000 + seq),
            status,
            seq,
            created_at: 1000,
            updated_at: 1000,
        }
    }

    fn test_poller(source: StaticSource, staleness: Duration) -> (MetricPoller, StateStore) {
        let store = StateStore::open_in_memory().unwrap();
        let poller = MetricPoller::new(
            store.clone(),
            Arc::new(source),
            Duration::from_secs(15),
            staleness,
        );
        (poller, store)
    }

    #[tokio::test]
    async fn poll_caches_a_sample() {
        let source = StaticSource::new();
        source.set("api", 85.0).await;
        let (poller, store) = test_poller(source, Duration::from_secs(60));
        store.put_spec(&test_spec("api")).unwrap();

        poller.poll_once().await.unwrap();

        let sample = poller.latest("api").await.unwrap();
        assert!((sample.percent - 85.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn missed_sample_leaves_no_reading() {
        let (poller, store) = test_poller(StaticSource::new(), Duration::from_secs(60));
        store.put_spec(&test_spec("api")).unwrap();

        poller.poll_once().await.unwrap();

        assert!(poller.latest("api").await.is_none());
    }

    #[tokio::test]
    async fn stale_reading_is_hidden() {
        let source = StaticSource::new();
        source.set("api", 85.0).await;
        let (poller, store) = test_poller(source.clone(), Duration::from_millis(20));
        store.put_spec(&test_spec("api")).unwrap();

        poller.poll_once().await.unwrap();
        assert!(poller.latest("api").await.is_some());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(poller.latest("api").await.is_none());
    }

    #[tokio::test]
    async fn miss_keeps_the_previous_reading_until_stale() {
        let source = StaticSource::new();
        source.set("api", 85.0).await;
        let (poller, store) = test_poller(source.clone(), Duration::from_secs(60));
        store.put_spec(&test_spec("api")).unwrap();

        poller.poll_once().await.unwrap();
        source.clear("api").await;
        poller.poll_once().await.unwrap();

        // Last good reading survives a miss.
        assert!(poller.latest("api").await.is_some());
    }

    #[tokio::test]
    async fn forget_drops_the_reading() {
        let source = StaticSource::new();
        source.set("api", 85.0).await;
        let (poller, store) = test_poller(source, Duration::from_secs(60));
        store.put_spec(&test_spec("api")).unwrap();

        poller.poll_once().await.unwrap();
        poller.forget("api").await;

        assert!(poller.latest("api").await.is_none());
    }

    #[tokio::test]
    async fn only_ready_instances_are_offered_to_the_source() {
        use crate::source::{MetricError, MetricFuture, MetricSource};
        use tokio::sync::Mutex;

        // Captures the addresses it is offered.
        struct RecordingSource {
            seen: Arc<Mutex<Vec<String>>>,
        }

        impl MetricSource for RecordingSource {
            fn sample(&self, _service: &str, addresses: &[String]) -> MetricFuture {
                let seen = Arc::clone(&self.seen);
                let addresses = addresses.to_vec();
                Box::pin(async move {
                    seen.lock().await.extend(addresses);
                    Err(MetricError::Unreachable("recording only".to_string()))
                })
            }
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let store = StateStore::open_in_memory().unwrap();
        let poller = MetricPoller::new(
            store.clone(),
            Arc::new(RecordingSource {
                seen: Arc::clone(&seen),
            }),
            Duration::from_secs(15),
            Duration::from_secs(60),
        );

        store.put_spec(&test_spec("api")).unwrap();
        store
            .put_instance(&test_instance("api", 0, InstanceStatus::Ready))
            .unwrap();
        store
            .put_instance(&test_instance("api", 1, InstanceStatus::Starting))
            .unwrap();
        store
            .put_instance(&test_instance("api", 2, InstanceStatus::Failed))
            .unwrap();

        poller.poll_once().await.unwrap();

        let seen = seen.lock().await;
        assert_eq!(seen.as_slice(), &["127.0.0.1:9000".to_string()]);
    }
}
