//! Daemon run mode — assembles the full control plane.
//!
//! In this mode, the daemon:
//! 1. Loads and validates the fleet configuration
//! 2. Opens the state store and syncs the configured specs into it
//! 3. Adopts any instances recorded by a previous run
//! 4. Spawns one reconciler per service plus the utilization poller
//! 5. Serves the REST API until Ctrl-C, then drains everything

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};

use convoy_api::{ApiState, build_router};
use convoy_core::{ConvoyConfig, ServiceSpec};
use convoy_health::{HealthMonitor, HttpProber};
use convoy_metrics::{HttpMetricSource, MetricPoller};
use convoy_reconcile::{Reconciler, ReconcilerSet};
use convoy_runtime::{HttpRuntime, ReplicaSetManager, RuntimeClient, SimRuntime};
use convoy_state::StateStore;

/// Which backend provisions instances.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum RuntimeKind {
    /// In-process simulated runtime, for demos and tests.
    Sim,
    /// Remote agent speaking the instance HTTP protocol.
    Http,
}

pub struct RunOptions {
    pub config: PathBuf,
    pub data_dir: PathBuf,
    pub listen: String,
    pub tick_interval: Duration,
    pub metric_interval: Duration,
    pub runtime: RuntimeKind,
    pub runtime_url: Option<String>,
}

/// Run the daemon until a shutdown signal arrives.
pub async fn run(options: RunOptions) -> anyhow::Result<()> {
    info!("Convoy daemon starting");

    let specs = ConvoyConfig::from_file(&options.config)?.build_all()?;
    info!(
        config = %options.config.display(),
        services = specs.len(),
        "configuration loaded"
    );

    // ── State store ──────────────────────────────────────────────
    std::fs::create_dir_all(&options.data_dir)?;
    let db_path = options.data_dir.join("convoy.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    sync_specs(&store, &specs)?;

    // ── Instance runtime ─────────────────────────────────────────
    let runtime: Arc<dyn RuntimeClient> = match options.runtime {
        RuntimeKind::Sim => {
            info!("using simulated runtime");
            Arc::new(SimRuntime::new())
        }
        RuntimeKind::Http => {
            let agent = options
                .runtime_url
                .as_deref()
                .context("--runtime-url is required with --runtime http")?;
            info!(agent = %agent, "using http runtime");
            Arc::new(HttpRuntime::new(agent))
        }
    };

    // ── Utilization poller ───────────────────────────────────────
    // Samples older than three scrape intervals are treated as stale.
    let poller = Arc::new(MetricPoller::new(
        store.clone(),
        Arc::new(HttpMetricSource::default()),
        options.metric_interval,
        options.metric_interval * 3,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let poller_handle = {
        let poller = Arc::clone(&poller);
        let poller_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            poller.run(poller_shutdown).await;
        })
    };

    // ── Reconcilers ──────────────────────────────────────────────
    let reconcilers = ReconcilerSet::new();
    for spec in specs {
        let records = store.list_instances_for_service(&spec.name)?;
        let manager = ReplicaSetManager::adopt(&spec.name, Arc::clone(&runtime), records).await;
        let monitor = HealthMonitor::new(Arc::new(HttpProber));
        let reconciler = Reconciler::new(
            spec,
            store.clone(),
            manager,
            monitor,
            Arc::clone(&poller),
            options.tick_interval,
        )?;
        reconcilers.spawn(reconciler).await;
    }

    // ── REST API server ──────────────────────────────────────────
    let router = build_router(ApiState {
        store: store.clone(),
        reconcilers: reconcilers.clone(),
        poller,
    });

    let addr: SocketAddr = options
        .listen
        .parse()
        .with_context(|| format!("invalid listen address {:?}", options.listen))?;
    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Drain reconcilers before the poller so final ticks can still persist.
    reconcilers.shutdown_all().await;
    let _ = poller_handle.await;

    info!("Convoy daemon stopped");
    Ok(())
}

/// Persist configured specs and drop state for services no longer configured.
fn sync_specs(store: &StateStore, specs: &[ServiceSpec]) -> anyhow::Result<()> {
    let configured: HashSet<&str> = specs.iter().map(|s| s.name.as_str()).collect();

    for stale in store.list_specs()? {
        if configured.contains(stale.name.as_str()) {
            continue;
        }
        warn!(service = %stale.name, "service removed from config, dropping its state");
        store.delete_spec(&stale.name)?;
        store.delete_rollout(&stale.name)?;
        store.delete_scaling(&stale.name)?;
        let dropped = store.delete_instances_for_service(&stale.name)?;
        if dropped > 0 {
            warn!(
                service = %stale.name,
                instances = dropped,
                "dropped instance records; any live instances must be stopped in the runtime"
            );
        }
    }

    for spec in specs {
        store.put_spec(spec)?;
    }
    Ok(())
}
