//! convoy-api — REST API for Convoy.
//!
//! Provides axum route handlers for inspecting services and steering
//! rollouts. Mutating routes never touch instances directly: an image
//! update rewrites the spec for the reconciler to notice, pause and
//! resume are forwarded as commands into the running reconciler.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/services` | List all service specs |
//! | GET | `/api/v1/services/{name}` | Get one service spec |
//! | GET | `/api/v1/services/{name}/status` | Rollout/scaling/fleet status |
//! | GET | `/api/v1/services/{name}/instances` | List instance records |
//! | PUT | `/api/v1/services/{name}/image` | Set the target image |
//! | POST | `/api/v1/services/{name}/pause` | Freeze the rollout |
//! | POST | `/api/v1/services/{name}/resume` | Lift a pause |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;

use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;

use convoy_metrics::MetricPoller;
use convoy_reconcile::ReconcilerSet;
use convoy_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub reconcilers: ReconcilerSet,
    pub poller: Arc<MetricPoller>,
}

/// Build the complete API router (REST + metrics).
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/services", get(handlers::list_services))
        .route("/services/{name}", get(handlers::get_service))
        .route("/services/{name}/status", get(handlers::service_status))
        .route("/services/{name}/instances", get(handlers::list_instances))
        .route("/services/{name}/image", put(handlers::update_image))
        .route("/services/{name}/pause", post(handlers::pause_service))
        .route("/services/{name}/resume", post(handlers::resume_service))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::prometheus_metrics).with_state(state))
}
