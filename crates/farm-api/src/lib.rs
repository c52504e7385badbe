//! farm-api — REST control surface for the server farm.
//!
//! Every handler validates its input against the [`Registry`] before any
//! request leaves the control plane, then delegates to the aggregator, the
//! load-test driver or the container runtime. Responses use the
//! `{success, data, error}` envelope; aggregate endpoints always return a
//! well-formed report, even when no instance answers.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/` | Control plane info |
//! | GET | `/api/servers` | List instances with status |
//! | GET | `/api/servers/{id}` | One instance with its metrics reply |
//! | POST | `/api/servers/{id}/action` | Start, stop or restart the container |
//! | GET | `/api/health` | Health poll across the farm |
//! | GET | `/api/metrics` | Metrics poll across the farm |
//! | POST | `/api/load-test` | Run a load test |
//! | POST | `/api/simulate-load` | Ask instances to burn CPU and memory |
//! | POST | `/api/broadcast?endpoint=` | GET one path on every instance |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use farm_core::config::LoadTestConfig;
use farm_core::{ConcurrencyPolicy, Registry, Timeouts};
use farm_docker::ContainerControl;
use farm_health::Aggregator;
use farm_loadtest::LoadTester;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<Registry>,
    pub aggregator: Aggregator,
    pub load_tester: LoadTester,
    /// `None` when no container runtime could be reached.
    pub containers: Option<Arc<dyn ContainerControl>>,
    /// Policy for load tests that do not name one.
    pub default_policy: ConcurrencyPolicy,
    /// Flips to `true` on shutdown; running load tests stop early.
    pub shutdown: watch::Receiver<bool>,
}

impl ApiState {
    pub fn new(
        registry: Registry,
        timeouts: Timeouts,
        load_test: &LoadTestConfig,
        containers: Option<Arc<dyn ContainerControl>>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            aggregator: Aggregator::new(timeouts),
            load_tester: LoadTester::new(timeouts.load_test, load_test.max_requests_per_target),
            containers,
            default_policy: load_test.policy,
            shutdown,
        }
    }

    pub fn timeouts(&self) -> &Timeouts {
        self.aggregator.timeouts()
    }
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/servers", get(handlers::list_servers))
        .route("/servers/{id}", get(handlers::get_server))
        .route("/servers/{id}/action", post(handlers::server_action))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/load-test", post(handlers::load_test))
        .route("/simulate-load", post(handlers::simulate_load))
        .route("/broadcast", post(handlers::broadcast));

    Router::new()
        .route("/", get(handlers::info))
        .nest("/api", api_routes)
        .route("/metrics", get(handlers::prometheus_metrics))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
