//! farm-instance — the HTTP endpoint every farm member runs.
//!
//! Each instance reports its own health and host usage, counts the
//! requests it serves and offers a few endpoints for exercising the
//! control plane (slow replies, chosen error codes, sized payloads and
//! synthetic CPU/memory load).
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/` | Identity, uptime, request counter |
//! | GET | `/health` | `healthy` or `degraded`, with CPU/memory usage |
//! | GET | `/metrics` | Request counters, CPU, memory, disk, network |
//! | POST | `/simulate-load` | Burn CPU and allocate memory |
//! | GET | `/slow-endpoint` | Reply after a random delay |
//! | GET | `/error/{code}` | Reply with the given error status |
//! | GET | `/data/{size_kb}` | Reply with a payload of the given size |

pub mod handlers;
pub mod stats;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use stats::Sampler;

/// Static settings of one instance.
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    pub server_id: String,
    /// Port reported in payloads.
    pub port: u16,
    /// CPU or memory percent above which `/health` reports `degraded`.
    pub degraded_threshold: f64,
    /// Bounds of the `/slow-endpoint` delay.
    pub slow_delay: (Duration, Duration),
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            server_id: "unknown".to_string(),
            port: 8000,
            degraded_threshold: 80.0,
            slow_delay: (Duration::from_secs(1), Duration::from_secs(5)),
        }
    }
}

/// Shared state for instance handlers.
#[derive(Clone)]
pub struct InstanceState {
    inner: Arc<Inner>,
}

struct Inner {
    config: InstanceConfig,
    hostname: String,
    started: Instant,
    requests: AtomicU64,
    sampler: Sampler,
}

impl InstanceState {
    pub fn new(config: InstanceConfig) -> Self {
        let hostname = sysinfo::System::host_name().unwrap_or_else(|| "localhost".to_string());
        Self {
            inner: Arc::new(Inner {
                config,
                hostname,
                started: Instant::now(),
                requests: AtomicU64::new(0),
                sampler: Sampler::new(),
            }),
        }
    }

    pub fn config(&self) -> &InstanceConfig {
        &self.inner.config
    }

    pub fn hostname(&self) -> &str {
        &self.inner.hostname
    }

    pub fn sampler(&self) -> &Sampler {
        &self.inner.sampler
    }

    pub fn uptime(&self) -> Duration {
        self.inner.started.elapsed()
    }

    /// Count one served request and return the new total.
    pub fn hit(&self) -> u64 {
        self.inner.requests.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn requests(&self) -> u64 {
        self.inner.requests.load(Ordering::Relaxed)
    }
}

/// Build the instance router.
pub fn router(state: InstanceState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/simulate-load", post(handlers::simulate_load))
        .route("/slow-endpoint", get(handlers::slow_endpoint))
        .route("/error/{code}", get(handlers::error_code))
        .route("/data/{size_kb}", get(handlers::data))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
