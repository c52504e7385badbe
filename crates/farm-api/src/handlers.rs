//! REST API handlers.
//!
//! Input is checked against the registry first; ids that do not resolve are
//! rejected before any instance is contacted.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{info, warn};

use farm_core::*;
use farm_docker::{ContainerAction, ContainerControl, ContainerError};
use farm_health::{Probe, ProbeOutcome, render_prometheus};
use farm_loadtest::LoadTestPlan;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn farm_error(e: &FarmError) -> Response {
    let status = match e {
        FarmError::NotFound(_) => StatusCode::NOT_FOUND,
        FarmError::InvalidIds(_) | FarmError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        FarmError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status)
}

fn container_error(e: &ContainerError) -> Response {
    let status = match e {
        ContainerError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        ContainerError::NotFound(_) => StatusCode::NOT_FOUND,
        ContainerError::UnknownAction(_) => StatusCode::BAD_REQUEST,
        ContainerError::Runtime(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status)
}

fn bad_body(rejection: JsonRejection) -> Response {
    error_response(&rejection.body_text(), StatusCode::BAD_REQUEST)
}

/// Payload plus the time the control plane produced it.
#[derive(Debug, Serialize)]
pub struct Stamped<T: Serialize> {
    #[serde(flatten)]
    pub data: T,
    pub timestamp: String,
}

fn stamped<T: Serialize>(data: T) -> Response {
    ApiResponse::ok(Stamped {
        data,
        timestamp: Utc::now().to_rfc3339(),
    })
    .into_response()
}

/// Resolve a path segment to an instance. Anything that is not a
/// registered id is a 404.
fn path_instance<'a>(registry: &'a Registry, raw: &str) -> Result<&'a Instance, Response> {
    let id: InstanceId = raw
        .parse()
        .map_err(|_| error_response(&format!("server {raw} not found"), StatusCode::NOT_FOUND))?;
    registry.resolve(id).map_err(|e| farm_error(&e))
}

// ── Info ───────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ControlPlaneInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub servers_managed: usize,
    pub host: String,
    pub base_port: u16,
    pub port_range: Option<(u16, u16)>,
    pub container_runtime: bool,
    pub endpoints: BTreeMap<&'static str, &'static str>,
}

/// GET /
pub async fn info(State(state): State<ApiState>) -> Response {
    let endpoints = BTreeMap::from([
        ("servers", "/api/servers"),
        ("health", "/api/health"),
        ("metrics", "/api/metrics"),
        ("load_test", "/api/load-test"),
        ("simulate_load", "/api/simulate-load"),
        ("broadcast", "/api/broadcast"),
        ("prometheus", "/metrics"),
    ]);
    stamped(ControlPlaneInfo {
        name: "Server Farm Control Plane",
        version: env!("CARGO_PKG_VERSION"),
        servers_managed: state.registry.len(),
        host: state.registry.host().to_string(),
        base_port: state.registry.base_port(),
        port_range: state.registry.port_range(),
        container_runtime: state.containers.is_some(),
        endpoints,
    })
}

// ── Servers ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ServerList {
    pub total_servers: usize,
    pub container_runtime: bool,
    pub servers: Vec<InstanceView>,
}

/// GET /api/servers
///
/// Status comes from the container runtime when there is one, otherwise
/// from a short `/health` probe of each instance.
pub async fn list_servers(State(state): State<ApiState>) -> Response {
    let instances = state.registry.all();
    let servers = match &state.containers {
        Some(containers) => container_views(containers.clone(), instances).await,
        None => probe_views(&state, instances).await,
    };
    stamped(ServerList {
        total_servers: instances.len(),
        container_runtime: state.containers.is_some(),
        servers,
    })
}

async fn container_views(
    containers: Arc<dyn ContainerControl>,
    instances: &[Instance],
) -> Vec<InstanceView> {
    let mut set = JoinSet::new();
    for instance in instances.iter().cloned() {
        let containers = containers.clone();
        set.spawn(async move { container_view(containers.as_ref(), instance).await });
    }

    let mut views = Vec::with_capacity(instances.len());
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(view) => views.push(view),
            Err(e) => warn!(error = %e, "container status task failed"),
        }
    }
    views.sort_by_key(|v| v.instance.id);
    views
}

async fn container_view(containers: &dyn ContainerControl, instance: Instance) -> InstanceView {
    match containers.state(&instance.name).await {
        Ok(status) => {
            let usage = if status == InstanceStatus::Running {
                containers.usage(&instance.name).await.ok().flatten()
            } else {
                None
            };
            InstanceView {
                instance,
                status,
                usage,
                error: None,
            }
        }
        Err(e) => InstanceView {
            instance,
            status: InstanceStatus::Unknown,
            usage: None,
            error: Some(e.to_string()),
        },
    }
}

async fn probe_views(state: &ApiState, instances: &[Instance]) -> Vec<InstanceView> {
    let poll = state
        .aggregator
        .poll_health_with(instances, state.timeouts().listing)
        .await;
    let mut samples: BTreeMap<InstanceId, HealthSample> = poll
        .samples
        .into_iter()
        .map(|s| (s.instance_id, s))
        .collect();

    instances
        .iter()
        .map(|instance| {
            let sample = samples.remove(&instance.id);
            let responding = sample.as_ref().is_some_and(|s| s.status.is_responding());
            InstanceView {
                instance: instance.clone(),
                status: if responding {
                    InstanceStatus::Running
                } else {
                    InstanceStatus::Stopped
                },
                usage: sample.as_ref().and_then(|s| s.usage),
                error: sample.and_then(|s| s.error),
            }
        })
        .collect()
}

#[derive(Debug, Serialize)]
pub struct ServerDetail {
    #[serde(flatten)]
    pub instance: Instance,
    pub status: InstanceStatus,
    pub metrics: InstanceReply,
}

/// GET /api/servers/{id}
pub async fn get_server(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    let instance = match path_instance(&state.registry, &id) {
        Ok(instance) => instance.clone(),
        Err(resp) => return resp,
    };

    let metrics = Probe::new(state.timeouts().metrics)
        .get(&instance.address, "/metrics")
        .await;

    let status = match &state.containers {
        Some(containers) => match containers.state(&instance.name).await {
            Ok(status) => status,
            Err(e) => return container_error(&e),
        },
        None => match metrics {
            ProbeOutcome::Response { .. } => InstanceStatus::Running,
            _ => InstanceStatus::Stopped,
        },
    };

    stamped(ServerDetail {
        instance,
        status,
        metrics: metrics.into_reply(),
    })
}

#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub action: String,
}

#[derive(Debug, Serialize)]
pub struct ActionOutcome {
    pub server_id: InstanceId,
    pub container: String,
    pub action: ContainerAction,
    /// State observed right after the action.
    pub status: InstanceStatus,
}

/// POST /api/servers/{id}/action
pub async fn server_action(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: Result<Json<ActionRequest>, JsonRejection>,
) -> Response {
    let instance = match path_instance(&state.registry, &id) {
        Ok(instance) => instance.clone(),
        Err(resp) => return resp,
    };
    let Json(req) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    let action: ContainerAction = match req.action.parse() {
        Ok(action) => action,
        Err(e) => return container_error(&e),
    };
    let Some(containers) = &state.containers else {
        return error_response(
            "container runtime not available; manage containers with docker compose directly",
            StatusCode::SERVICE_UNAVAILABLE,
        );
    };

    if let Err(e) = containers.apply(&instance.name, action).await {
        return container_error(&e);
    }
    let status = containers
        .state(&instance.name)
        .await
        .unwrap_or(InstanceStatus::Unknown);
    info!(server_id = instance.id, %action, ?status, "server action applied");

    stamped(ActionOutcome {
        server_id: instance.id,
        container: instance.name,
        action,
        status,
    })
}

// ── Polls ──────────────────────────────────────────────────────

/// GET /api/health
pub async fn health(State(state): State<ApiState>) -> Response {
    stamped(state.aggregator.poll_health(state.registry.all()).await)
}

/// GET /api/metrics
pub async fn metrics(State(state): State<ApiState>) -> Response {
    stamped(state.aggregator.poll_metrics(state.registry.all()).await)
}

// ── Load ───────────────────────────────────────────────────────

/// Load-test duration: whole seconds or a string like `"30s"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DurationArg {
    Seconds(u64),
    Text(String),
}

impl DurationArg {
    fn resolve(&self) -> Option<Duration> {
        match self {
            DurationArg::Seconds(secs) => Some(Duration::from_secs(*secs)),
            DurationArg::Text(text) => parse_duration(text),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoadTestRequest {
    /// Defaults to every registered instance.
    #[serde(default)]
    pub target_servers: Option<Vec<InstanceId>>,
    #[serde(default = "default_requests")]
    pub requests: u32,
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,
    #[serde(default)]
    pub duration: Option<DurationArg>,
    #[serde(default)]
    pub policy: Option<ConcurrencyPolicy>,
}

fn default_requests() -> u32 {
    1000
}

fn default_concurrency() -> u32 {
    10
}

/// POST /api/load-test
pub async fn load_test(
    State(state): State<ApiState>,
    body: Result<Json<LoadTestRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };

    let targets = match req.target_servers.as_deref() {
        None | Some([]) => state.registry.all().to_vec(),
        Some(ids) => match state.registry.select(ids) {
            Ok(targets) => targets,
            Err(e) => return farm_error(&e),
        },
    };

    let max_duration = match &req.duration {
        None => None,
        Some(arg) => match arg.resolve() {
            Some(d) if !d.is_zero() => Some(d),
            _ => {
                return error_response(
                    "duration must be a positive number of seconds or a string like \"30s\"",
                    StatusCode::BAD_REQUEST,
                );
            }
        },
    };

    let plan = LoadTestPlan {
        targets,
        requests: req.requests,
        concurrency: req.concurrency,
        policy: req.policy.unwrap_or(state.default_policy),
        max_duration,
    };

    match state.load_tester.run(plan, state.shutdown.clone()).await {
        Ok(result) => stamped(result),
        Err(e) => farm_error(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct SimulateLoadRequest {
    pub server_ids: Vec<InstanceId>,
    #[serde(default = "default_cpu_duration")]
    pub cpu_duration: f64,
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u64,
}

fn default_cpu_duration() -> f64 {
    2.0
}

fn default_memory_mb() -> u64 {
    100
}

#[derive(Debug, Serialize)]
pub struct SimulateLoadSummary {
    pub total: usize,
    pub successful: usize,
    pub results: Vec<SimulateLoadEntry>,
}

/// POST /api/simulate-load
pub async fn simulate_load(
    State(state): State<ApiState>,
    body: Result<Json<SimulateLoadRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    if req.server_ids.is_empty() {
        return error_response("server_ids must not be empty", StatusCode::BAD_REQUEST);
    }

    match state
        .aggregator
        .simulate_load(&state.registry, &req.server_ids, req.cpu_duration, req.memory_mb)
        .await
    {
        Ok(results) => stamped(SimulateLoadSummary {
            total: results.len(),
            successful: results.iter().filter(|r| r.success).count(),
            results,
        }),
        Err(e) => farm_error(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct BroadcastParams {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

fn default_endpoint() -> String {
    "/".to_string()
}

/// POST /api/broadcast?endpoint=
pub async fn broadcast(
    State(state): State<ApiState>,
    Query(params): Query<BroadcastParams>,
) -> Response {
    match state
        .aggregator
        .broadcast(&params.endpoint, state.registry.all())
        .await
    {
        Ok(result) => stamped(result),
        Err(e) => farm_error(&e),
    }
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let poll = state.aggregator.poll_metrics(state.registry.all()).await;
    let body = render_prometheus(&poll);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
