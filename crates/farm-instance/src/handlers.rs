//! Instance endpoint handlers.
//!
//! Health and metrics bodies are the `farm_core::wire` payloads the control
//! plane parses. Errors use a `{"detail": ...}` body.

use std::time::{Duration, Instant};

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use farm_core::wire::{HealthPayload, MetricsPayload, RequestCounters, SimulateLoadAck};

use crate::InstanceState;
use crate::stats::{self, Snapshot};

/// Largest `/data/{size_kb}` payload, 10 MB.
pub const MAX_DATA_KB: u64 = 10_240;
pub const MAX_CPU_DURATION_SECS: f64 = 300.0;
pub const MAX_MEMORY_MB: u64 = 4_096;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

fn error_response(msg: impl Into<String>, status: StatusCode) -> Response {
    (
        status,
        Json(ErrorBody {
            detail: msg.into(),
        }),
    )
        .into_response()
}

fn timestamp() -> String {
    Utc::now().to_rfc3339()
}

fn health_status(snapshot: &Snapshot, threshold: f64) -> &'static str {
    if snapshot.exceeds(threshold) {
        "degraded"
    } else {
        "healthy"
    }
}

// ── Identity ───────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct RootInfo {
    pub server_id: String,
    pub hostname: String,
    pub port: u16,
    pub status: String,
    pub uptime_seconds: f64,
    pub total_requests: u64,
    pub timestamp: String,
}

/// GET /
pub async fn root(State(state): State<InstanceState>) -> Json<RootInfo> {
    let total_requests = state.hit();
    Json(RootInfo {
        server_id: state.config().server_id.clone(),
        hostname: state.hostname().to_string(),
        port: state.config().port,
        status: "running".to_string(),
        uptime_seconds: state.uptime().as_secs_f64(),
        total_requests,
        timestamp: timestamp(),
    })
}

// ── Health & metrics ───────────────────────────────────────────

/// GET /health
pub async fn health(State(state): State<InstanceState>) -> Json<HealthPayload> {
    let snap = state.sampler().snapshot();
    let status = health_status(&snap, state.config().degraded_threshold);
    if status == "degraded" {
        debug!(
            cpu = snap.cpu.percent,
            memory = snap.memory.percent,
            "reporting degraded"
        );
    }

    Json(HealthPayload {
        status: status.to_string(),
        server_id: state.config().server_id.clone(),
        cpu_percent: Some(snap.cpu.percent),
        memory_mb: Some(snap.memory.used_mb),
        memory_percent: Some(snap.memory.percent),
        timestamp: timestamp(),
    })
}

/// GET /metrics
pub async fn metrics(State(state): State<InstanceState>) -> Json<MetricsPayload> {
    let snap = state.sampler().snapshot();
    let (disk, network) =
        tokio::task::spawn_blocking(|| (stats::disk_stats(), stats::network_stats()))
            .await
            .unwrap_or_default();

    let total = state.requests();
    let uptime = state.uptime().as_secs_f64();
    let rate_per_minute = if uptime > 0.0 {
        total as f64 / uptime * 60.0
    } else {
        0.0
    };

    Json(MetricsPayload {
        server_id: state.config().server_id.clone(),
        hostname: state.hostname().to_string(),
        port: state.config().port,
        status: Some(health_status(&snap, state.config().degraded_threshold).to_string()),
        timestamp: timestamp(),
        uptime_seconds: uptime,
        requests: RequestCounters {
            total,
            rate_per_minute,
        },
        cpu: snap.cpu,
        memory: snap.memory,
        disk,
        network: Some(network),
    })
}

// ── Load simulation ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LoadParams {
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

/// POST /simulate-load?cpu_duration=&memory_mb=
pub async fn simulate_load(
    State(state): State<InstanceState>,
    Query(params): Query<LoadParams>,
) -> Response {
    state.hit();

    if !params.cpu_duration.is_finite()
        || params.cpu_duration < 0.0
        || params.cpu_duration > MAX_CPU_DURATION_SECS
    {
        return error_response(
            format!("cpu_duration must be between 0 and {MAX_CPU_DURATION_SECS} seconds"),
            StatusCode::BAD_REQUEST,
        );
    }
    if params.memory_mb > MAX_MEMORY_MB {
        return error_response(
            format!("memory_mb must be at most {MAX_MEMORY_MB}"),
            StatusCode::BAD_REQUEST,
        );
    }

    info!(
        cpu_duration = params.cpu_duration,
        memory_mb = params.memory_mb,
        "simulating load"
    );
    let cpu = Duration::from_secs_f64(params.cpu_duration);
    let memory_mb = params.memory_mb;

    match tokio::task::spawn_blocking(move || burn(cpu, memory_mb)).await {
        Ok(()) => Json(SimulateLoadAck {
            server_id: state.config().server_id.clone(),
            message: "Load simulation completed".to_string(),
            cpu_duration: params.cpu_duration,
            memory_allocated_mb: memory_mb,
            timestamp: timestamp(),
        })
        .into_response(),
        Err(e) => {
            warn!(error = %e, "load simulation task failed");
            error_response("load simulation failed", StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Spin for `cpu`, then allocate and touch `memory_mb` of memory.
fn burn(cpu: Duration, memory_mb: u64) {
    let started = Instant::now();
    let mut acc: u64 = 0;
    while started.elapsed() < cpu {
        for i in 0..1_000u64 {
            acc = acc.wrapping_add(i);
        }
        std::hint::black_box(acc);
    }

    let mut hog = vec![0u8; memory_mb as usize * 1024 * 1024];
    for page in hog.chunks_mut(4096) {
        page[0] = 1;
    }
    std::hint::black_box(&hog);
}

// ── Test endpoints ─────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct SlowReply {
    pub server_id: String,
    pub message: String,
    pub delay_seconds: f64,
    pub timestamp: String,
}

/// GET /slow-endpoint
pub async fn slow_endpoint(State(state): State<InstanceState>) -> Json<SlowReply> {
    state.hit();
    let (min, max) = state.config().slow_delay;
    let delay = if max > min {
        rand::thread_rng().gen_range(min.as_secs_f64()..=max.as_secs_f64())
    } else {
        min.as_secs_f64()
    };
    tokio::time::sleep(Duration::from_secs_f64(delay)).await;

    Json(SlowReply {
        server_id: state.config().server_id.clone(),
        message: "This was a slow response".to_string(),
        delay_seconds: delay,
        timestamp: timestamp(),
    })
}

/// GET /error/{code}
pub async fn error_code(State(state): State<InstanceState>, Path(code): Path<u16>) -> Response {
    state.hit();
    match StatusCode::from_u16(code) {
        Ok(status) if status.is_client_error() || status.is_server_error() => {
            error_response(status.canonical_reason().unwrap_or("Unknown Error"), status)
        }
        _ => error_response(
            format!("{code} is not an error status"),
            StatusCode::BAD_REQUEST,
        ),
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DataReply {
    pub server_id: String,
    pub size_kb: u64,
    pub data: String,
    pub timestamp: String,
}

/// GET /data/{size_kb}
pub async fn data(State(state): State<InstanceState>, Path(size_kb): Path<u64>) -> Response {
    state.hit();
    if size_kb > MAX_DATA_KB {
        return error_response("Size too large (max 10MB)", StatusCode::BAD_REQUEST);
    }

    Json(DataReply {
        server_id: state.config().server_id.clone(),
        size_kb,
        data: "x".repeat(size_kb as usize * 1024),
        timestamp: timestamp(),
    })
    .into_response()
}
