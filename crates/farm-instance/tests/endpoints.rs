//! Instance endpoint tests, driven through the router.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use farm_core::wire::{HealthPayload, MetricsPayload, SimulateLoadAck};
use farm_instance::handlers::{DataReply, ErrorBody, RootInfo, SlowReply};
use farm_instance::{InstanceConfig, InstanceState, router};

fn state_with(threshold: f64) -> InstanceState {
    InstanceState::new(InstanceConfig {
        server_id: "server-7".to_string(),
        port: 8007,
        degraded_threshold: threshold,
        slow_delay: (Duration::from_millis(10), Duration::from_millis(30)),
    })
}

async fn call(state: &InstanceState, method: &str, uri: &str) -> (StatusCode, bytes::Bytes) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let resp = router(state.clone()).oneshot(req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, body)
}

#[tokio::test]
async fn root_counts_requests() {
    let state = state_with(80.0);

    let (status, body) = call(&state, "GET", "/").await;
    assert_eq!(status, StatusCode::OK);
    let info: RootInfo = serde_json::from_slice(&body).unwrap();
    assert_eq!(info.server_id, "server-7");
    assert_eq!(info.port, 8007);
    assert_eq!(info.total_requests, 1);

    let (_, body) = call(&state, "GET", "/").await;
    let info: RootInfo = serde_json::from_slice(&body).unwrap();
    assert_eq!(info.total_requests, 2);
    assert_eq!(state.requests(), 2);
}

#[tokio::test]
async fn health_reports_usage() {
    let state = state_with(101.0);
    let (status, body) = call(&state, "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);

    let payload: HealthPayload = serde_json::from_slice(&body).unwrap();
    assert_eq!(payload.status, "healthy");
    assert_eq!(payload.server_id, "server-7");
    assert!(payload.usage().is_some());
    assert!(!payload.timestamp.is_empty());
    // Health checks are not counted.
    assert_eq!(state.requests(), 0);
}

#[tokio::test]
async fn health_degrades_past_threshold() {
    // Memory in use is always above zero percent.
    let state = state_with(0.0);
    let (_, body) = call(&state, "GET", "/health").await;
    let payload: HealthPayload = serde_json::from_slice(&body).unwrap();
    assert_eq!(payload.status, "degraded");
}

#[tokio::test]
async fn metrics_payload_shape() {
    let state = state_with(101.0);
    call(&state, "GET", "/").await;

    let (status, body) = call(&state, "GET", "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    let payload: MetricsPayload = serde_json::from_slice(&body).unwrap();
    assert_eq!(payload.server_id, "server-7");
    assert_eq!(payload.requests.total, 1);
    assert!(payload.cpu.count >= 1);
    assert!(payload.memory.total_mb > 0.0);
    assert_eq!(payload.status.as_deref(), Some("healthy"));
    assert!(payload.network.is_some());

    let raw: serde_json::Value = serde_json::from_slice(&body).unwrap();
    for key in ["requests", "cpu", "memory", "uptime_seconds", "hostname"] {
        assert!(raw.get(key).is_some(), "missing {key}");
    }
}

#[tokio::test]
async fn error_endpoint_returns_requested_status() {
    let state = state_with(80.0);

    let (status, body) = call(&state, "GET", "/error/503").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let err: ErrorBody = serde_json::from_slice(&body).unwrap();
    assert_eq!(err.detail, "Service Unavailable");

    let (status, _) = call(&state, "GET", "/error/404").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn error_endpoint_rejects_non_error_codes() {
    let state = state_with(80.0);
    let (status, _) = call(&state, "GET", "/error/200").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = call(&state, "GET", "/error/banana").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn data_endpoint_sizes_and_limit() {
    let state = state_with(80.0);

    let (status, body) = call(&state, "GET", "/data/4").await;
    assert_eq!(status, StatusCode::OK);
    let reply: DataReply = serde_json::from_slice(&body).unwrap();
    assert_eq!(reply.size_kb, 4);
    assert_eq!(reply.data.len(), 4 * 1024);

    let (status, _) = call(&state, "GET", "/data/10241").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(state.requests(), 2);
}

#[tokio::test]
async fn simulate_load_acknowledges() {
    let state = state_with(80.0);
    let (status, body) = call(&state, "POST", "/simulate-load?cpu_duration=0.05&memory_mb=1").await;
    assert_eq!(status, StatusCode::OK);
    let ack: SimulateLoadAck = serde_json::from_slice(&body).unwrap();
    assert_eq!(ack.memory_allocated_mb, 1);
    assert_eq!(ack.cpu_duration, 0.05);
    assert_eq!(ack.message, "Load simulation completed");
}

#[tokio::test]
async fn simulate_load_rejects_bad_parameters() {
    let state = state_with(80.0);
    let (status, _) = call(&state, "POST", "/simulate-load?cpu_duration=-1&memory_mb=1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = call(&state, "POST", "/simulate-load?cpu_duration=0&memory_mb=999999").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn slow_endpoint_waits_within_bounds() {
    let state = state_with(80.0);
    let started = std::time::Instant::now();
    let (status, body) = call(&state, "GET", "/slow-endpoint").await;
    assert_eq!(status, StatusCode::OK);
    assert!(started.elapsed() >= Duration::from_millis(10));

    let reply: SlowReply = serde_json::from_slice(&body).unwrap();
    assert!(reply.delay_seconds >= 0.01 && reply.delay_seconds <= 0.03);
}
