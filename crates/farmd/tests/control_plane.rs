//! Control plane tests against a live farm.
//!
//! Each test starts real instance servers on loopback ports laid out the way
//! the registry expects (`base_port + id`), leaves some ids without a
//! listener, and drives the control plane router with `oneshot`.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower::ServiceExt;

use farm_api::{ApiState, build_router};
use farm_core::config::LoadTestConfig;
use farm_core::{Registry, Timeouts};
use farm_instance::{InstanceConfig, InstanceState};

struct Farm {
    registry: Registry,
    /// State of each live instance, ids `1..=live`.
    instances: Vec<InstanceState>,
}

/// Reserve `total` consecutive ports, serve instances on the first `live`
/// and close the rest.
async fn spawn_farm(total: u32, live: u32) -> Farm {
    for _ in 0..20 {
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_port = probe.local_addr().unwrap().port() - 1;
        drop(probe);

        let mut listeners = Vec::new();
        for id in 1..=total {
            match TcpListener::bind(("127.0.0.1", base_port + id as u16)).await {
                Ok(listener) => listeners.push(listener),
                Err(_) => break,
            }
        }
        if listeners.len() != total as usize {
            continue;
        }

        let mut instances = Vec::new();
        for (idx, listener) in listeners.into_iter().enumerate() {
            let id = idx as u32 + 1;
            if id > live {
                continue;
            }
            let state = InstanceState::new(InstanceConfig {
                server_id: format!("server-{id}"),
                port: base_port + id as u16,
                degraded_threshold: 101.0,
                slow_delay: (Duration::from_millis(1), Duration::from_millis(5)),
            });
            instances.push(state.clone());
            tokio::spawn(async move {
                axum::serve(listener, farm_instance::router(state)).await.ok();
            });
        }

        return Farm {
            registry: Registry::new(total, "127.0.0.1", base_port).unwrap(),
            instances,
        };
    }
    panic!("could not reserve consecutive ports");
}

fn control_plane(farm: &Farm) -> axum::Router {
    let (_tx, rx) = watch::channel(false);
    let timeouts = Timeouts {
        health: Duration::from_secs(2),
        metrics: Duration::from_secs(2),
        broadcast: Duration::from_secs(2),
        listing: Duration::from_secs(1),
        load_test: Duration::from_secs(5),
        simulate_load: Duration::from_secs(5),
        fanout_deadline: None,
    };
    let state = ApiState::new(
        farm.registry.clone(),
        timeouts,
        &LoadTestConfig::default(),
        None,
        rx,
    );
    build_router(state)
}

async fn send(
    router: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&json).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

#[tokio::test]
async fn health_poll_counts_live_and_dead() {
    let farm = spawn_farm(3, 2).await;
    let router = control_plane(&farm);

    let (status, body) = send(&router, "GET", "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    let report = &body["data"]["report"];
    assert_eq!(report["total_instances"], 3);
    assert_eq!(report["responding_instances"], 2);
    assert_eq!(report["healthy_count"], 2);
    let samples = body["data"]["samples"].as_array().unwrap();
    assert_eq!(samples.len(), 3);
    assert_eq!(samples[0]["status"], "healthy");
    assert_eq!(samples[2]["status"], "unreachable");
}

#[tokio::test]
async fn metrics_poll_separates_failures() {
    let farm = spawn_farm(3, 2).await;
    let router = control_plane(&farm);

    let (status, body) = send(&router, "GET", "/api/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["report"]["responding_instances"], 2);
    assert_eq!(body["data"]["samples"].as_array().unwrap().len(), 2);
    let failures = body["data"]["failures"].as_array().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0]["instance_id"], 3);
}

#[tokio::test]
async fn listing_without_runtime_probes_instances() {
    let farm = spawn_farm(3, 2).await;
    let router = control_plane(&farm);

    let (status, body) = send(&router, "GET", "/api/servers", None).await;
    assert_eq!(status, StatusCode::OK);
    let servers = body["data"]["servers"].as_array().unwrap();
    assert_eq!(servers[0]["status"], "running");
    assert_eq!(servers[1]["status"], "running");
    assert_eq!(servers[2]["status"], "stopped");
    assert_eq!(servers[1]["name"], "server-2");
}

#[tokio::test]
async fn server_detail_includes_metrics_reply() {
    let farm = spawn_farm(1, 1).await;
    let router = control_plane(&farm);

    let (status, body) = send(&router, "GET", "/api/servers/1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "running");
    assert_eq!(body["data"]["metrics"]["outcome"], "ok");
    assert_eq!(body["data"]["metrics"]["body"]["server_id"], "server-1");

    let (status, body) = send(&router, "GET", "/api/servers/2", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn load_test_hits_every_target() {
    let farm = spawn_farm(2, 2).await;
    let router = control_plane(&farm);

    let (status, body) = send(
        &router,
        "POST",
        "/api/load-test",
        Some(serde_json::json!({
            "target_servers": [1, 2],
            "requests": 5,
            "concurrency": 3
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let result = &body["data"];
    assert_eq!(result["total_requests"], 10);
    assert_eq!(result["successful"], 10);
    assert_eq!(result["failed"], 0);
    assert_eq!(result["partial"], false);
    assert_eq!(result["per_target"].as_array().unwrap().len(), 2);

    for instance in &farm.instances {
        assert_eq!(instance.requests(), 5);
    }
}

#[tokio::test]
async fn load_test_rejects_bad_requests() {
    let farm = spawn_farm(2, 2).await;
    let router = control_plane(&farm);

    let (status, _) = send(
        &router,
        "POST",
        "/api/load-test",
        Some(serde_json::json!({"requests": -5})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &router,
        "POST",
        "/api/load-test",
        Some(serde_json::json!({"target_servers": [1, 9], "requests": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains('9'));

    let (status, _) = send(
        &router,
        "POST",
        "/api/load-test",
        Some(serde_json::json!({"requests": 1, "concurrency": 0})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Nothing reached the instances.
    for instance in &farm.instances {
        assert_eq!(instance.requests(), 0);
    }
}

#[tokio::test]
async fn broadcast_reports_each_instance() {
    let farm = spawn_farm(3, 2).await;
    let router = control_plane(&farm);

    let (status, body) = send(&router, "POST", "/api/broadcast?endpoint=/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 3);
    assert_eq!(body["data"]["successful"], 2);
    assert_eq!(body["data"]["failed"], 1);
    assert_eq!(body["data"]["responses"]["1"]["outcome"], "ok");
    assert_eq!(body["data"]["responses"]["3"]["outcome"], "unreachable");
}

#[tokio::test]
async fn simulate_load_reports_per_server() {
    let farm = spawn_farm(3, 2).await;
    let router = control_plane(&farm);

    let (status, body) = send(
        &router,
        "POST",
        "/api/simulate-load",
        Some(serde_json::json!({
            "server_ids": [1, 3, 99],
            "cpu_duration": 0.01,
            "memory_mb": 1
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let results = body["data"]["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["success"], true);
    assert_eq!(results[1]["success"], false);
    assert_eq!(results[2]["message"], "invalid server id");
    assert_eq!(body["data"]["successful"], 1);
}

#[tokio::test]
async fn actions_need_a_container_runtime() {
    let farm = spawn_farm(1, 1).await;
    let router = control_plane(&farm);

    let (status, body) = send(
        &router,
        "POST",
        "/api/servers/1/action",
        Some(serde_json::json!({"action": "restart"})),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn prometheus_exposition_reflects_poll() {
    let farm = spawn_farm(3, 2).await;
    let router = control_plane(&farm);

    let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("farm_instances_total 3"));
    assert!(text.contains("farm_instances_responding 2"));
    assert!(text.contains("farm_instance_cpu_percent{instance=\"1\"}"));
}

#[tokio::test]
async fn info_lists_endpoints() {
    let farm = spawn_farm(2, 0).await;
    let router = control_plane(&farm);

    let (status, body) = send(&router, "GET", "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["servers_managed"], 2);
    assert_eq!(body["data"]["endpoints"]["load_test"], "/api/load-test");
}
