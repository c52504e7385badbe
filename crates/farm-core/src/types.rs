//! Domain types for the server farm.
//!
//! Every sample and report here is ephemeral: produced by one poll,
//! load test or broadcast, serialized to the caller, then dropped. Nothing
//! is cached or accumulated across calls.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Identifier of an instance, `1..=N`.
pub type InstanceId = u32;

// ── Instance ──────────────────────────────────────────────────────

/// A registered server instance. Identity is `id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Instance {
    pub id: InstanceId,
    /// Container name, `server-{id}`.
    pub name: String,
    pub host: String,
    pub port: u16,
    /// `host:port`, ready for a TCP connect.
    pub address: String,
}

/// Lifecycle status of an instance as observed on the latest poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Running,
    Stopped,
    Unknown,
}

/// An instance together with its freshly observed status.
///
/// The registry never stores status; this view is rebuilt on every listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceView {
    #[serde(flatten)]
    pub instance: Instance,
    pub status: InstanceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<ResourceUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ── Samples ───────────────────────────────────────────────────────

/// Health classification of one instance for one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// 2xx reply, instance reports itself healthy.
    Healthy,
    /// 2xx reply, instance reports elevated resource usage.
    Degraded,
    /// The instance replied with a non-2xx status.
    Unhealthy,
    /// Timed out or the connection failed.
    Unreachable,
}

impl HealthState {
    /// Classify a successful reply from the status string the instance sent.
    ///
    /// The degraded threshold is the instance's own policy; anything other
    /// than `"degraded"` counts as healthy.
    pub fn from_reported(status: Option<&str>) -> Self {
        match status {
            Some(s) if s.eq_ignore_ascii_case("degraded") => HealthState::Degraded,
            _ => HealthState::Healthy,
        }
    }

    /// Whether the instance answered at all.
    pub fn is_responding(self) -> bool {
        self != HealthState::Unreachable
    }
}

/// Resource usage an instance reports about itself.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceUsage {
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub memory_percent: f64,
}

/// Result of one `/health` probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthSample {
    pub instance_id: InstanceId,
    pub healthy: bool,
    pub status: HealthState,
    pub latency_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<ResourceUsage>,
}

/// Result of one successful `/metrics` probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsSample {
    pub instance_id: InstanceId,
    pub status: HealthState,
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub memory_percent: f64,
    /// The instance's own request counter.
    pub request_count: u64,
    pub latency_ms: f64,
}

/// An instance that produced no usable sample on this poll.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeFailure {
    pub instance_id: InstanceId,
    pub status: HealthState,
    pub error: String,
}

// ── Reports ───────────────────────────────────────────────────────

/// Unweighted mean, minimum and maximum over the responding instances.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Stat {
    pub average: f64,
    pub min: f64,
    pub max: f64,
}

/// Summary of one poll across the requested instances.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AggregateReport {
    pub total_instances: usize,
    pub responding_instances: usize,
    pub healthy_count: usize,
    pub degraded_count: usize,
    /// Responded with a non-2xx status (or an unparseable payload).
    pub unhealthy_count: usize,
    pub cpu: Stat,
    pub memory_mb: Stat,
    pub memory_percent: Stat,
    pub total_requests: u64,
    /// Set when a caller deadline cut the poll short.
    pub partial: bool,
}

/// A health poll: the summary plus one sample per instance, ordered by id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthPoll {
    pub report: AggregateReport,
    pub samples: Vec<HealthSample>,
}

/// A metrics poll: the summary, samples for responders, and the rest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsPoll {
    pub report: AggregateReport,
    pub samples: Vec<MetricsSample>,
    pub failures: Vec<ProbeFailure>,
}

// ── Fan-out replies ───────────────────────────────────────────────

/// Per-instance outcome of a single best-effort call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InstanceReply {
    Ok {
        status: u16,
        latency_ms: f64,
        body: serde_json::Value,
    },
    HttpError {
        status: u16,
        latency_ms: f64,
        body: serde_json::Value,
    },
    Timeout {
        latency_ms: f64,
    },
    Unreachable {
        reason: String,
        latency_ms: f64,
    },
}

impl InstanceReply {
    pub fn is_success(&self) -> bool {
        matches!(self, InstanceReply::Ok { .. })
    }
}

/// Result of a fan-out GET to every instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BroadcastResult {
    pub endpoint: String,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub partial: bool,
    pub responses: BTreeMap<InstanceId, InstanceReply>,
}

/// Outcome of a simulate-load request for one listed server id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulateLoadEntry {
    pub server_id: InstanceId,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<InstanceReply>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// ── Load tests ────────────────────────────────────────────────────

/// How the load-test concurrency cap is applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyPolicy {
    /// At most `concurrency` requests in flight for the whole test.
    #[default]
    Global,
    /// At most `concurrency` requests in flight per target.
    PerTarget,
}

/// Latency figures over successful requests, in milliseconds.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct LatencySummary {
    pub average_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

/// Per-target slice of a load test.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetResult {
    pub instance_id: InstanceId,
    pub requests: u64,
    pub successful: u64,
    pub failed: u64,
    pub average_latency_ms: f64,
    pub duration_secs: f64,
    pub requests_per_second: f64,
}

/// Aggregate outcome of one load test.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoadTestResult {
    pub target_instances: Vec<InstanceId>,
    pub requests_per_target: u32,
    pub concurrency: u32,
    pub policy: ConcurrencyPolicy,
    /// `requests_per_target * targets`.
    pub planned_requests: u64,
    /// Attempts that completed (`successful + failed`).
    pub total_requests: u64,
    pub successful: u64,
    pub failed: u64,
    pub latency: LatencySummary,
    pub duration_secs: f64,
    /// Completed attempts per wall-clock second.
    pub throughput: f64,
    /// Set when the test was cancelled before every attempt finished.
    pub partial: bool,
    pub per_target: Vec<TargetResult>,
}
