//! JSON payloads served by an instance endpoint.
//!
//! The instance binary serializes these and the aggregator deserializes
//! them. Every field defaults so that an older or partial instance still
//! parses; missing numbers read as zero.

use serde::{Deserialize, Serialize};

use crate::types::ResourceUsage;

/// `GET /health`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthPayload {
    /// `"healthy"` or `"degraded"`.
    pub status: String,
    pub server_id: String,
    pub cpu_percent: Option<f64>,
    pub memory_mb: Option<f64>,
    pub memory_percent: Option<f64>,
    pub timestamp: String,
}

impl HealthPayload {
    /// Resource usage, if the instance included both CPU and memory figures.
    pub fn usage(&self) -> Option<ResourceUsage> {
        match (self.cpu_percent, self.memory_percent) {
            (Some(cpu_percent), Some(memory_percent)) => Some(ResourceUsage {
                cpu_percent,
                memory_mb: self.memory_mb.unwrap_or_default(),
                memory_percent,
            }),
            _ => None,
        }
    }
}

/// `GET /metrics`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsPayload {
    pub server_id: String,
    pub hostname: String,
    pub port: u16,
    pub status: Option<String>,
    pub timestamp: String,
    pub uptime_seconds: f64,
    pub requests: RequestCounters,
    pub cpu: CpuStats,
    pub memory: MemoryStats,
    pub disk: Option<DiskStats>,
    pub network: Option<NetworkStats>,
}

impl MetricsPayload {
    pub fn usage(&self) -> ResourceUsage {
        ResourceUsage {
            cpu_percent: self.cpu.percent,
            memory_mb: self.memory.used_mb,
            memory_percent: self.memory.percent,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RequestCounters {
    pub total: u64,
    pub rate_per_minute: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CpuStats {
    pub percent: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MemoryStats {
    pub total_mb: f64,
    pub available_mb: f64,
    pub used_mb: f64,
    pub percent: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DiskStats {
    pub total_gb: f64,
    pub used_gb: f64,
    pub free_gb: f64,
    pub percent: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkStats {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
}

/// `POST /simulate-load` acknowledgement.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulateLoadAck {
    pub server_id: String,
    pub message: String,
    pub cpu_duration: f64,
    pub memory_allocated_mb: u64,
    pub timestamp: String,
}
