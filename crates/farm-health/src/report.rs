//! Reduction of per-instance samples into summary statistics.
//!
//! Means are unweighted and taken only over instances that responded and
//! reported usage. An empty input reduces to all-zero figures.

use farm_core::{AggregateReport, HealthState, LatencySummary, ResourceUsage, Stat};

/// Accumulates one poll's observations into an [`AggregateReport`].
#[derive(Debug)]
pub struct ReportBuilder {
    report: AggregateReport,
    cpu: Vec<f64>,
    memory_mb: Vec<f64>,
    memory_percent: Vec<f64>,
}

impl ReportBuilder {
    /// Start a report over `total` requested instances.
    pub fn new(total: usize) -> Self {
        Self {
            report: AggregateReport {
                total_instances: total,
                ..AggregateReport::default()
            },
            cpu: Vec::with_capacity(total),
            memory_mb: Vec::with_capacity(total),
            memory_percent: Vec::with_capacity(total),
        }
    }

    /// Record one instance's classification, usage and request counter.
    pub fn observe(&mut self, state: HealthState, usage: Option<ResourceUsage>, requests: u64) {
        match state {
            HealthState::Healthy => self.report.healthy_count += 1,
            HealthState::Degraded => self.report.degraded_count += 1,
            HealthState::Unhealthy => self.report.unhealthy_count += 1,
            HealthState::Unreachable => return,
        }
        self.report.responding_instances += 1;
        self.report.total_requests += requests;

        if let Some(u) = usage {
            self.cpu.push(u.cpu_percent);
            self.memory_mb.push(u.memory_mb);
            self.memory_percent.push(u.memory_percent);
        }
    }

    pub fn partial(mut self, partial: bool) -> Self {
        self.report.partial = partial;
        self
    }

    pub fn finish(mut self) -> AggregateReport {
        self.report.cpu = stat(&self.cpu);
        self.report.memory_mb = stat(&self.memory_mb);
        self.report.memory_percent = stat(&self.memory_percent);
        self.report
    }
}

/// Mean, min and max rounded to two decimals; zeros when empty.
pub fn stat(values: &[f64]) -> Stat {
    if values.is_empty() {
        return Stat::default();
    }
    let sum: f64 = values.iter().sum();
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Stat {
        average: round2(sum / values.len() as f64),
        min: round2(min),
        max: round2(max),
    }
}

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Summarize latency samples given in microseconds.
///
/// Returns all zeros for an empty slice.
pub fn summarize_latencies(latencies_us: &[u64]) -> LatencySummary {
    if latencies_us.is_empty() {
        return LatencySummary::default();
    }

    let mut sorted = latencies_us.to_vec();
    sorted.sort_unstable();

    let sum: u128 = sorted.iter().map(|v| *v as u128).sum();
    let average = sum as f64 / sorted.len() as f64;

    LatencySummary {
        average_ms: round2(average / 1000.0),
        min_ms: round2(sorted[0] as f64 / 1000.0),
        max_ms: round2(sorted[sorted.len() - 1] as f64 / 1000.0),
        p50_ms: percentile(&sorted, 0.50),
        p95_ms: percentile(&sorted, 0.95),
        p99_ms: percentile(&sorted, 0.99),
    }
}

/// Nearest-rank percentile of sorted microsecond samples, in milliseconds.
fn percentile(sorted: &[u64], q: f64) -> f64 {
    let idx = (sorted.len() as f64 * q) as usize;
    round2(sorted[idx.min(sorted.len() - 1)] as f64 / 1000.0)
}
