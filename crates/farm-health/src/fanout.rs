//! Fan-out polls across registered instances.
//!
//! Every operation here issues one concurrent probe per instance, waits for
//! all of them to settle (or for the optional caller deadline), and merges
//! the outcomes by instance id. Per-instance failures never abort a poll;
//! they become `unreachable`/`unhealthy` entries in the result.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use farm_core::wire::{HealthPayload, MetricsPayload};
use farm_core::*;

use crate::probe::{millis, Probe, ProbeOutcome};
use crate::report::ReportBuilder;

/// Merged outcomes of one fan-out, keyed by instance id.
#[derive(Debug)]
pub struct Fanout {
    pub outcomes: BTreeMap<InstanceId, ProbeOutcome>,
    /// The caller deadline fired before every probe settled.
    pub partial: bool,
}

#[derive(Debug, Clone, Copy)]
enum Verb {
    Get,
    Post,
}

/// Issues concurrent probes and reduces them into reports.
///
/// Cheap to clone; holds only timeouts.
#[derive(Debug, Clone)]
pub struct Aggregator {
    timeouts: Timeouts,
}

impl Aggregator {
    pub fn new(timeouts: Timeouts) -> Self {
        Self { timeouts }
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    /// Probe `/health` on every instance and summarize.
    pub async fn poll_health(&self, instances: &[Instance]) -> HealthPoll {
        self.poll_health_with(instances, self.timeouts.health).await
    }

    /// [`poll_health`](Self::poll_health) with an explicit per-call timeout.
    pub async fn poll_health_with(&self, instances: &[Instance], timeout: Duration) -> HealthPoll {
        let fanout = scatter(
            instances,
            Probe::new(timeout),
            Verb::Get,
            "/health",
            self.timeouts.fanout_deadline,
        )
        .await;

        let mut builder = ReportBuilder::new(instances.len());
        let mut samples = Vec::with_capacity(fanout.outcomes.len());

        for (id, outcome) in &fanout.outcomes {
            let sample = health_sample(*id, outcome);
            builder.observe(sample.status, sample.usage, 0);
            samples.push(sample);
        }

        let report = builder.partial(fanout.partial).finish();
        debug!(
            total = report.total_instances,
            responding = report.responding_instances,
            healthy = report.healthy_count,
            degraded = report.degraded_count,
            partial = report.partial,
            "health poll complete"
        );
        HealthPoll { report, samples }
    }

    /// Probe `/metrics` on every instance and summarize.
    pub async fn poll_metrics(&self, instances: &[Instance]) -> MetricsPoll {
        let fanout = scatter(
            instances,
            Probe::new(self.timeouts.metrics),
            Verb::Get,
            "/metrics",
            self.timeouts.fanout_deadline,
        )
        .await;

        let mut builder = ReportBuilder::new(instances.len());
        let mut samples = Vec::new();
        let mut failures = Vec::new();

        for (id, outcome) in &fanout.outcomes {
            match metrics_sample(*id, outcome) {
                Ok(sample) => {
                    builder.observe(
                        sample.status,
                        Some(ResourceUsage {
                            cpu_percent: sample.cpu_percent,
                            memory_mb: sample.memory_mb,
                            memory_percent: sample.memory_percent,
                        }),
                        sample.request_count,
                    );
                    samples.push(sample);
                }
                Err(failure) => {
                    builder.observe(failure.status, None, 0);
                    failures.push(failure);
                }
            }
        }

        let report = builder.partial(fanout.partial).finish();
        debug!(
            total = report.total_instances,
            responding = report.responding_instances,
            total_requests = report.total_requests,
            partial = report.partial,
            "metrics poll complete"
        );
        MetricsPoll {
            report,
            samples,
            failures,
        }
    }

    /// Fan-out GET `endpoint` to every instance.
    ///
    /// `endpoint` must be an absolute path (`/health`, `/data/4`, ...).
    pub async fn broadcast(
        &self,
        endpoint: &str,
        instances: &[Instance],
    ) -> FarmResult<BroadcastResult> {
        validate_endpoint(endpoint)?;

        let fanout = scatter(
            instances,
            Probe::new(self.timeouts.broadcast),
            Verb::Get,
            endpoint,
            self.timeouts.fanout_deadline,
        )
        .await;

        let responses: BTreeMap<InstanceId, InstanceReply> = fanout
            .outcomes
            .into_iter()
            .map(|(id, outcome)| (id, outcome.into_reply()))
            .collect();
        let successful = responses.values().filter(|r| r.is_success()).count();

        info!(
            %endpoint,
            total = responses.len(),
            successful,
            partial = fanout.partial,
            "broadcast complete"
        );

        Ok(BroadcastResult {
            endpoint: endpoint.to_string(),
            total: responses.len(),
            successful,
            failed: responses.len() - successful,
            partial: fanout.partial,
            responses,
        })
    }

    /// Ask each listed instance to burn CPU and memory.
    ///
    /// Ids outside the registry get an error entry; the rest are called
    /// concurrently. Entries keep the order of `ids`.
    pub async fn simulate_load(
        &self,
        registry: &Registry,
        ids: &[InstanceId],
        cpu_duration: f64,
        memory_mb: u64,
    ) -> FarmResult<Vec<SimulateLoadEntry>> {
        if !cpu_duration.is_finite() || cpu_duration < 0.0 {
            return Err(FarmError::InvalidInput(format!(
                "cpu_duration must be a non-negative number of seconds, got {cpu_duration}"
            )));
        }

        let unique: BTreeSet<InstanceId> = ids.iter().copied().collect();
        let targets: Vec<Instance> = unique
            .iter()
            .filter_map(|id| registry.resolve(*id).ok().cloned())
            .collect();
        let path = format!("/simulate-load?cpu_duration={cpu_duration}&memory_mb={memory_mb}");

        let mut fanout = scatter(
            &targets,
            Probe::new(self.timeouts.simulate_load),
            Verb::Post,
            &path,
            None,
        )
        .await;

        let entries = ids
            .iter()
            .map(|id| match fanout.outcomes.remove(id) {
                Some(outcome) => {
                    let success = outcome.is_success();
                    let message = outcome.error_message();
                    SimulateLoadEntry {
                        server_id: *id,
                        success,
                        reply: Some(outcome.into_reply()),
                        message,
                    }
                }
                None => SimulateLoadEntry {
                    server_id: *id,
                    success: false,
                    reply: None,
                    message: Some(if registry.contains(*id) {
                        // Listed more than once; the call is reported on the first entry.
                        "duplicate server id".to_string()
                    } else {
                        "invalid server id".to_string()
                    }),
                },
            })
            .collect();

        info!(servers = ids.len(), cpu_duration, memory_mb, "load simulation dispatched");
        Ok(entries)
    }
}

fn validate_endpoint(endpoint: &str) -> FarmResult<()> {
    if !endpoint.starts_with('/') {
        return Err(FarmError::InvalidInput(format!(
            "endpoint must start with '/', got {endpoint:?}"
        )));
    }
    if endpoint.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(FarmError::InvalidInput(
            "endpoint must not contain whitespace".to_string(),
        ));
    }
    Ok(())
}

/// Classify one `/health` outcome.
pub fn health_sample(id: InstanceId, outcome: &ProbeOutcome) -> HealthSample {
    let latency_ms = millis(outcome.latency());
    let (status, usage) = match outcome {
        ProbeOutcome::Response { status, .. } if status.is_success() => {
            let payload: Option<HealthPayload> = outcome.json();
            let reported = payload.as_ref().map(|p| p.status.as_str());
            (
                HealthState::from_reported(reported),
                payload.as_ref().and_then(HealthPayload::usage),
            )
        }
        ProbeOutcome::Response { .. } => (HealthState::Unhealthy, None),
        ProbeOutcome::Timeout { .. } | ProbeOutcome::Failed { .. } => {
            (HealthState::Unreachable, None)
        }
    };

    HealthSample {
        instance_id: id,
        healthy: status == HealthState::Healthy,
        status,
        latency_ms,
        error: outcome.error_message(),
        usage,
    }
}

/// Turn one `/metrics` outcome into a sample, or a failure entry.
pub fn metrics_sample(
    id: InstanceId,
    outcome: &ProbeOutcome,
) -> Result<MetricsSample, ProbeFailure> {
    if let Some(error) = outcome.error_message() {
        let status = match outcome {
            ProbeOutcome::Response { .. } => HealthState::Unhealthy,
            _ => HealthState::Unreachable,
        };
        return Err(ProbeFailure {
            instance_id: id,
            status,
            error,
        });
    }

    let payload: MetricsPayload = outcome.json().ok_or_else(|| ProbeFailure {
        instance_id: id,
        status: HealthState::Unhealthy,
        error: "invalid metrics payload".to_string(),
    })?;

    let usage = payload.usage();
    Ok(MetricsSample {
        instance_id: id,
        status: HealthState::from_reported(payload.status.as_deref()),
        cpu_percent: usage.cpu_percent,
        memory_mb: usage.memory_mb,
        memory_percent: usage.memory_percent,
        request_count: payload.requests.total,
        latency_ms: millis(outcome.latency()),
    })
}

/// One concurrent probe per instance, merged by id.
///
/// With a `deadline`, probes still running when it fires are abandoned and
/// recorded as timeouts; the fan-out is then marked partial.
async fn scatter(
    instances: &[Instance],
    probe: Probe,
    verb: Verb,
    path: &str,
    deadline: Option<Duration>,
) -> Fanout {
    let started = Instant::now();
    let mut set = JoinSet::new();

    for inst in instances {
        let id = inst.id;
        let address = inst.address.clone();
        let path = path.to_string();
        set.spawn(async move {
            let outcome = match verb {
                Verb::Get => probe.get(&address, &path).await,
                Verb::Post => probe.post(&address, &path).await,
            };
            (id, outcome)
        });
    }

    let mut outcomes = BTreeMap::new();
    let collect = async {
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((id, outcome)) => {
                    outcomes.insert(id, outcome);
                }
                Err(e) => warn!(error = %e, "probe task failed"),
            }
        }
    };

    let partial = match deadline {
        Some(limit) => tokio::time::timeout(limit, collect).await.is_err(),
        None => {
            collect.await;
            false
        }
    };
    set.abort_all();

    if partial {
        warn!(
            %path,
            answered = outcomes.len(),
            total = instances.len(),
            "fan-out deadline reached, abandoning remaining probes"
        );
    }

    for inst in instances {
        outcomes.entry(inst.id).or_insert_with(|| {
            let latency = started.elapsed();
            if partial {
                ProbeOutcome::Timeout { latency }
            } else {
                ProbeOutcome::Failed {
                    reason: "probe aborted".to_string(),
                    latency,
                }
            }
        });
    }

    Fanout { outcomes, partial }
}
