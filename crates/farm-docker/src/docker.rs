//! Docker Engine implementation of [`ContainerControl`] using bollard.

use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    InspectContainerOptions, RestartContainerOptions, StartContainerOptions, Stats, StatsOptions,
    StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::models::ContainerStateStatusEnum;
use bollard::{API_DEFAULT_VERSION, Docker};
use futures::StreamExt;
use tracing::{debug, info, warn};

use farm_core::{InstanceStatus, ResourceUsage};

use crate::{ContainerAction, ContainerControl, ContainerError};

/// Engine client timeout, seconds.
const CLIENT_TIMEOUT_SECS: u64 = 120;

/// Containers managed through a local or remote Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerControl {
    docker: Docker,
}

impl DockerControl {
    /// Connect and ping the daemon.
    ///
    /// `endpoint` is a `unix://` socket path or an `http://`/`tcp://` URL;
    /// empty uses `DOCKER_HOST` or the platform default socket.
    pub async fn connect(endpoint: &str, ping_timeout: Duration) -> Result<Self, ContainerError> {
        let docker = if endpoint.is_empty() {
            Docker::connect_with_socket_defaults()
        } else if endpoint.starts_with("unix://") || endpoint.starts_with('/') {
            Docker::connect_with_socket(endpoint, CLIENT_TIMEOUT_SECS, API_DEFAULT_VERSION)
        } else {
            Docker::connect_with_http(endpoint, CLIENT_TIMEOUT_SECS, API_DEFAULT_VERSION)
        }
        .map_err(|e| ContainerError::Unavailable(format!("connect: {e}")))?;

        match tokio::time::timeout(ping_timeout, docker.ping()).await {
            Ok(Ok(_)) => {
                info!(endpoint = %display_endpoint(endpoint), "connected to docker daemon");
                Ok(Self { docker })
            }
            Ok(Err(e)) => Err(ContainerError::Unavailable(format!("ping: {e}"))),
            Err(_) => Err(ContainerError::Unavailable("ping timed out".to_string())),
        }
    }
}

fn display_endpoint(endpoint: &str) -> &str {
    if endpoint.is_empty() { "default" } else { endpoint }
}

#[async_trait]
impl ContainerControl for DockerControl {
    async fn apply(&self, name: &str, action: ContainerAction) -> Result<(), ContainerError> {
        let result = match action {
            ContainerAction::Start => {
                self.docker
                    .start_container(name, None::<StartContainerOptions<String>>)
                    .await
            }
            ContainerAction::Stop => {
                self.docker
                    .stop_container(name, None::<StopContainerOptions>)
                    .await
            }
            ContainerAction::Restart => {
                self.docker
                    .restart_container(name, None::<RestartContainerOptions>)
                    .await
            }
        };

        match result {
            Ok(()) => {
                info!(container = %name, %action, "container action applied");
                Ok(())
            }
            // Already in the requested state.
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => {
                debug!(container = %name, %action, "container already in requested state");
                Ok(())
            }
            Err(e) => {
                warn!(container = %name, %action, error = %e, "container action failed");
                Err(map_error(name, e))
            }
        }
    }

    async fn state(&self, name: &str) -> Result<InstanceStatus, ContainerError> {
        let inspect = self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
            .map_err(|e| map_error(name, e))?;
        Ok(status_from(inspect.state.and_then(|s| s.status)))
    }

    async fn usage(&self, name: &str) -> Result<Option<ResourceUsage>, ContainerError> {
        let mut stream = self.docker.stats(
            name,
            Some(StatsOptions {
                stream: false,
                one_shot: false,
            }),
        );
        match stream.next().await {
            Some(Ok(stats)) => Ok(Some(usage_from_stats(&stats))),
            Some(Err(e)) => Err(map_error(name, e)),
            None => Ok(None),
        }
    }
}

fn map_error(name: &str, err: BollardError) -> ContainerError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404, ..
        } => ContainerError::NotFound(name.to_string()),
        other => ContainerError::Runtime(other.to_string()),
    }
}

fn status_from(state: Option<ContainerStateStatusEnum>) -> InstanceStatus {
    match state {
        Some(ContainerStateStatusEnum::RUNNING | ContainerStateStatusEnum::RESTARTING) => {
            InstanceStatus::Running
        }
        Some(
            ContainerStateStatusEnum::CREATED
            | ContainerStateStatusEnum::PAUSED
            | ContainerStateStatusEnum::REMOVING
            | ContainerStateStatusEnum::EXITED
            | ContainerStateStatusEnum::DEAD,
        ) => InstanceStatus::Stopped,
        _ => InstanceStatus::Unknown,
    }
}

fn usage_from_stats(stats: &Stats) -> ResourceUsage {
    compute_usage(
        (
            stats.cpu_stats.cpu_usage.total_usage,
            stats.precpu_stats.cpu_usage.total_usage,
        ),
        (
            stats.cpu_stats.system_cpu_usage.unwrap_or(0),
            stats.precpu_stats.system_cpu_usage.unwrap_or(0),
        ),
        stats.memory_stats.usage.unwrap_or(0),
        stats.memory_stats.limit.unwrap_or(0),
    )
}

/// CPU percent from the container/system usage deltas between two reads;
/// memory from usage over limit.
fn compute_usage(
    (cpu_now, cpu_prev): (u64, u64),
    (sys_now, sys_prev): (u64, u64),
    memory_usage: u64,
    memory_limit: u64,
) -> ResourceUsage {
    let cpu_delta = cpu_now.saturating_sub(cpu_prev) as f64;
    let sys_delta = sys_now.saturating_sub(sys_prev) as f64;
    let cpu_percent = if sys_delta > 0.0 {
        cpu_delta / sys_delta * 100.0
    } else {
        0.0
    };
    let memory_percent = if memory_limit > 0 {
        memory_usage as f64 / memory_limit as f64 * 100.0
    } else {
        0.0
    };

    ResourceUsage {
        cpu_percent: round2(cpu_percent),
        memory_mb: round2(memory_usage as f64 / (1024.0 * 1024.0)),
        memory_percent: round2(memory_percent),
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
