//! farm-docker — lifecycle control of the farm's containers.
//!
//! The control plane talks to containers only through [`ContainerControl`],
//! so it can run without a container runtime (actions are refused, listing
//! falls back to HTTP probes) and tests can substitute a fake.
//!
//! ```text
//! ContainerControl (async-trait, object safe)
//!   ├── apply(name, start|stop|restart)
//!   ├── state(name) → running | stopped | unknown
//!   └── usage(name) → cpu / memory from a one-shot stats read
//!
//! DockerControl ── bollard ──→ Engine API (unix socket or http)
//! ```

pub mod docker;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use farm_core::{InstanceStatus, ResourceUsage};

pub use docker::DockerControl;

/// Lifecycle action on one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerAction {
    Start,
    Stop,
    Restart,
}

impl ContainerAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ContainerAction::Start => "start",
            ContainerAction::Stop => "stop",
            ContainerAction::Restart => "restart",
        }
    }
}

impl fmt::Display for ContainerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerAction {
    type Err = ContainerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(ContainerAction::Start),
            "stop" => Ok(ContainerAction::Stop),
            "restart" => Ok(ContainerAction::Restart),
            _ => Err(ContainerError::UnknownAction(s.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContainerError {
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    #[error("container {0} not found")]
    NotFound(String),

    #[error("unknown action {0:?}, expected start, stop or restart")]
    UnknownAction(String),

    #[error("container runtime error: {0}")]
    Runtime(String),
}

/// Container lifecycle operations used by the control plane.
#[async_trait]
pub trait ContainerControl: Send + Sync {
    async fn apply(&self, name: &str, action: ContainerAction) -> Result<(), ContainerError>;

    async fn state(&self, name: &str) -> Result<InstanceStatus, ContainerError>;

    /// Current usage, if the runtime exposes it.
    async fn usage(&self, _name: &str) -> Result<Option<ResourceUsage>, ContainerError> {
        Ok(None)
    }
}
