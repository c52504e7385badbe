//! Static instance registry.
//!
//! Maps an instance id to its address by pure arithmetic:
//! `address = host:(base_port + id)`. There is no discovery protocol.

use std::collections::BTreeSet;

use tracing::debug;

use crate::config::RegistryConfig;
use crate::error::{FarmError, FarmResult};
use crate::types::{Instance, InstanceId};

/// Immutable list of instances, built once from `(count, host, base_port)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registry {
    host: String,
    base_port: u16,
    instances: Vec<Instance>,
}

impl Registry {
    /// Build a registry of `count` instances on `host`, ports
    /// `base_port + 1 ..= base_port + count`.
    pub fn new(count: u32, host: impl Into<String>, base_port: u16) -> FarmResult<Self> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(FarmError::Config("registry host is empty".to_string()));
        }
        let last_port = u32::from(base_port)
            .checked_add(count)
            .filter(|p| *p <= u32::from(u16::MAX));
        if last_port.is_none() {
            return Err(FarmError::Config(format!(
                "{count} instances from base port {base_port} overflow the port range"
            )));
        }

        let instances = (1..=count)
            .map(|id| {
                let port = base_port + id as u16;
                Instance {
                    id,
                    name: container_name(id),
                    host: host.clone(),
                    port,
                    address: format!("{host}:{port}"),
                }
            })
            .collect();

        debug!(count, %host, base_port, "registry built");
        Ok(Self {
            host,
            base_port,
            instances,
        })
    }

    /// Build from the `[registry]` configuration section.
    pub fn from_config(config: &RegistryConfig) -> FarmResult<Self> {
        Self::new(config.count, config.host.clone(), config.base_port)
    }

    /// Resolve an id to its instance.
    pub fn resolve(&self, id: InstanceId) -> FarmResult<&Instance> {
        if id == 0 {
            return Err(FarmError::NotFound(id));
        }
        self.instances
            .get(id as usize - 1)
            .ok_or(FarmError::NotFound(id))
    }

    /// Resolve a list of ids, preserving order.
    ///
    /// All ids are validated before anything is returned; every invalid id
    /// is reported in one error.
    pub fn select(&self, ids: &[InstanceId]) -> FarmResult<Vec<Instance>> {
        let invalid: BTreeSet<InstanceId> = ids
            .iter()
            .copied()
            .filter(|id| !self.contains(*id))
            .collect();
        if !invalid.is_empty() {
            return Err(FarmError::InvalidIds(invalid.into_iter().collect()));
        }
        Ok(ids
            .iter()
            .map(|id| self.instances[*id as usize - 1].clone())
            .collect())
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        id >= 1 && (id as usize) <= self.instances.len()
    }

    /// All instances, ordered by id.
    pub fn all(&self) -> &[Instance] {
        &self.instances
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn base_port(&self) -> u16 {
        self.base_port
    }

    /// First and last port in use, if any instances are registered.
    pub fn port_range(&self) -> Option<(u16, u16)> {
        Some((self.instances.first()?.port, self.instances.last()?.port))
    }
}

/// Container name for an instance id.
pub fn container_name(id: InstanceId) -> String {
    format!("server-{id}")
}
