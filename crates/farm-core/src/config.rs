//! farm.toml configuration for the control plane.
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:8000"
//!
//! [registry]
//! count = 50
//! host = "127.0.0.1"
//! base_port = 8000
//!
//! [timeouts]
//! health = "5s"
//! metrics = "10s"
//!
//! [load_test]
//! max_requests_per_target = 100000
//! policy = "global"
//!
//! [docker]
//! enabled = true
//! ```
//!
//! Every section and key is optional; CLI flags override file values.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;
use crate::error::{FarmError, FarmResult};
use crate::types::ConcurrencyPolicy;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FarmConfig {
    pub server: ServerConfig,
    pub registry: RegistryConfig,
    pub timeouts: ProbeTimeouts,
    pub load_test: LoadTestConfig,
    pub docker: DockerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    /// Number of instances, ids `1..=count`.
    pub count: u32,
    pub host: String,
    /// Instance `id` listens on `base_port + id`.
    pub base_port: u16,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            count: 50,
            host: "127.0.0.1".to_string(),
            base_port: 8000,
        }
    }
}

/// Per-call timeouts, as duration strings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProbeTimeouts {
    pub health: String,
    pub metrics: String,
    pub broadcast: String,
    pub listing: String,
    pub load_test: String,
    pub simulate_load: String,
    /// Deadline around a whole poll or broadcast. Empty means none.
    pub fanout_deadline: String,
}

impl Default for ProbeTimeouts {
    fn default() -> Self {
        Self {
            health: "5s".to_string(),
            metrics: "10s".to_string(),
            broadcast: "5s".to_string(),
            listing: "2s".to_string(),
            load_test: "30s".to_string(),
            simulate_load: "30s".to_string(),
            fanout_deadline: String::new(),
        }
    }
}

/// [`ProbeTimeouts`] parsed into durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub health: Duration,
    pub metrics: Duration,
    pub broadcast: Duration,
    pub listing: Duration,
    pub load_test: Duration,
    pub simulate_load: Duration,
    pub fanout_deadline: Option<Duration>,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            health: Duration::from_secs(5),
            metrics: Duration::from_secs(10),
            broadcast: Duration::from_secs(5),
            listing: Duration::from_secs(2),
            load_test: Duration::from_secs(30),
            simulate_load: Duration::from_secs(30),
            fanout_deadline: None,
        }
    }
}

impl ProbeTimeouts {
    pub fn resolve(&self) -> FarmResult<Timeouts> {
        let deadline = if self.fanout_deadline.trim().is_empty() {
            None
        } else {
            Some(required("fanout_deadline", &self.fanout_deadline)?)
        };
        Ok(Timeouts {
            health: required("health", &self.health)?,
            metrics: required("metrics", &self.metrics)?,
            broadcast: required("broadcast", &self.broadcast)?,
            listing: required("listing", &self.listing)?,
            load_test: required("load_test", &self.load_test)?,
            simulate_load: required("simulate_load", &self.simulate_load)?,
            fanout_deadline: deadline,
        })
    }
}

fn required(key: &str, value: &str) -> FarmResult<Duration> {
    match parse_duration(value) {
        Some(d) if !d.is_zero() => Ok(d),
        _ => Err(FarmError::Config(format!(
            "timeouts.{key}: expected a duration like \"5s\", got {value:?}"
        ))),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoadTestConfig {
    /// Requests per target above this are rejected before the test starts.
    pub max_requests_per_target: u32,
    /// Policy used when a request does not name one.
    pub policy: ConcurrencyPolicy,
}

impl Default for LoadTestConfig {
    fn default() -> Self {
        Self {
            max_requests_per_target: 100_000,
            policy: ConcurrencyPolicy::Global,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DockerConfig {
    pub enabled: bool,
    /// Engine socket, e.g. `unix:///var/run/docker.sock`. Empty uses the
    /// client defaults (`DOCKER_HOST` or the platform socket).
    pub socket: String,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            socket: String::new(),
        }
    }
}

impl FarmConfig {
    pub fn from_file(path: &Path) -> FarmResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FarmError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> FarmResult<Self> {
        let config: FarmConfig =
            toml::from_str(content).map_err(|e| FarmError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> FarmResult<()> {
        self.timeouts.resolve()?;
        if self.load_test.max_requests_per_target == 0 {
            return Err(FarmError::Config(
                "load_test.max_requests_per_target must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_farm_layout() {
        let config = FarmConfig::default();
        assert_eq!(config.server.bind, "0.0.0.0:8000");
        assert_eq!(config.registry.count, 50);
        assert_eq!(config.registry.base_port, 8000);
        let t = config.timeouts.resolve().unwrap();
        assert_eq!(t.health, Duration::from_secs(5));
        assert_eq!(t.metrics, Duration::from_secs(10));
        assert_eq!(t.fanout_deadline, None);
        assert_eq!(Timeouts::default(), t);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config = FarmConfig::from_toml(
            r#"
            [registry]
            count = 3
            base_port = 9000

            [timeouts]
            health = "500ms"
            fanout_deadline = "8s"

            [load_test]
            policy = "per_target"
            "#,
        )
        .unwrap();
        assert_eq!(config.registry.count, 3);
        assert_eq!(config.registry.host, "127.0.0.1");
        let t = config.timeouts.resolve().unwrap();
        assert_eq!(t.health, Duration::from_millis(500));
        assert_eq!(t.metrics, Duration::from_secs(10));
        assert_eq!(t.fanout_deadline, Some(Duration::from_secs(8)));
        assert_eq!(config.load_test.policy, ConcurrencyPolicy::PerTarget);
    }

    #[test]
    fn bad_duration_is_rejected() {
        let err = FarmConfig::from_toml("[timeouts]\nhealth = \"fast\"\n").unwrap_err();
        assert!(err.to_string().contains("timeouts.health"));

        let err = FarmConfig::from_toml("[timeouts]\nmetrics = \"0s\"\n").unwrap_err();
        assert!(err.to_string().contains("timeouts.metrics"));
    }

    #[test]
    fn zero_request_cap_is_rejected() {
        assert!(FarmConfig::from_toml("[load_test]\nmax_requests_per_target = 0\n").is_err());
    }

    #[test]
    fn from_file_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[docker]\nenabled = false").unwrap();
        let config = FarmConfig::from_file(file.path()).unwrap();
        assert!(!config.docker.enabled);
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = FarmConfig::from_file(Path::new("/nonexistent/farm.toml")).unwrap_err();
        assert!(matches!(err, FarmError::Config(_)));
    }
}
