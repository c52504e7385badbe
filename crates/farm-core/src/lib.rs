//! farm-core — shared vocabulary for the server farm control plane.
//!
//! Holds the immutable instance [`Registry`], the per-poll sample and
//! report types exchanged between the aggregator, the load-test driver and
//! the REST API, the control plane configuration, and the error type used
//! to reject structurally invalid input before any network activity.
//!
//! # Addressing
//!
//! ```text
//! Registry { count: N, host, base_port }
//!   └── resolve(id) → Instance { id, name: "server-{id}", address: host:(base_port + id) }
//! ```
//!
//! The registry is built once at startup. Scaling the farm means building a
//! new registry for the next process, never mutating this one.

pub mod config;
pub mod duration;
pub mod error;
pub mod registry;
pub mod types;
pub mod wire;

pub use config::{FarmConfig, ProbeTimeouts, RegistryConfig, Timeouts};
pub use duration::parse_duration;
pub use error::{FarmError, FarmResult};
pub use registry::{Registry, container_name};
pub use types::*;
