//! Error types for the control plane core.

use thiserror::Error;

/// Result type alias for operations that validate caller input.
pub type FarmResult<T> = Result<T, FarmError>;

/// Errors raised before any request leaves the control plane.
///
/// Per-instance failures (timeouts, refused connections, non-2xx replies)
/// are never errors; they are folded into reports as probe outcomes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FarmError {
    #[error("server {0} not found")]
    NotFound(u32),

    #[error("invalid server ids: {0:?}")]
    InvalidIds(Vec<u32>),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}
