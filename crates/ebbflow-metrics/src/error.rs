//! Metrics and discovery errors.

use std::time::Duration;

use thiserror::Error;

/// The utilization signal could not be produced this tick.
///
/// Every variant means the same thing to the caller: make no scaling
/// decision. None of them may be read as "utilization is zero".
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metrics store unreachable: {0}")]
    Unreachable(String),

    #[error("metrics query timed out after {0:?}")]
    Timeout(Duration),

    #[error("metrics query rejected: {0}")]
    Query(String),

    #[error("no fresh samples for {instances} instance(s)")]
    NoFreshSamples { instances: usize },
}

/// Writing the discovery file failed.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("discovery file I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("discovery file encoding: {0}")]
    Encode(#[from] serde_json::Error),
}
