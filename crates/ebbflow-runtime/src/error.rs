//! Container runtime and scaling errors.

use std::time::Duration;

use thiserror::Error;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors talking to the container runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime unreachable: {0}")]
    Connect(String),

    #[error("runtime request failed: {0}")]
    Request(String),

    #[error("runtime returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("unexpected runtime response: {0}")]
    Decode(String),

    #[error("runtime call timed out after {0:?}")]
    Timeout(Duration),
}

/// A scale request that the runtime rejected or did not finish in time.
///
/// Always transient from the controller's point of view: the next tick
/// lists the runtime again and decides from what actually exists.
#[derive(Debug, Error)]
pub enum ScaleError {
    #[error("scale to {target} failed: {source}")]
    Runtime {
        target: u32,
        #[source]
        source: RuntimeError,
    },

    #[error("scale to {target} timed out after {timeout:?}")]
    Timeout { target: u32, timeout: Duration },
}
