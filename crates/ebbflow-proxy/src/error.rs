use std::time::Duration;

/// A single forwarding attempt to one target failed.
///
/// Only transport-level problems land here. An upstream that answers,
/// even with a 5xx, has served the request.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("connecting to {address} failed: {message}")]
    Connect { address: String, message: String },

    #[error("{address} did not answer within {timeout:?}")]
    Timeout { address: String, timeout: Duration },

    #[error("request to {address} failed: {message}")]
    Request { address: String, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no healthy targets available")]
    NoTargetsAvailable,

    #[error("upstream failed after {attempts} attempt(s): {source}")]
    Upstream {
        attempts: u32,
        #[source]
        source: UpstreamError,
    },
}

/// A policy name outside the supported set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown policy {name:?}")]
pub struct UnknownPolicy {
    pub name: String,
}
