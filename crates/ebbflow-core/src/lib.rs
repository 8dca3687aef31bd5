//! ebbflow-core — shared types and configuration for the ebbflow control plane.
//!
//! The autoscaler and the load balancer agree on a small vocabulary:
//! an [`Instance`] is one running container of the managed backend
//! service, and a [`MetricSample`] is one CPU reading for it. Everything
//! else (routing state, scaling state) lives in the crate that owns it.
//!
//! Configuration is read from `ebbflow.toml` and validated once at
//! startup via [`EbbflowConfig::validate`].

pub mod config;
pub mod duration;
pub mod error;
pub mod types;

pub use config::{AutoscalerConfig, BalancerConfig, EbbflowConfig, MetricsConfig, RuntimeConfig};
pub use duration::{epoch_secs, parse_duration};
pub use error::{ConfigError, ConfigResult};
pub use types::*;
