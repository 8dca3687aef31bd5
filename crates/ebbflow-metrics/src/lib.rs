//! ebbflow-metrics — the autoscaler's view of the metrics store.
//!
//! Two directions:
//!
//! ```text
//! InstanceRegistry ──► TargetPublisher ──► discovery file ──► Prometheus scrapes
//!                                                                   │
//! AutoscaleController ◄── average_utilization() ◄── PrometheusSource ◄┘
//! ```
//!
//! # Staleness
//!
//! An instance whose most recent sample is older than `stale_after` is
//! left out of the average instead of counting as idle; a freshly started
//! container that has not been scraped yet must not drag the mean down
//! and trigger a scale-down. When no instance has a fresh sample the
//! source reports [`MetricsError`] and the controller skips the tick.

pub mod discovery;
pub mod error;
pub mod prometheus;
pub mod source;

pub use discovery::{PublishOutcome, TargetPublisher};
pub use error::{MetricsError, PublishError};
pub use prometheus::PrometheusSource;
pub use source::{MetricsSource, average_fresh};
