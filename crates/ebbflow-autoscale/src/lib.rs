//! ebbflow-autoscale — CPU-driven instance scaling.
//!
//! Reads the pool's average CPU utilization from a [`MetricsSource`],
//! compares it against `cpu_threshold`, and moves the instance count one
//! step at a time within `[min_instances, max_instances]`.
//!
//! # Scaling Algorithm
//!
//! ```text
//! if count < min or count > max:
//!     ScaleTo(nearest bound)             // no metrics consulted
//!
//! if avg > threshold and count < max:    ScaleTo(count + 1)
//! if avg < threshold and count > min:    ScaleTo(count - 1)   // newest evicted
//! otherwise:                             NoChange
//! ```
//!
//! After a completed action the next `cooldown_ticks` ticks are skipped.
//! A metrics or runtime failure makes the tick a no-op; nothing is retried
//! until the next interval.
//!
//! [`MetricsSource`]: ebbflow_metrics::MetricsSource

pub mod scaler;
pub mod state;

pub use scaler::{Autoscaler, TickOutcome};
pub use state::{ControllerPhase, ScaleDecision, ScalingState};
