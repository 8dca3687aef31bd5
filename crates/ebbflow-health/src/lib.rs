//! ebbflow-health — recovery probing for the load balancer.
//!
//! The dispatcher takes targets out of rotation on repeated forwarding
//! failures; this crate brings them back.
//!
//! # Architecture
//!
//! ```text
//! HealthMonitor
//!   ├── RoutingTable::unhealthy_targets()
//!   ├── ProbeBackoff per target (base interval → 60s)
//!   ├── HealthChecker::check() → ProbeResult (pooled hyper-util client)
//!   └── RoutingTable::mark_healthy() on a 2xx
//! ```
//!
//! A single passing probe restores the target and resets its backoff.

pub mod checker;
pub mod monitor;

pub use checker::{HealthChecker, ProbeBackoff, ProbeResult};
pub use monitor::{HealthMonitor, ProbeRound};
