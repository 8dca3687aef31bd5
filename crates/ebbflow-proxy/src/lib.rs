//! ebbflow-proxy — routing table, policies, and request dispatch.
//!
//! # Components
//!
//! - **`table`**: Atomically swapped snapshot of routing targets with
//!   per-target health and latency bookkeeping
//! - **`policy`**: Round-robin and latency-aware selection, switchable
//!   at runtime
//! - **`dispatch`**: Forwarding with a single retry on an alternate target
//! - **`upstream`**: HTTP client side of a forwarded request
//! - **`sync`**: Refreshes the table from the instance registry
//! - **`exposition`**: Prometheus text rendering of routing state

pub mod dispatch;
pub mod error;
pub mod exposition;
pub mod policy;
pub mod sync;
pub mod table;
pub mod upstream;

pub use dispatch::Dispatcher;
pub use error::{DispatchError, UnknownPolicy, UpstreamError};
pub use exposition::render_prometheus;
pub use policy::{Policy, PolicySwitch};
pub use sync::TableSync;
pub use table::{RefreshStats, RoutingSnapshot, RoutingTable, RoutingTarget, TargetView};
pub use upstream::{ForwardRequest, HttpUpstream, Upstream, is_hop_by_hop};
