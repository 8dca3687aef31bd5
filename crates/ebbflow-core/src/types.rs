//! Domain types shared by the autoscaler and the load balancer.

use serde::{Deserialize, Serialize};

/// Stable identifier of a backend instance (the container ID).
pub type InstanceId = String;

/// One running unit of the managed backend service.
///
/// Instances are owned by the instance registry and are never edited in
/// place: every registry listing produces fresh values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Instance {
    pub id: InstanceId,
    /// Container name, for logs and status output.
    pub name: String,
    /// Dispatch address (`ip:port`).
    pub address: String,
    /// Unix timestamp (seconds) when the container was created.
    pub created_at: u64,
}

impl Instance {
    /// First 12 characters of the ID, the way container runtimes print it.
    pub fn short_id(&self) -> &str {
        let end = self
            .id
            .char_indices()
            .nth(12)
            .map(|(i, _)| i)
            .unwrap_or(self.id.len());
        &self.id[..end]
    }
}

/// A single CPU reading for one instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSample {
    pub instance_id: InstanceId,
    /// CPU utilization normalised to 0.0–1.0.
    pub cpu_utilization: f64,
    /// Unix timestamp (seconds) of the sample.
    pub sampled_at: u64,
}

/// Order instances by creation time, oldest first.
///
/// Ties are broken by ID so the order is total and stable across listings.
pub fn sort_by_creation(instances: &mut [Instance]) {
    instances.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}
