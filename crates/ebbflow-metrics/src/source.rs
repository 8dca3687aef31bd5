//! The metrics source seam and the freshness-aware average.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ebbflow_core::{InstanceId, MetricSample};

use crate::error::MetricsError;

/// Anything that can report the pool's average CPU utilization.
pub trait MetricsSource: Send + Sync + 'static {
    /// Mean utilization (0.0–1.0) over the given instances.
    fn average_utilization(
        &self,
        instance_ids: &[InstanceId],
    ) -> impl Future<Output = Result<f64, MetricsError>> + Send;
}

impl<T: MetricsSource> MetricsSource for Arc<T> {
    fn average_utilization(
        &self,
        instance_ids: &[InstanceId],
    ) -> impl Future<Output = Result<f64, MetricsError>> + Send {
        (**self).average_utilization(instance_ids)
    }
}

/// Average the most recent fresh sample of each requested instance.
///
/// Samples for instances not in `instance_ids` are ignored. An instance
/// contributes only if its newest sample is at most `stale_after` old.
pub fn average_fresh(
    samples: &[MetricSample],
    instance_ids: &[InstanceId],
    now: u64,
    stale_after: Duration,
) -> Result<f64, MetricsError> {
    let mut latest: HashMap<&str, &MetricSample> = HashMap::new();
    for sample in samples {
        if !instance_ids.iter().any(|id| *id == sample.instance_id) {
            continue;
        }
        latest
            .entry(sample.instance_id.as_str())
            .and_modify(|cur| {
                if sample.sampled_at > cur.sampled_at {
                    *cur = sample;
                }
            })
            .or_insert(sample);
    }

    let horizon = now.saturating_sub(stale_after.as_secs());
    let fresh: Vec<f64> = latest
        .values()
        .filter(|s| s.sampled_at >= horizon)
        .map(|s| s.cpu_utilization.clamp(0.0, 1.0))
        .collect();

    if fresh.is_empty() {
        return Err(MetricsError::NoFreshSamples {
            instances: instance_ids.len(),
        });
    }
    Ok(fresh.iter().sum::<f64>() / fresh.len() as f64)
}
