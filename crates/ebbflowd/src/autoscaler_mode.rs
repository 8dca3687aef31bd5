//! Autoscaler mode: the decision loop over Docker and Prometheus.
//!
//! 1. Connect the metrics source and the discovery publisher
//! 2. Log the pool the controller starts from
//! 3. Tick until shutdown

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::{Notify, watch};
use tracing::{info, warn};

use ebbflow_autoscale::Autoscaler;
use ebbflow_core::EbbflowConfig;
use ebbflow_metrics::{PrometheusSource, TargetPublisher};
use ebbflow_runtime::{DockerRuntime, InstanceRegistry};

pub async fn run_autoscaler(
    config: &EbbflowConfig,
    registry: Arc<InstanceRegistry<DockerRuntime>>,
    scaled: Option<Arc<Notify>>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let metrics = PrometheusSource::new(&config.metrics, &config.runtime)
        .context("configuring the metrics source")?;
    info!(url = %config.metrics.prometheus_url, "metrics source configured");

    let publisher = TargetPublisher::new(
        &config.metrics.discovery_file,
        &config.runtime.label,
        &config.runtime.service,
    );
    info!(path = %publisher.path().display(), "discovery publisher configured");

    // The runtime may come up after us; the loop retries on every tick.
    match registry.list().await {
        Ok(instances) => info!(running = instances.len(), image = %config.runtime.image, "initial pool"),
        Err(e) => warn!(error = %e, "container runtime unreachable at startup"),
    }

    let mut autoscaler = Autoscaler::new(registry, metrics, &config.autoscaler).with_publisher(publisher);
    if let Some(scaled) = scaled {
        autoscaler = autoscaler.with_scale_notify(scaled);
    }
    autoscaler
        .run(config.autoscaler.check_interval(), shutdown)
        .await;
    Ok(())
}
