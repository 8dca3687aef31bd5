//! Balancer mode: routing table, health monitor, and the HTTP listener.
//!
//! The table is filled once before the listener binds so the first
//! request already sees the pool. On shutdown the listener stops
//! accepting, in-flight requests get `balancer.drain_grace` to finish,
//! then the rest are dropped. When `scaled` is given, the table is also
//! refreshed each time it is notified.

use std::future::IntoFuture;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::{Notify, watch};
use tracing::{info, warn};

use ebbflow_api::{ApiState, LoadGenerator, build_router};
use ebbflow_core::EbbflowConfig;
use ebbflow_health::HealthMonitor;
use ebbflow_proxy::{Dispatcher, HttpUpstream, Policy, PolicySwitch, RoutingTable, TableSync};
use ebbflow_runtime::{ContainerRuntime, InstanceRegistry};

pub async fn run_balancer<R: ContainerRuntime>(
    config: &EbbflowConfig,
    registry: Arc<InstanceRegistry<R>>,
    scaled: Option<Arc<Notify>>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let balancer = &config.balancer;
    let policy: Policy = balancer.policy.parse().context("balancer.policy")?;

    // ── Routing table ────────────────────────────────────────────
    let table = Arc::new(RoutingTable::from_config(balancer));
    let mut sync = TableSync::new(registry, Arc::clone(&table));
    if let Some(scaled) = scaled {
        sync = sync.with_trigger(scaled);
    }
    let sync = Arc::new(sync);
    match sync.refresh().await {
        Ok(stats) => info!(targets = stats.added, "routing table loaded"),
        Err(e) => warn!(error = %e, "initial routing table refresh failed, starting empty"),
    }

    // ── Background tasks ─────────────────────────────────────────
    let sync_handle = tokio::spawn({
        let sync = Arc::clone(&sync);
        let interval = balancer.refresh_interval();
        let shutdown = shutdown.clone();
        async move { sync.run(interval, shutdown).await }
    });

    let mut monitor = HealthMonitor::from_config(Arc::clone(&table), balancer);
    let health_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { monitor.run(shutdown).await }
    });

    // ── HTTP listener ────────────────────────────────────────────
    let dispatcher = Arc::new(Dispatcher::new(
        table,
        Arc::new(PolicySwitch::new(policy)),
        HttpUpstream::new(balancer.upstream_timeout()),
    ));
    let loadgen = Arc::new(LoadGenerator::new(
        balancer.loadgen_concurrency,
        balancer.loadgen_path.clone(),
    ));
    let router = build_router(ApiState::new(
        dispatcher,
        Arc::clone(&loadgen),
        balancer.max_body_bytes,
    ));

    let listener = tokio::net::TcpListener::bind(&balancer.listen)
        .await
        .with_context(|| format!("binding {}", balancer.listen))?;
    info!(addr = %balancer.listen, policy = policy.name(), "load balancer listening");

    let server = axum::serve(listener, router)
        .with_graceful_shutdown({
            let mut shutdown = shutdown.clone();
            async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            }
        })
        .into_future();

    let grace = balancer.drain_grace();
    let drain_deadline = {
        let mut shutdown = shutdown.clone();
        async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
            tokio::time::sleep(grace).await;
        }
    };

    tokio::select! {
        served = server => served.context("serving http")?,
        _ = drain_deadline => {
            warn!(grace_secs = grace.as_secs(), "drain grace elapsed, dropping in-flight requests");
        }
    }

    loadgen.stop();
    let _ = sync_handle.await;
    let _ = health_handle.await;
    info!("load balancer stopped");
    Ok(())
}
