//! Routing table synchronization. Bridges the instance registry to the
//! routing table.
//!
//! `TableSync` lists the managed instances and hands them to
//! [`RoutingTable::apply`], which swaps in a new snapshot while keeping
//! the health and latency state of instances that are still running.
//! Besides the fixed interval, a refresh can be requested through a
//! shared [`Notify`], which the autoscaler signals after it resizes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use ebbflow_runtime::{ContainerRuntime, InstanceRegistry, RuntimeError};

use crate::table::{RefreshStats, RoutingTable};

pub struct TableSync<R> {
    registry: Arc<InstanceRegistry<R>>,
    table: Arc<RoutingTable>,
    trigger: Option<Arc<Notify>>,
}

impl<R: ContainerRuntime> TableSync<R> {
    pub fn new(registry: Arc<InstanceRegistry<R>>, table: Arc<RoutingTable>) -> Self {
        Self {
            registry,
            table,
            trigger: None,
        }
    }

    /// Also refresh whenever `trigger` is notified.
    pub fn with_trigger(mut self, trigger: Arc<Notify>) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn table(&self) -> &Arc<RoutingTable> {
        &self.table
    }

    /// Pull the registry and publish the result as the next snapshot.
    ///
    /// A failed listing leaves the current snapshot in place.
    pub async fn refresh(&self) -> Result<RefreshStats, RuntimeError> {
        let instances = self.registry.list().await?;
        if instances.is_empty() {
            warn!("no backend instances found");
        }
        Ok(self.table.apply(&instances))
    }

    /// Refresh on a fixed interval, and on every trigger, until shutdown
    /// is signalled.
    pub async fn run(&self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "routing table sync started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh().await {
                        warn!(error = %e, "routing table refresh failed, keeping current snapshot");
                    }
                }
                _ = triggered(self.trigger.as_deref()) => {
                    debug!("routing table refresh requested");
                    if let Err(e) = self.refresh().await {
                        warn!(error = %e, "routing table refresh failed, keeping current snapshot");
                    }
                }
                _ = shutdown.changed() => {
                    info!("routing table sync shutting down");
                    break;
                }
            }
        }
    }
}

async fn triggered(trigger: Option<&Notify>) {
    match trigger {
        Some(trigger) => trigger.notified().await,
        None => std::future::pending().await,
    }
}
