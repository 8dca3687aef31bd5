//! Health monitor: background task that re-tests out-of-rotation targets.
//!
//! The dispatcher takes a target out of rotation after repeated
//! forwarding failures. Each round the monitor probes those targets that
//! are due and puts the ones that answer back into rotation, without
//! waiting for the next routing table refresh.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use ebbflow_core::{BalancerConfig, InstanceId};
use ebbflow_proxy::{RoutingTable, RoutingTarget};

use crate::checker::{HealthChecker, ProbeBackoff, ProbeResult};

/// Per-target probe pacing.
struct ProbeSlot {
    backoff: ProbeBackoff,
    due: Instant,
}

/// What one probe round did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProbeRound {
    pub probed: usize,
    pub restored: usize,
}

pub struct HealthMonitor {
    table: Arc<RoutingTable>,
    checker: HealthChecker,
    interval: Duration,
    /// Pacing state of unhealthy targets, by instance.
    slots: HashMap<InstanceId, ProbeSlot>,
}

impl HealthMonitor {
    pub fn new(table: Arc<RoutingTable>, path: impl Into<String>, interval: Duration, timeout: Duration) -> Self {
        Self {
            table,
            checker: HealthChecker::new(path, timeout),
            interval,
            slots: HashMap::new(),
        }
    }

    pub fn from_config(table: Arc<RoutingTable>, config: &BalancerConfig) -> Self {
        Self::new(
            table,
            config.probe_path.clone(),
            config.probe_interval(),
            config.probe_timeout(),
        )
    }

    /// Probe every unhealthy target that is due, concurrently.
    pub async fn probe_round(&mut self) -> ProbeRound {
        let unhealthy = self.table.unhealthy_targets();
        // Forget targets that recovered or left the pool.
        self.slots
            .retain(|id, _| unhealthy.iter().any(|t| t.instance_id == *id));

        let now = Instant::now();
        let base = self.interval;
        let mut probes: JoinSet<(Arc<RoutingTarget>, ProbeResult)> = JoinSet::new();
        for target in unhealthy {
            let slot = self
                .slots
                .entry(target.instance_id.clone())
                .or_insert_with(|| ProbeSlot {
                    backoff: ProbeBackoff::new(base),
                    due: now,
                });
            if slot.due > now {
                continue;
            }
            let checker = self.checker.clone();
            probes.spawn(async move {
                let result = checker.check(&target.address).await;
                (target, result)
            });
        }

        let mut round = ProbeRound::default();
        while let Some(joined) = probes.join_next().await {
            let (target, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "health probe task failed");
                    continue;
                }
            };
            round.probed += 1;

            let Some(slot) = self.slots.get_mut(&target.instance_id) else {
                continue;
            };
            if slot.backoff.record(result) {
                self.table.mark_healthy(&target);
                self.slots.remove(&target.instance_id);
                round.restored += 1;
            } else {
                slot.due = Instant::now() + slot.backoff.next_interval();
                debug!(
                    address = %target.address,
                    ?result,
                    failures = slot.backoff.failures(),
                    next_in = ?slot.backoff.next_interval(),
                    "target still failing probes"
                );
            }
        }
        round
    }

    /// Run probe rounds until shutdown is signalled.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            path = %self.checker.path(),
            interval_secs = self.interval.as_secs(),
            "health monitor started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let round = self.probe_round().await;
                    if round.probed > 0 {
                        debug!(probed = round.probed, restored = round.restored, "probe round complete");
                    }
                }
                _ = shutdown.changed() => {
                    info!("health monitor shutting down");
                    break;
                }
            }
        }
    }
}
