//! Routing table: the dispatchable view of the backend pool.
//!
//! The current target set lives behind an `ArcSwap`: a request loads one
//! immutable [`RoutingSnapshot`] with a single atomic read, and a refresh
//! builds the next snapshot off to the side and swaps it in whole.
//! Per-target health and latency bookkeeping sits on the shared
//! [`RoutingTarget`] records, so it survives refreshes that keep the
//! instance.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use ebbflow_core::{BalancerConfig, Instance, InstanceId};

/// One backend instance plus its live routing bookkeeping.
#[derive(Debug)]
pub struct RoutingTarget {
    pub instance_id: InstanceId,
    /// Container name, for status output.
    pub name: String,
    pub address: String,
    consecutive_failures: AtomicU32,
    healthy: AtomicBool,
    ema_latency_ms: Mutex<f64>,
    requests: AtomicU64,
    failures: AtomicU64,
}

impl RoutingTarget {
    pub fn new(instance: &Instance, neutral_latency_ms: f64) -> Self {
        Self {
            instance_id: instance.id.clone(),
            name: instance.name.clone(),
            address: instance.address.clone(),
            consecutive_failures: AtomicU32::new(0),
            healthy: AtomicBool::new(true),
            ema_latency_ms: Mutex::new(neutral_latency_ms),
            requests: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn ema_latency_ms(&self) -> f64 {
        *self.ema_latency_ms.lock()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    fn record_success(&self, latency_ms: f64, alpha: f64) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Release);
        let mut ema = self.ema_latency_ms.lock();
        *ema = alpha * latency_ms + (1.0 - alpha) * *ema;
    }

    /// Count a failure; returns true if this one took the target out.
    fn record_failure(&self, threshold: u32) -> bool {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.failures.fetch_add(1, Ordering::Relaxed);
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        failures >= threshold && self.healthy.swap(false, Ordering::AcqRel)
    }

    fn restore(&self) -> bool {
        self.consecutive_failures.store(0, Ordering::Release);
        !self.healthy.swap(true, Ordering::AcqRel)
    }

    pub fn view(&self) -> TargetView {
        TargetView {
            instance_id: self.instance_id.clone(),
            name: self.name.clone(),
            address: self.address.clone(),
            healthy: self.is_healthy(),
            consecutive_failures: self.consecutive_failures(),
            ema_latency_ms: self.ema_latency_ms(),
            requests: self.requests.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a target for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct TargetView {
    pub instance_id: InstanceId,
    pub name: String,
    pub address: String,
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub ema_latency_ms: f64,
    pub requests: u64,
    pub failures: u64,
}

/// Immutable ordered target set taken at one refresh.
#[derive(Debug, Default)]
pub struct RoutingSnapshot {
    pub generation: u64,
    pub targets: Vec<Arc<RoutingTarget>>,
}

impl RoutingSnapshot {
    /// Targets currently eligible for selection, in snapshot order.
    pub fn healthy(&self) -> Vec<&Arc<RoutingTarget>> {
        self.targets.iter().filter(|t| t.is_healthy()).collect()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// What a refresh changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshStats {
    pub added: usize,
    pub removed: usize,
    pub kept: usize,
}

/// Shared, concurrently readable routing state.
pub struct RoutingTable {
    snapshot: ArcSwap<RoutingSnapshot>,
    failure_threshold: u32,
    ema_alpha: f64,
    neutral_latency_ms: f64,
}

impl RoutingTable {
    pub fn new(failure_threshold: u32, ema_alpha: f64, neutral_latency_ms: f64) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(RoutingSnapshot::default()),
            failure_threshold: failure_threshold.max(1),
            ema_alpha,
            neutral_latency_ms,
        }
    }

    pub fn from_config(config: &BalancerConfig) -> Self {
        Self::new(
            config.failure_threshold,
            config.ema_alpha,
            config.neutral_latency_ms,
        )
    }

    /// The current snapshot. Lock-free.
    pub fn snapshot(&self) -> Arc<RoutingSnapshot> {
        self.snapshot.load_full()
    }

    /// Replace the target set with `instances`, keeping the bookkeeping of
    /// every instance that is still present at the same address.
    pub fn apply(&self, instances: &[Instance]) -> RefreshStats {
        let current = self.snapshot.load_full();
        let mut existing: HashMap<&str, &Arc<RoutingTarget>> = current
            .targets
            .iter()
            .map(|t| (t.instance_id.as_str(), t))
            .collect();

        let mut stats = RefreshStats::default();
        let mut targets = Vec::with_capacity(instances.len());
        for inst in instances {
            match existing.remove(inst.id.as_str()) {
                Some(target) if target.address == inst.address => {
                    stats.kept += 1;
                    targets.push(Arc::clone(target));
                }
                _ => {
                    stats.added += 1;
                    debug!(instance = %inst.short_id(), address = %inst.address, "routing target added");
                    targets.push(Arc::new(RoutingTarget::new(inst, self.neutral_latency_ms)));
                }
            }
        }
        stats.removed = current.len() - stats.kept;

        self.snapshot.store(Arc::new(RoutingSnapshot {
            generation: current.generation + 1,
            targets,
        }));

        if stats.added > 0 || stats.removed > 0 {
            info!(
                added = stats.added,
                removed = stats.removed,
                kept = stats.kept,
                "routing table refreshed"
            );
        }
        stats
    }

    /// Record the outcome of one forwarded request.
    ///
    /// Success folds `latency_ms` into the target's moving average and
    /// clears its failure streak. Failure extends the streak and takes the
    /// target out of rotation once it reaches the threshold.
    pub fn record_result(&self, target: &RoutingTarget, latency_ms: f64, success: bool) {
        if success {
            target.record_success(latency_ms, self.ema_alpha);
        } else if target.record_failure(self.failure_threshold) {
            warn!(
                instance = %target.instance_id,
                address = %target.address,
                failures = target.consecutive_failures(),
                "target marked unhealthy"
            );
        }
    }

    /// Put a target back into rotation after a passing probe.
    pub fn mark_healthy(&self, target: &RoutingTarget) {
        if target.restore() {
            info!(instance = %target.instance_id, address = %target.address, "target restored");
        }
    }

    pub fn unhealthy_targets(&self) -> Vec<Arc<RoutingTarget>> {
        self.snapshot
            .load()
            .targets
            .iter()
            .filter(|t| !t.is_healthy())
            .cloned()
            .collect()
    }

    pub fn views(&self) -> Vec<TargetView> {
        self.snapshot.load().targets.iter().map(|t| t.view()).collect()
    }
}
