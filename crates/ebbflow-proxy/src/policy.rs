//! Routing policies and the runtime switch between them.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use serde::Serialize;
use tracing::info;

use crate::error::UnknownPolicy;
use crate::table::RoutingTarget;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Policy {
    #[serde(rename = "round_robin")]
    RoundRobin,
    #[serde(rename = "latency")]
    LatencyAware,
}

impl Policy {
    pub const ALL: [Policy; 2] = [Policy::RoundRobin, Policy::LatencyAware];

    pub fn name(self) -> &'static str {
        match self {
            Policy::RoundRobin => "round_robin",
            Policy::LatencyAware => "latency",
        }
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|p| p.name()).collect()
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => Policy::LatencyAware,
            _ => Policy::RoundRobin,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Policy::RoundRobin => 0,
            Policy::LatencyAware => 1,
        }
    }

    /// Pick an index into `candidates`, advancing `cursor`.
    ///
    /// Round-robin ignores latency entirely. Latency-aware narrows to the
    /// targets sharing the minimum moving average and round-robins among
    /// them, so equal targets still share the load.
    pub fn select(self, candidates: &[&Arc<RoutingTarget>], cursor: &AtomicUsize) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        let turn = cursor.fetch_add(1, Ordering::Relaxed);
        match self {
            Policy::RoundRobin => Some(turn % candidates.len()),
            Policy::LatencyAware => {
                let latencies: Vec<f64> = candidates.iter().map(|t| t.ema_latency_ms()).collect();
                let min = latencies.iter().copied().fold(f64::INFINITY, f64::min);
                let tied: Vec<usize> = latencies
                    .iter()
                    .enumerate()
                    .filter(|(_, l)| **l <= min)
                    .map(|(i, _)| i)
                    .collect();
                if tied.is_empty() {
                    return Some(turn % candidates.len());
                }
                Some(tied[turn % tied.len()])
            }
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Policy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| UnknownPolicy { name: s.to_string() })
    }
}

/// Process-wide active policy plus the shared round-robin cursor.
pub struct PolicySwitch {
    active: AtomicU8,
    cursor: AtomicUsize,
}

impl PolicySwitch {
    pub fn new(initial: Policy) -> Self {
        Self {
            active: AtomicU8::new(initial.as_u8()),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn current(&self) -> Policy {
        Policy::from_u8(self.active.load(Ordering::Acquire))
    }

    /// Activate the policy called `name`; returns the one it replaced.
    ///
    /// An unknown name leaves the active policy unchanged.
    pub fn set_policy(&self, name: &str) -> Result<Policy, UnknownPolicy> {
        let policy: Policy = name.parse()?;
        Ok(self.set(policy))
    }

    pub fn set(&self, policy: Policy) -> Policy {
        let previous = Policy::from_u8(self.active.swap(policy.as_u8(), Ordering::AcqRel));
        if previous != policy {
            info!(from = %previous, to = %policy, "routing policy switched");
        }
        previous
    }

    pub fn cursor(&self) -> &AtomicUsize {
        &self.cursor
    }
}
