//! Controller state and the pure decision rule.

use serde::Serialize;

use ebbflow_core::AutoscalerConfig;

/// Where the controller is within a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerPhase {
    Idle,
    Deciding,
    Acting,
    Cooling,
}

/// A scaling decision for the managed pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Scale to the specified instance count.
    ScaleTo(u32),
    /// No change needed.
    NoChange,
}

/// Singleton bookkeeping of the control loop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScalingState {
    pub current_count: u32,
    pub min_instances: u32,
    pub max_instances: u32,
    pub threshold: f64,
    /// Unix seconds of the last completed scale action.
    pub last_action_at: Option<u64>,
    /// Ticks still to be skipped after the last action.
    pub cooldown_remaining: u32,
}

impl ScalingState {
    pub fn from_config(config: &AutoscalerConfig) -> Self {
        Self {
            current_count: 0,
            min_instances: config.min_instances,
            max_instances: config.max_instances,
            threshold: config.cpu_threshold,
            last_action_at: None,
            cooldown_remaining: 0,
        }
    }

    pub fn within_bounds(&self) -> bool {
        (self.min_instances..=self.max_instances).contains(&self.current_count)
    }

    /// Target that brings an out-of-bounds count back to the nearest bound.
    ///
    /// Taken before any metrics are consulted: a pool below its floor is
    /// grown even while idle, and one above its ceiling is shrunk even
    /// under load.
    pub fn bound_target(&self) -> Option<u32> {
        if self.current_count < self.min_instances {
            Some(self.min_instances)
        } else if self.current_count > self.max_instances {
            Some(self.max_instances)
        } else {
            None
        }
    }

    /// Decide the step for the observed average utilization.
    ///
    /// Moves by exactly one instance and never crosses a bound. Exactly at
    /// the threshold nothing happens.
    pub fn decide(&self, avg: f64) -> ScaleDecision {
        let count = self.current_count;
        if avg > self.threshold && count < self.max_instances {
            ScaleDecision::ScaleTo(count + 1)
        } else if avg < self.threshold && count > self.min_instances {
            ScaleDecision::ScaleTo(count - 1)
        } else {
            ScaleDecision::NoChange
        }
    }
}
