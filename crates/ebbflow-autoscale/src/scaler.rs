//! Autoscaler: the timed control loop.
//!
//! Each tick lists the pool, republishes discovery targets, restores the
//! configured bounds if the pool drifted outside them, and otherwise asks
//! the metrics source for the average utilization and applies the
//! one-step decision rule. Every failure is logged and absorbed; the next
//! tick simply tries again.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use ebbflow_core::{AutoscalerConfig, Instance, InstanceId, epoch_secs};
use ebbflow_metrics::{MetricsSource, TargetPublisher};
use ebbflow_runtime::{ContainerRuntime, InstanceRegistry};

use crate::state::{ControllerPhase, ScaleDecision, ScalingState};

/// What one tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Suppressed by the cooldown after a recent action.
    Cooling,
    /// The runtime could not be listed; no decision was made.
    ListFailed,
    /// No usable utilization figure; no decision was made.
    MetricsUnavailable,
    /// Utilization read, no action needed.
    Steady { avg: f64 },
    /// The pool was resized.
    Scaled { from: u32, to: u32 },
    /// A resize was attempted and rejected; the count is unchanged.
    ScaleFailed { target: u32 },
}

/// Drives the managed pool between its bounds based on CPU utilization.
pub struct Autoscaler<R, M> {
    registry: Arc<InstanceRegistry<R>>,
    metrics: M,
    publisher: Option<TargetPublisher>,
    /// Woken after every successful resize.
    scaled: Option<Arc<Notify>>,
    state: ScalingState,
    phase: ControllerPhase,
    cooldown_ticks: u32,
}

impl<R: ContainerRuntime, M: MetricsSource> Autoscaler<R, M> {
    pub fn new(registry: Arc<InstanceRegistry<R>>, metrics: M, config: &AutoscalerConfig) -> Self {
        Self {
            registry,
            metrics,
            publisher: None,
            scaled: None,
            state: ScalingState::from_config(config),
            phase: ControllerPhase::Idle,
            cooldown_ticks: config.cooldown_ticks,
        }
    }

    /// Publish discovery targets after every successful listing.
    pub fn with_publisher(mut self, publisher: TargetPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Signal `notify` after every successful resize, so a routing table
    /// in the same process can pick up the new pool at once.
    pub fn with_scale_notify(mut self, notify: Arc<Notify>) -> Self {
        self.scaled = Some(notify);
        self
    }

    pub fn state(&self) -> &ScalingState {
        &self.state
    }

    pub fn phase(&self) -> ControllerPhase {
        self.phase
    }

    /// Run one decision tick.
    pub async fn tick(&mut self) -> TickOutcome {
        if self.state.cooldown_remaining > 0 {
            self.state.cooldown_remaining -= 1;
            self.phase = if self.state.cooldown_remaining > 0 {
                ControllerPhase::Cooling
            } else {
                ControllerPhase::Idle
            };
            debug!(remaining = self.state.cooldown_remaining, "cooling down, tick skipped");
            return TickOutcome::Cooling;
        }

        self.phase = ControllerPhase::Deciding;
        let instances = match self.registry.list().await {
            Ok(list) => list,
            Err(e) => {
                warn!(error = %e, "listing instances failed, skipping tick");
                self.phase = ControllerPhase::Idle;
                return TickOutcome::ListFailed;
            }
        };
        self.state.current_count = instances.len() as u32;
        self.publish(&instances).await;

        if let Some(target) = self.state.bound_target() {
            info!(
                current = self.state.current_count,
                min = self.state.min_instances,
                max = self.state.max_instances,
                target,
                "instance count outside bounds, restoring"
            );
            return self.act(target).await;
        }

        let ids: Vec<InstanceId> = instances.iter().map(|i| i.id.clone()).collect();
        let avg = match self.metrics.average_utilization(&ids).await {
            Ok(avg) => avg,
            Err(e) => {
                warn!(error = %e, "metrics unavailable, no decision this tick");
                self.phase = ControllerPhase::Idle;
                return TickOutcome::MetricsUnavailable;
            }
        };

        match self.state.decide(avg) {
            ScaleDecision::NoChange => {
                debug!(
                    avg,
                    threshold = self.state.threshold,
                    count = self.state.current_count,
                    "no scaling needed"
                );
                self.phase = ControllerPhase::Idle;
                TickOutcome::Steady { avg }
            }
            ScaleDecision::ScaleTo(target) => {
                info!(
                    avg,
                    threshold = self.state.threshold,
                    from = self.state.current_count,
                    to = target,
                    "scaling"
                );
                self.act(target).await
            }
        }
    }

    async fn act(&mut self, target: u32) -> TickOutcome {
        self.phase = ControllerPhase::Acting;
        let from = self.state.current_count;

        match self.registry.scale_to(target).await {
            Ok(outcome) => {
                self.state.current_count = outcome.to;
                self.state.last_action_at = Some(epoch_secs());
                self.state.cooldown_remaining = self.cooldown_ticks;
                self.phase = if self.cooldown_ticks > 0 {
                    ControllerPhase::Cooling
                } else {
                    ControllerPhase::Idle
                };

                // New instances need their addresses in the discovery file.
                match self.registry.list().await {
                    Ok(instances) => self.publish(&instances).await,
                    Err(e) => warn!(error = %e, "listing after scale failed, targets not republished"),
                }
                if let Some(scaled) = &self.scaled {
                    scaled.notify_one();
                }
                TickOutcome::Scaled { from, to: outcome.to }
            }
            Err(e) => {
                warn!(error = %e, from, target, "scale action failed, retrying next tick");
                self.phase = ControllerPhase::Idle;
                TickOutcome::ScaleFailed { target }
            }
        }
    }

    async fn publish(&self, instances: &[Instance]) {
        if let Some(publisher) = &self.publisher
            && let Err(e) = publisher.publish(instances).await
        {
            warn!(
                path = %publisher.path().display(),
                error = %e,
                "publishing discovery targets failed"
            );
        }
    }

    /// Run the autoscaler loop until shutdown is signalled.
    ///
    /// Ticks never overlap: a tick that overruns the interval causes the
    /// missed ticks to be dropped, not queued.
    pub async fn run(&mut self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(
            interval_secs = interval.as_secs(),
            threshold = self.state.threshold,
            min = self.state.min_instances,
            max = self.state.max_instances,
            "autoscaler started"
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let outcome = self.tick().await;
                    debug!(?outcome, phase = ?self.phase, "tick complete");
                }
                _ = shutdown.changed() => {
                    info!("autoscaler shutting down");
                    break;
                }
            }
        }
    }
}
