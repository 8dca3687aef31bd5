//! ebbflow.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;
use crate::error::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EbbflowConfig {
    pub runtime: RuntimeConfig,
    pub metrics: MetricsConfig,
    pub autoscaler: AutoscalerConfig,
    pub balancer: BalancerConfig,
}

/// Container runtime access and the managed service selector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Path to the Docker Engine API socket.
    pub docker_socket: String,
    /// Image started on scale-up.
    pub image: String,
    /// Label key that marks managed containers.
    pub label: String,
    /// Label value (the managed service name).
    pub service: String,
    /// Network the backend containers join; their IP on it is dispatched to.
    pub network: String,
    /// Port the backend listens on inside its container.
    pub backend_port: u16,
    /// Timeout for a single runtime API call.
    pub api_timeout: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            docker_socket: "/var/run/docker.sock".to_string(),
            image: "backend".to_string(),
            label: "autoscale_service".to_string(),
            service: "backend".to_string(),
            network: "ebbflow_net".to_string(),
            backend_port: 5000,
            api_timeout: "10s".to_string(),
        }
    }
}

/// Metrics store access and service-discovery publishing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Base URL of the Prometheus-compatible query API.
    pub prometheus_url: String,
    /// Rate window used in the CPU query (e.g. "1m").
    pub query_window: String,
    /// Samples older than this are excluded from the average.
    pub stale_after: String,
    /// Timeout for a metrics query.
    pub query_timeout: String,
    /// Cores a single container may use; CPU rates are divided by this.
    /// Defaults to the host's available parallelism.
    pub cpu_cores: Option<u32>,
    /// File-based service discovery target list the metrics store polls.
    pub discovery_file: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            prometheus_url: "http://localhost:9090".to_string(),
            query_window: "1m".to_string(),
            stale_after: "90s".to_string(),
            query_timeout: "5s".to_string(),
            cpu_cores: None,
            discovery_file: "/etc/prometheus/targets/backend.json".to_string(),
        }
    }
}

/// Autoscale controller bounds and pacing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AutoscalerConfig {
    /// Average CPU utilization (0–1) above which the pool grows.
    pub cpu_threshold: f64,
    pub min_instances: u32,
    pub max_instances: u32,
    /// Interval between decision ticks.
    pub check_interval: String,
    /// Ticks suppressed after a scaling action (0 disables cooldown).
    pub cooldown_ticks: u32,
    /// Timeout for one scale call.
    pub scale_timeout: String,
}

impl Default for AutoscalerConfig {
    fn default() -> Self {
        Self {
            cpu_threshold: 0.7,
            min_instances: 1,
            max_instances: 10,
            check_interval: "30s".to_string(),
            cooldown_ticks: 1,
            scale_timeout: "60s".to_string(),
        }
    }
}

/// Load balancer listener, routing, and health parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BalancerConfig {
    pub listen: String,
    /// Initial routing policy ("round_robin" or "latency").
    pub policy: String,
    /// Consecutive failures before a target is taken out of rotation.
    pub failure_threshold: u32,
    /// EMA smoothing factor for observed latency.
    pub ema_alpha: f64,
    /// Latency assumed for a target that has not served anything yet.
    pub neutral_latency_ms: f64,
    /// Timeout for one forwarded request.
    pub upstream_timeout: String,
    pub probe_path: String,
    pub probe_interval: String,
    pub probe_timeout: String,
    /// Interval between routing table refreshes from the registry.
    pub refresh_interval: String,
    /// How long in-flight requests may drain on shutdown.
    pub drain_grace: String,
    /// Largest inbound body accepted for forwarding.
    pub max_body_bytes: usize,
    /// Concurrent workers of the synthetic load generator.
    pub loadgen_concurrency: u32,
    /// Path the load generator requests.
    pub loadgen_path: String,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8000".to_string(),
            policy: "round_robin".to_string(),
            failure_threshold: 3,
            ema_alpha: 0.2,
            neutral_latency_ms: 50.0,
            upstream_timeout: "3s".to_string(),
            probe_path: "/health".to_string(),
            probe_interval: "10s".to_string(),
            probe_timeout: "2s".to_string(),
            refresh_interval: "30s".to_string(),
            drain_grace: "10s".to_string(),
            max_body_bytes: 5 * 1024 * 1024,
            loadgen_concurrency: 4,
            loadgen_path: "/load".to_string(),
        }
    }
}

impl EbbflowConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Check every constraint the control plane relies on.
    pub fn validate(&self) -> ConfigResult<()> {
        let a = &self.autoscaler;
        if !(a.cpu_threshold > 0.0 && a.cpu_threshold < 1.0) {
            return Err(ConfigError::invalid(
                "autoscaler.cpu_threshold",
                format!("{} is not strictly between 0 and 1", a.cpu_threshold),
            ));
        }
        if a.min_instances > a.max_instances {
            return Err(ConfigError::invalid(
                "autoscaler.min_instances",
                format!("min {} exceeds max {}", a.min_instances, a.max_instances),
            ));
        }
        if a.max_instances == 0 {
            return Err(ConfigError::invalid("autoscaler.max_instances", "must be at least 1"));
        }
        require_positive("autoscaler.check_interval", &a.check_interval)?;
        require_positive("autoscaler.scale_timeout", &a.scale_timeout)?;

        let b = &self.balancer;
        if b.failure_threshold == 0 {
            return Err(ConfigError::invalid("balancer.failure_threshold", "must be at least 1"));
        }
        if !(b.ema_alpha > 0.0 && b.ema_alpha <= 1.0) {
            return Err(ConfigError::invalid(
                "balancer.ema_alpha",
                format!("{} is outside (0, 1]", b.ema_alpha),
            ));
        }
        if !(b.neutral_latency_ms.is_finite() && b.neutral_latency_ms >= 0.0) {
            return Err(ConfigError::invalid(
                "balancer.neutral_latency_ms",
                "must be a finite, non-negative number",
            ));
        }
        require_positive("balancer.upstream_timeout", &b.upstream_timeout)?;
        require_positive("balancer.probe_interval", &b.probe_interval)?;
        require_positive("balancer.probe_timeout", &b.probe_timeout)?;
        require_positive("balancer.refresh_interval", &b.refresh_interval)?;
        require_parses("balancer.drain_grace", &b.drain_grace)?;

        require_positive("runtime.api_timeout", &self.runtime.api_timeout)?;
        require_positive("metrics.query_window", &self.metrics.query_window)?;
        require_positive("metrics.stale_after", &self.metrics.stale_after)?;
        require_positive("metrics.query_timeout", &self.metrics.query_timeout)?;
        if self.metrics.cpu_cores == Some(0) {
            return Err(ConfigError::invalid("metrics.cpu_cores", "must be at least 1"));
        }
        Ok(())
    }
}

impl AutoscalerConfig {
    pub fn check_interval(&self) -> Duration {
        parse_duration(&self.check_interval).unwrap_or(Duration::from_secs(30))
    }

    pub fn scale_timeout(&self) -> Duration {
        parse_duration(&self.scale_timeout).unwrap_or(Duration::from_secs(60))
    }
}

impl RuntimeConfig {
    pub fn api_timeout(&self) -> Duration {
        parse_duration(&self.api_timeout).unwrap_or(Duration::from_secs(10))
    }
}

impl MetricsConfig {
    pub fn query_window(&self) -> Duration {
        parse_duration(&self.query_window).unwrap_or(Duration::from_secs(60))
    }

    pub fn stale_after(&self) -> Duration {
        parse_duration(&self.stale_after).unwrap_or(Duration::from_secs(90))
    }

    pub fn query_timeout(&self) -> Duration {
        parse_duration(&self.query_timeout).unwrap_or(Duration::from_secs(5))
    }
}

impl BalancerConfig {
    pub fn upstream_timeout(&self) -> Duration {
        parse_duration(&self.upstream_timeout).unwrap_or(Duration::from_secs(3))
    }

    pub fn probe_interval(&self) -> Duration {
        parse_duration(&self.probe_interval).unwrap_or(Duration::from_secs(10))
    }

    pub fn probe_timeout(&self) -> Duration {
        parse_duration(&self.probe_timeout).unwrap_or(Duration::from_secs(2))
    }

    pub fn refresh_interval(&self) -> Duration {
        parse_duration(&self.refresh_interval).unwrap_or(Duration::from_secs(30))
    }

    pub fn drain_grace(&self) -> Duration {
        parse_duration(&self.drain_grace).unwrap_or(Duration::from_secs(10))
    }
}

fn require_parses(field: &'static str, value: &str) -> ConfigResult<Duration> {
    parse_duration(value)
        .ok_or_else(|| ConfigError::invalid(field, format!("{value:?} is not a duration")))
}

fn require_positive(field: &'static str, value: &str) -> ConfigResult<()> {
    if require_parses(field, value)?.is_zero() {
        return Err(ConfigError::invalid(field, "must be greater than zero"));
    }
    Ok(())
}
