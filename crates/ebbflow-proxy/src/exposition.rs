//! Prometheus text exposition format.
//!
//! Renders the balancer's routing state for scraping by a Prometheus
//! server or compatible agent.

use std::fmt::Write;

use crate::policy::Policy;
use crate::table::TargetView;

/// Render routing state into Prometheus text format.
///
/// Pool-wide gauges first, then per-target series labelled by
/// `instance` and `address`.
pub fn render_prometheus(targets: &[TargetView], policy: Policy, uptime_secs: f64) -> String {
    let mut out = String::new();
    let healthy = targets.iter().filter(|t| t.healthy).count();

    out.push_str("# HELP ebbflow_backend_targets Routing targets in the current snapshot.\n");
    out.push_str("# TYPE ebbflow_backend_targets gauge\n");
    let _ = writeln!(out, "ebbflow_backend_targets {}", targets.len());

    out.push_str("# HELP ebbflow_backend_targets_healthy Routing targets eligible for selection.\n");
    out.push_str("# TYPE ebbflow_backend_targets_healthy gauge\n");
    let _ = writeln!(out, "ebbflow_backend_targets_healthy {healthy}");

    out.push_str("# HELP ebbflow_routing_policy Active routing policy (1 for the active one).\n");
    out.push_str("# TYPE ebbflow_routing_policy gauge\n");
    for p in Policy::ALL {
        let _ = writeln!(
            out,
            "ebbflow_routing_policy{{policy=\"{}\"}} {}",
            p.name(),
            u8::from(p == policy)
        );
    }

    out.push_str("# HELP ebbflow_uptime_seconds Seconds since the balancer started.\n");
    out.push_str("# TYPE ebbflow_uptime_seconds gauge\n");
    let _ = writeln!(out, "ebbflow_uptime_seconds {uptime_secs:.0}");

    out.push_str("# HELP ebbflow_target_healthy Whether the target is in rotation.\n");
    out.push_str("# TYPE ebbflow_target_healthy gauge\n");
    for t in targets {
        let _ = writeln!(
            out,
            "ebbflow_target_healthy{{{}}} {}",
            labels(t),
            u8::from(t.healthy)
        );
    }

    out.push_str("# HELP ebbflow_target_latency_ema_ms Smoothed upstream latency in milliseconds.\n");
    out.push_str("# TYPE ebbflow_target_latency_ema_ms gauge\n");
    for t in targets {
        let _ = writeln!(
            out,
            "ebbflow_target_latency_ema_ms{{{}}} {:.2}",
            labels(t),
            t.ema_latency_ms
        );
    }

    out.push_str("# HELP ebbflow_target_requests_total Requests forwarded to the target.\n");
    out.push_str("# TYPE ebbflow_target_requests_total counter\n");
    for t in targets {
        let _ = writeln!(out, "ebbflow_target_requests_total{{{}}} {}", labels(t), t.requests);
    }

    out.push_str("# HELP ebbflow_target_failures_total Failed forwarding attempts to the target.\n");
    out.push_str("# TYPE ebbflow_target_failures_total counter\n");
    for t in targets {
        let _ = writeln!(out, "ebbflow_target_failures_total{{{}}} {}", labels(t), t.failures);
    }

    out
}

fn labels(t: &TargetView) -> String {
    let short: String = t.instance_id.chars().take(12).collect();
    format!("instance=\"{short}\",address=\"{}\"", t.address)
}
