//! HTTP handlers of the load balancer surface.
//!
//! Everything not matched by an administrative route falls through to
//! [`forward`], which proxies it to the pool.

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::{debug, warn};

use ebbflow_core::epoch_secs;
use ebbflow_proxy::{DispatchError, ForwardRequest, Policy, Upstream, render_prometheus};

use crate::ApiState;

// ── Forwarding ─────────────────────────────────────────────────

/// Fallback: forward the request to a pool target.
pub async fn forward<U: Upstream>(State(state): State<ApiState<U>>, req: Request) -> Response {
    let (parts, body) = req.into_parts();

    if let Some(declared) = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
        && declared > state.max_body_bytes
    {
        warn!(bytes = declared, limit = state.max_body_bytes, "request too large");
        return (StatusCode::PAYLOAD_TOO_LARGE, "Request too large").into_response();
    }
    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, limit = state.max_body_bytes, "request body rejected");
            return (StatusCode::PAYLOAD_TOO_LARGE, "Request too large").into_response();
        }
    };

    let request = ForwardRequest {
        method: parts.method,
        path_and_query: parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string()),
        headers: parts.headers,
        body,
    };

    match state.dispatcher.forward(&request).await {
        Ok(resp) => resp.map(Body::from).into_response(),
        Err(DispatchError::NoTargetsAvailable) => {
            (StatusCode::SERVICE_UNAVAILABLE, "No healthy servers").into_response()
        }
        Err(e @ DispatchError::Upstream { .. }) => {
            warn!(path = %request.path_and_query, error = %e, "forwarding failed");
            (StatusCode::BAD_GATEWAY, "All backend servers unavailable").into_response()
        }
    }
}

// ── Administration ─────────────────────────────────────────────

/// GET /set_mode/{policy}
pub async fn set_mode<U: Upstream>(
    State(state): State<ApiState<U>>,
    Path(name): Path<String>,
) -> Response {
    let policy = state.dispatcher.policy();
    match policy.set_policy(&name) {
        Ok(previous) => Json(json!({
            "message": format!("Selection mode set to {name}"),
            "previous_mode": previous.name(),
            "available_modes": Policy::names(),
        }))
        .into_response(),
        Err(e) => {
            warn!(error = %e, "invalid mode requested");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "Invalid mode",
                    "available_modes": Policy::names(),
                })),
            )
                .into_response()
        }
    }
}

/// POST /cpu/toggle
pub async fn toggle_load<U: Upstream>(State(state): State<ApiState<U>>) -> impl IntoResponse {
    let load = state.loadgen.toggle(&state.dispatcher);
    debug!(state = load.as_str(), "load generator toggled");
    load.as_str()
}

// ── Introspection ──────────────────────────────────────────────

/// GET /health
pub async fn health() -> &'static str {
    "OK"
}

/// GET /status
pub async fn status<U: Upstream>(State(state): State<ApiState<U>>) -> impl IntoResponse {
    let servers = state.dispatcher.table().views();
    let healthy = servers.iter().filter(|s| s.healthy).count();
    Json(json!({
        "load_balancer": {
            "status": "healthy",
            "mode": state.dispatcher.policy().current(),
            "uptime_secs": state.started.elapsed().as_secs(),
            "timestamp": epoch_secs(),
            "load_generator": {
                "running": state.loadgen.is_running(),
                "sent": state.loadgen.sent(),
            },
        },
        "backend_servers": {
            "total": servers.len(),
            "healthy": healthy,
            "servers": servers,
        },
    }))
}

/// GET /metrics
pub async fn prometheus_metrics<U: Upstream>(State(state): State<ApiState<U>>) -> impl IntoResponse {
    let body = render_prometheus(
        &state.dispatcher.table().views(),
        state.dispatcher.policy().current(),
        state.started.elapsed().as_secs_f64(),
    );
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// GET /
pub async fn index<U: Upstream>(State(state): State<ApiState<U>>) -> impl IntoResponse {
    let snapshot = state.dispatcher.table().snapshot();
    Json(json!({
        "message": "ebbflow load balancer",
        "total_backends": snapshot.len(),
        "healthy_backends": snapshot.healthy().len(),
        "endpoints": {
            "load_balancing": "/*",
            "status": "/status",
            "health": "/health",
            "metrics": "/metrics",
            "set_mode": "/set_mode/{mode}",
            "cpu_toggle": "/cpu/toggle",
        },
    }))
}

/// GET /favicon.ico
pub async fn favicon() -> StatusCode {
    StatusCode::NO_CONTENT
}
