//! ebbflow-api — HTTP surface of the load balancer.
//!
//! Administrative routes are matched first; every other request falls
//! through to the dispatcher and is forwarded to a pool target.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/` | Index with pool size and endpoint list |
//! | GET | `/health` | Liveness of the balancer itself |
//! | GET | `/status` | Policy, uptime and per-target state |
//! | GET | `/metrics` | Prometheus exposition |
//! | GET | `/set_mode/{mode}` | Switch the selection policy |
//! | POST | `/cpu/toggle` | Start or stop the synthetic load generator |
//! | GET | `/favicon.ico` | 204, never forwarded |
//! | any | `/*` | Forwarded to a healthy target |

pub mod handlers;
pub mod loadgen;

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::routing::{get, post};

use ebbflow_proxy::{Dispatcher, Upstream};

pub use loadgen::{LoadGenerator, LoadState};

/// Shared state for API handlers.
pub struct ApiState<U> {
    pub dispatcher: Arc<Dispatcher<U>>,
    pub loadgen: Arc<LoadGenerator>,
    pub started: Instant,
    pub max_body_bytes: usize,
}

// Derived Clone would require `U: Clone`.
impl<U> Clone for ApiState<U> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: Arc::clone(&self.dispatcher),
            loadgen: Arc::clone(&self.loadgen),
            started: self.started,
            max_body_bytes: self.max_body_bytes,
        }
    }
}

impl<U> ApiState<U> {
    pub fn new(dispatcher: Arc<Dispatcher<U>>, loadgen: Arc<LoadGenerator>, max_body_bytes: usize) -> Self {
        Self {
            dispatcher,
            loadgen,
            started: Instant::now(),
            max_body_bytes,
        }
    }
}

/// Build the balancer router.
pub fn build_router<U: Upstream>(state: ApiState<U>) -> Router {
    Router::new()
        .route("/", get(handlers::index::<U>))
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status::<U>))
        .route("/metrics", get(handlers::prometheus_metrics::<U>))
        .route("/set_mode/{mode}", get(handlers::set_mode::<U>))
        .route("/cpu/toggle", post(handlers::toggle_load::<U>))
        .route("/favicon.ico", get(handlers::favicon))
        .fallback(handlers::forward::<U>)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use bytes::Bytes;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use ebbflow_proxy::{ForwardRequest, Policy, PolicySwitch, RoutingTable, UpstreamError};

    use super::*;

    struct Unreachable;

    impl Upstream for Unreachable {
        async fn send(
            &self,
            address: &str,
            _request: &ForwardRequest,
        ) -> Result<http::Response<Bytes>, UpstreamError> {
            Err(UpstreamError::Connect {
                address: address.to_string(),
                message: "connection refused".to_string(),
            })
        }
    }

    fn router(instances: &[ebbflow_core::Instance]) -> Router {
        let table = Arc::new(RoutingTable::new(3, 0.2, 50.0));
        table.apply(instances);
        let dispatcher = Dispatcher::new(table, Arc::new(PolicySwitch::new(Policy::RoundRobin)), Unreachable);
        build_router(ApiState::new(
            Arc::new(dispatcher),
            Arc::new(LoadGenerator::new(1, "/load")),
            1024,
        ))
    }

    fn instance(n: u32) -> ebbflow_core::Instance {
        ebbflow_core::Instance {
            id: format!("i{n}"),
            name: format!("backend-{n}"),
            address: format!("10.0.0.{n}:5000"),
            created_at: n as u64,
        }
    }

    #[tokio::test]
    async fn health_route_is_local() {
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = router(&[]).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn favicon_is_not_forwarded() {
        let req = Request::builder().uri("/favicon.ico").body(Body::empty()).unwrap();
        let resp = router(&[]).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn unknown_path_falls_through_to_forwarding() {
        let req = Request::builder().uri("/anything").body(Body::empty()).unwrap();
        let resp = router(&[]).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn transport_failures_become_502() {
        let req = Request::builder().uri("/load").body(Body::empty()).unwrap();
        let resp = router(&[instance(1), instance(2)]).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"All backend servers unavailable");
    }

    #[tokio::test]
    async fn toggle_requires_post() {
        let req = Request::builder().uri("/cpu/toggle").body(Body::empty()).unwrap();
        let resp = router(&[]).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
