//! Health check probe logic.
//!
//! HTTP health checks against backend addresses, and exponential
//! backoff pacing for a target that keeps failing them.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::Empty;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tracing::debug;

/// Result of a single health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The health endpoint returned 2xx.
    Healthy,
    /// The health endpoint returned non-2xx.
    Unhealthy,
    /// The probe could not be executed (connection error or timeout).
    Failed,
}

/// Paces probes of one out-of-rotation target.
#[derive(Debug)]
pub struct ProbeBackoff {
    /// Consecutive failed probes.
    failures: u32,
    /// Current backoff interval.
    current: Duration,
    /// Base probe interval.
    base: Duration,
    /// Maximum backoff.
    max: Duration,
}

impl ProbeBackoff {
    pub fn new(base: Duration) -> Self {
        Self {
            failures: 0,
            current: base,
            base,
            max: Duration::from_secs(60).max(base),
        }
    }

    /// Record a probe result; returns true if the target passed.
    pub fn record(&mut self, result: ProbeResult) -> bool {
        match result {
            ProbeResult::Healthy => {
                self.failures = 0;
                self.current = self.base;
                true
            }
            ProbeResult::Unhealthy | ProbeResult::Failed => {
                self.failures += 1;
                // Exponential backoff: double the interval up to max.
                self.current = (self.current * 2).min(self.max);
                false
            }
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Wait before the next probe.
    pub fn next_interval(&self) -> Duration {
        self.current
    }
}

/// HTTP health checker over a pooled client.
///
/// One checker serves every target; idle connections are kept per
/// address and reused by later rounds.
#[derive(Clone)]
pub struct HealthChecker {
    client: Client<HttpConnector, Empty<Bytes>>,
    path: String,
    timeout: Duration,
}

impl HealthChecker {
    pub fn new(path: impl Into<String>, timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(timeout));
        Self {
            client: Client::builder(TokioExecutor::new())
                .pool_idle_timeout(Duration::from_secs(90))
                .build(connector),
            path: path.into(),
            timeout,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// GET the health path on `address`.
    ///
    /// Returns `Healthy` if the response is 2xx, `Unhealthy` for non-2xx,
    /// or `Failed` if the request cannot complete within the timeout.
    pub async fn check(&self, address: &str) -> ProbeResult {
        let uri = format!("http://{address}{}", self.path);
        let req = match http::Request::get(&uri)
            .header(http::header::USER_AGENT, "ebbflow-health/0.1")
            .body(Empty::<Bytes>::new())
        {
            Ok(req) => req,
            Err(e) => {
                debug!(error = %e, %uri, "health check request invalid");
                return ProbeResult::Failed;
            }
        };

        match tokio::time::timeout(self.timeout, self.client.request(req)).await {
            Ok(Ok(resp)) if resp.status().is_success() => ProbeResult::Healthy,
            Ok(Ok(resp)) => {
                debug!(status = %resp.status(), %uri, "health check non-2xx");
                ProbeResult::Unhealthy
            }
            Ok(Err(e)) => {
                debug!(error = %e, connect = e.is_connect(), %uri, "health check failed");
                ProbeResult::Failed
            }
            Err(_) => {
                debug!(%uri, timeout = ?self.timeout, "health check timed out");
                ProbeResult::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_starts_at_base() {
        let backoff = ProbeBackoff::new(Duration::from_secs(10));
        assert_eq!(backoff.next_interval(), Duration::from_secs(10));
        assert_eq!(backoff.failures(), 0);
    }

    #[test]
    fn backoff_doubles_per_failure() {
        let mut backoff = ProbeBackoff::new(Duration::from_secs(1));

        assert!(!backoff.record(ProbeResult::Unhealthy));
        assert_eq!(backoff.next_interval(), Duration::from_secs(2));

        backoff.record(ProbeResult::Failed);
        assert_eq!(backoff.next_interval(), Duration::from_secs(4));
        assert_eq!(backoff.failures(), 2);
    }

    #[test]
    fn backoff_caps_at_max() {
        let mut backoff = ProbeBackoff::new(Duration::from_secs(1));
        for _ in 0..10 {
            backoff.record(ProbeResult::Failed);
        }
        // 1 → 2 → 4 → 8 → 16 → 32 → 60 → 60 → ...
        assert_eq!(backoff.next_interval(), Duration::from_secs(60));
    }

    #[test]
    fn backoff_resets_on_success() {
        let mut backoff = ProbeBackoff::new(Duration::from_secs(1));
        backoff.record(ProbeResult::Unhealthy);
        backoff.record(ProbeResult::Unhealthy);

        assert!(backoff.record(ProbeResult::Healthy));
        assert_eq!(backoff.next_interval(), Duration::from_secs(1));
        assert_eq!(backoff.failures(), 0);
    }

    async fn serve(app: axum::Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn refused_connection_is_failed() {
        let checker = HealthChecker::new("/health", Duration::from_secs(1));
        assert_eq!(checker.check("127.0.0.1:1").await, ProbeResult::Failed);
    }

    #[tokio::test]
    async fn check_reads_status() {
        use axum::routing::get;

        let addr = serve(
            axum::Router::new()
                .route("/health", get(|| async { "OK" }))
                .route(
                    "/broken",
                    get(|| async { (http::StatusCode::SERVICE_UNAVAILABLE, "down") }),
                ),
        )
        .await;

        let timeout = Duration::from_secs(2);
        let healthy = HealthChecker::new("/health", timeout);
        assert_eq!(healthy.check(&addr).await, ProbeResult::Healthy);
        // Second round over the pooled connection.
        assert_eq!(healthy.check(&addr).await, ProbeResult::Healthy);

        let broken = HealthChecker::new("/broken", timeout);
        assert_eq!(broken.check(&addr).await, ProbeResult::Unhealthy);
    }

    #[tokio::test]
    async fn stalled_health_endpoint_is_failed() {
        use axum::routing::get;

        let addr = serve(axum::Router::new().route(
            "/health",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                "OK"
            }),
        ))
        .await;

        let checker = HealthChecker::new("/health", Duration::from_millis(200));
        let started = std::time::Instant::now();
        assert_eq!(checker.check(&addr).await, ProbeResult::Failed);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
