//! Prometheus query adapter.
//!
//! Reads container CPU from cAdvisor series through the Prometheus HTTP
//! API. Two instant queries per tick:
//!
//! ```text
//! sum by (id) (rate(container_cpu_usage_seconds_total{container_label_<label>="<svc>"}[<window>]))
//! max by (id) (timestamp(container_cpu_usage_seconds_total{container_label_<label>="<svc>"}))
//! ```
//!
//! The first gives CPU-seconds per second per container, which is divided
//! by the per-container core count to land in 0–1. The second gives the
//! time of each container's last scrape, used for staleness.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde::Deserialize;
use tracing::debug;

use ebbflow_core::{InstanceId, MetricSample, MetricsConfig, RuntimeConfig, epoch_secs};

use crate::error::MetricsError;
use crate::source::{MetricsSource, average_fresh};

/// CPU utilization source backed by a Prometheus server.
pub struct PrometheusSource {
    base: url::Url,
    selector: String,
    window: Duration,
    stale_after: Duration,
    timeout: Duration,
    cpu_cores: f64,
    client: Client<HttpConnector, Empty<Bytes>>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryData {
    result_type: String,
    result: Vec<VectorSample>,
}

#[derive(Debug, Deserialize)]
struct VectorSample {
    #[serde(default)]
    metric: HashMap<String, String>,
    /// `[unix_seconds, "value"]`
    value: (f64, String),
}

impl PrometheusSource {
    pub fn new(metrics: &MetricsConfig, runtime: &RuntimeConfig) -> Result<Self, MetricsError> {
        let mut base = url::Url::parse(&metrics.prometheus_url)
            .map_err(|e| MetricsError::Query(format!("invalid prometheus_url: {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let cpu_cores = match metrics.cpu_cores {
            Some(n) => n as f64,
            None => std::thread::available_parallelism()
                .map(|n| n.get() as f64)
                .unwrap_or(1.0),
        };

        Ok(Self {
            base,
            selector: format!(
                "container_label_{}=\"{}\"",
                sanitize_label(&runtime.label),
                runtime.service
            ),
            window: metrics.query_window(),
            stale_after: metrics.stale_after(),
            timeout: metrics.query_timeout(),
            cpu_cores,
            client: Client::builder(TokioExecutor::new()).build_http(),
        })
    }

    fn cpu_query(&self) -> String {
        format!(
            "sum by (id) (rate(container_cpu_usage_seconds_total{{{}}}[{}s]))",
            self.selector,
            self.window.as_secs().max(1)
        )
    }

    fn freshness_query(&self) -> String {
        format!(
            "max by (id) (timestamp(container_cpu_usage_seconds_total{{{}}}))",
            self.selector
        )
    }

    fn query_url(&self, promql: &str) -> Result<String, MetricsError> {
        let mut url = self
            .base
            .join("api/v1/query")
            .map_err(|e| MetricsError::Query(e.to_string()))?;
        url.query_pairs_mut().append_pair("query", promql);
        Ok(url.to_string())
    }

    async fn instant_query(&self, promql: &str) -> Result<Vec<VectorSample>, MetricsError> {
        let uri: http::Uri = self
            .query_url(promql)?
            .parse()
            .map_err(|e: http::uri::InvalidUri| MetricsError::Query(e.to_string()))?;

        let fetch = async {
            let resp = self
                .client
                .get(uri)
                .await
                .map_err(|e| MetricsError::Unreachable(e.to_string()))?;
            let status = resp.status();
            let body = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| MetricsError::Unreachable(e.to_string()))?
                .to_bytes();
            Ok::<_, MetricsError>((status, body))
        };

        let (status, body) = match tokio::time::timeout(self.timeout, fetch).await {
            Ok(result) => result?,
            Err(_) => return Err(MetricsError::Timeout(self.timeout)),
        };

        parse_vector(status, &body)
    }

    /// Fetch one sample per scraped container of the managed service.
    pub async fn samples(&self, instance_ids: &[InstanceId]) -> Result<Vec<MetricSample>, MetricsError> {
        let cpu = self.instant_query(&self.cpu_query()).await?;
        let freshness = self.instant_query(&self.freshness_query()).await?;
        let samples = samples_from_vectors(&cpu, &freshness, instance_ids, self.cpu_cores);
        debug!(
            series = cpu.len(),
            matched = samples.len(),
            instances = instance_ids.len(),
            "cpu samples fetched"
        );
        Ok(samples)
    }
}

impl MetricsSource for PrometheusSource {
    async fn average_utilization(&self, instance_ids: &[InstanceId]) -> Result<f64, MetricsError> {
        let samples = self.samples(instance_ids).await?;
        average_fresh(&samples, instance_ids, epoch_secs(), self.stale_after)
    }
}

fn parse_vector(status: http::StatusCode, body: &[u8]) -> Result<Vec<VectorSample>, MetricsError> {
    let parsed: QueryResponse = serde_json::from_slice(body).map_err(|e| {
        MetricsError::Query(format!("status {status}: undecodable body: {e}"))
    })?;
    if parsed.status != "success" {
        return Err(MetricsError::Query(
            parsed.error.unwrap_or_else(|| format!("status {status}")),
        ));
    }
    let data = parsed
        .data
        .ok_or_else(|| MetricsError::Query("response has no data".to_string()))?;
    if data.result_type != "vector" {
        return Err(MetricsError::Query(format!(
            "expected vector result, got {}",
            data.result_type
        )));
    }
    Ok(data.result)
}

/// Match series to instances by container ID and normalise CPU rates.
///
/// cAdvisor's `id` label is a cgroup path that embeds the full container
/// ID (`/docker/<id>` or `/system.slice/docker-<id>.scope`).
fn samples_from_vectors(
    cpu: &[VectorSample],
    freshness: &[VectorSample],
    instance_ids: &[InstanceId],
    cpu_cores: f64,
) -> Vec<MetricSample> {
    instance_ids
        .iter()
        .filter_map(|id| {
            let (eval_ts, raw) = series_for(cpu, id)?;
            let rate: f64 = raw.parse().ok().filter(|v: &f64| v.is_finite())?;
            let sampled_at = series_for(freshness, id)
                .and_then(|(_, ts)| ts.parse::<f64>().ok())
                .unwrap_or(eval_ts);
            Some(MetricSample {
                instance_id: id.clone(),
                cpu_utilization: (rate / cpu_cores).clamp(0.0, 1.0),
                sampled_at: sampled_at.max(0.0) as u64,
            })
        })
        .collect()
}

fn series_for(series: &[VectorSample], id: &str) -> Option<(f64, String)> {
    series
        .iter()
        .find(|s| s.metric.get("id").is_some_and(|cg| cg.contains(id)))
        .map(|s| s.value.clone())
}

/// cAdvisor exposes container labels with non-alphanumerics mapped to `_`.
fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CPU_JSON: &str = r#"{
        "status": "success",
        "data": {
            "resultType": "vector",
            "result": [
                { "metric": { "id": "/docker/aaa111" }, "value": [1700000000.5, "1.5"] },
                { "metric": { "id": "/system.slice/docker-bbb222.scope" }, "value": [1700000000.5, "0.5"] },
                { "metric": { "id": "/docker/zzz999" }, "value": [1700000000.5, "2.0"] }
            ]
        }
    }"#;

    const FRESH_JSON: &str = r#"{
        "status": "success",
        "data": {
            "resultType": "vector",
            "result": [
                { "metric": { "id": "/docker/aaa111" }, "value": [1700000000.5, "1699999990.2"] }
            ]
        }
    }"#;

    fn ids(list: &[&str]) -> Vec<InstanceId> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn test_source(url: &str) -> PrometheusSource {
        let metrics = MetricsConfig {
            prometheus_url: url.to_string(),
            cpu_cores: Some(2),
            query_timeout: "1s".to_string(),
            ..MetricsConfig::default()
        };
        PrometheusSource::new(&metrics, &RuntimeConfig::default()).unwrap()
    }

    #[test]
    fn parses_vector_response() {
        let result = parse_vector(http::StatusCode::OK, CPU_JSON.as_bytes()).unwrap();
        assert_eq!(result.len(), 3);
        assert_eq!(result[0].value.1, "1.5");
    }

    #[test]
    fn error_response_is_query_error() {
        let body = br#"{"status":"error","errorType":"bad_data","error":"parse error at char 5"}"#;
        let err = parse_vector(http::StatusCode::BAD_REQUEST, body).unwrap_err();
        assert!(err.to_string().contains("parse error at char 5"));
    }

    #[test]
    fn non_vector_result_is_rejected() {
        let body = br#"{"status":"success","data":{"resultType":"matrix","result":[]}}"#;
        assert!(parse_vector(http::StatusCode::OK, body).is_err());
    }

    #[test]
    fn samples_match_by_container_id_and_normalise() {
        let cpu = parse_vector(http::StatusCode::OK, CPU_JSON.as_bytes()).unwrap();
        let fresh = parse_vector(http::StatusCode::OK, FRESH_JSON.as_bytes()).unwrap();

        let samples = samples_from_vectors(&cpu, &fresh, &ids(&["aaa111", "bbb222", "ccc333"]), 2.0);

        // "ccc333" has no series; "zzz999" is not ours.
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].instance_id, "aaa111");
        assert!((samples[0].cpu_utilization - 0.75).abs() < 1e-9);
        assert_eq!(samples[0].sampled_at, 1_699_999_990);

        // No freshness series: falls back to the evaluation timestamp.
        assert!((samples[1].cpu_utilization - 0.25).abs() < 1e-9);
        assert_eq!(samples[1].sampled_at, 1_700_000_000);
    }

    #[test]
    fn rates_above_core_count_clamp_to_one() {
        let cpu = parse_vector(http::StatusCode::OK, CPU_JSON.as_bytes()).unwrap();
        let samples = samples_from_vectors(&cpu, &[], &ids(&["aaa111"]), 1.0);
        assert_eq!(samples[0].cpu_utilization, 1.0);
    }

    #[test]
    fn queries_select_managed_service() {
        let source = test_source("http://prom:9090");
        assert_eq!(
            source.cpu_query(),
            "sum by (id) (rate(container_cpu_usage_seconds_total{container_label_autoscale_service=\"backend\"}[60s]))"
        );
        assert!(source.freshness_query().starts_with("max by (id) (timestamp("));
    }

    #[test]
    fn query_url_is_encoded_under_base_path() {
        let source = test_source("http://prom:9090/prometheus");
        let url = source.query_url("up{job=\"x\"}").unwrap();
        assert!(url.starts_with("http://prom:9090/prometheus/api/v1/query?query="));
        assert!(!url.contains('"'));
    }

    #[test]
    fn sanitize_label_maps_punctuation() {
        assert_eq!(sanitize_label("com.example/svc-name"), "com_example_svc_name");
    }

    #[tokio::test]
    async fn unreachable_store_is_unavailable() {
        let source = test_source("http://127.0.0.1:1");
        let err = source.average_utilization(&ids(&["aaa111"])).await.unwrap_err();
        assert!(matches!(
            err,
            MetricsError::Unreachable(_) | MetricsError::Timeout(_)
        ));
    }

    #[tokio::test]
    async fn average_from_live_query_endpoint() {
        use axum::extract::Query;
        use axum::routing::get;

        async fn query(Query(params): Query<HashMap<String, String>>) -> String {
            let promql = params.get("query").cloned().unwrap_or_default();
            if promql.starts_with("sum by (id) (rate(") {
                CPU_JSON.to_string()
            } else {
                // Scrape timestamps relative to now so nothing is stale.
                let now = epoch_secs();
                format!(
                    r#"{{"status":"success","data":{{"resultType":"vector","result":[
                        {{"metric":{{"id":"/docker/aaa111"}},"value":[{now},"{now}"]}},
                        {{"metric":{{"id":"/docker/bbb222"}},"value":[{now},"{now}"]}}
                    ]}}}}"#
                )
            }
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = axum::Router::new().route("/api/v1/query", get(query));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let source = test_source(&format!("http://{addr}"));
        let avg = source
            .average_utilization(&ids(&["aaa111", "bbb222"]))
            .await
            .unwrap();
        // (1.5/2 + 0.5/2) / 2
        assert!((avg - 0.5).abs() < 1e-9, "avg was {avg}");
    }

    #[tokio::test]
    async fn stalled_store_times_out() {
        use axum::routing::get;

        async fn stall() -> &'static str {
            tokio::time::sleep(Duration::from_secs(30)).await;
            "{}"
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = axum::Router::new().route("/api/v1/query", get(stall));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let metrics = MetricsConfig {
            prometheus_url: format!("http://{addr}"),
            cpu_cores: Some(2),
            query_timeout: "200ms".to_string(),
            ..MetricsConfig::default()
        };
        let source = PrometheusSource::new(&metrics, &RuntimeConfig::default()).unwrap();

        let started = std::time::Instant::now();
        let err = source.average_utilization(&ids(&["aaa111"])).await.unwrap_err();
        assert!(
            matches!(err, MetricsError::Timeout(t) if t == Duration::from_millis(200)),
            "got {err:?}"
        );
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
