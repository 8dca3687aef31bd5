//! Docker Engine API client.
//!
//! Speaks HTTP/1.1 over the engine's unix socket with a fresh hyper
//! connection per call. Only the handful of endpoints the registry needs
//! are wrapped: container list, create, start, and remove.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use serde::Deserialize;
use tracing::{debug, info, warn};

use ebbflow_core::{Instance, InstanceId, RuntimeConfig};

use crate::error::{RuntimeError, RuntimeResult};
use crate::runtime::ContainerRuntime;

/// Container runtime backed by the Docker Engine API.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    socket: PathBuf,
    image: String,
    label: String,
    service: String,
    network: String,
    backend_port: u16,
    timeout: Duration,
}

/// One entry of `GET /containers/json`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerSummary {
    id: String,
    #[serde(default)]
    names: Vec<String>,
    created: u64,
    #[serde(default)]
    network_settings: Option<SummaryNetworkSettings>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SummaryNetworkSettings {
    #[serde(default)]
    networks: HashMap<String, EndpointSettings>,
}

#[derive(Debug, Deserialize)]
struct EndpointSettings {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl DockerRuntime {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            socket: PathBuf::from(&config.docker_socket),
            image: config.image.clone(),
            label: config.label.clone(),
            service: config.service.clone(),
            network: config.network.clone(),
            backend_port: config.backend_port,
            timeout: config.api_timeout(),
        }
    }

    /// Query string selecting running containers of the managed service.
    fn list_query(&self) -> String {
        let filters = serde_json::json!({
            "label": [format!("{}={}", self.label, self.service)],
            "status": ["running"],
        });
        url::form_urlencoded::Serializer::new(String::new())
            .append_pair("filters", &filters.to_string())
            .finish()
    }

    fn create_body(&self) -> serde_json::Value {
        serde_json::json!({
            "Image": self.image,
            "Labels": { self.label.clone(): self.service },
            "HostConfig": { "NetworkMode": self.network },
        })
    }

    async fn call(
        &self,
        method: http::Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> RuntimeResult<(http::StatusCode, Bytes)> {
        match tokio::time::timeout(self.timeout, self.send(method, path, body)).await {
            Ok(result) => result,
            Err(_) => Err(RuntimeError::Timeout(self.timeout)),
        }
    }

    async fn send(
        &self,
        method: http::Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> RuntimeResult<(http::StatusCode, Bytes)> {
        let stream = tokio::net::UnixStream::connect(&self.socket)
            .await
            .map_err(|e| RuntimeError::Connect(format!("{}: {e}", self.socket.display())))?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| RuntimeError::Connect(e.to_string()))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "docker connection closed with error");
            }
        });

        let payload = match body {
            Some(value) => Bytes::from(value.to_string()),
            None => Bytes::new(),
        };
        let req = http::Request::builder()
            .method(method)
            .uri(path)
            .header("host", "docker")
            .header("content-type", "application/json")
            .body(Full::new(payload))
            .map_err(|e| RuntimeError::Request(e.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| RuntimeError::Request(e.to_string()))?;
        let status = resp.status();
        let bytes = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| RuntimeError::Request(e.to_string()))?
            .to_bytes();
        Ok((status, bytes))
    }
}

impl ContainerRuntime for DockerRuntime {
    async fn list_running(&self) -> RuntimeResult<Vec<Instance>> {
        let path = format!("/containers/json?{}", self.list_query());
        let (status, body) = self.call(http::Method::GET, &path, None).await?;
        if !status.is_success() {
            return Err(api_error(status, &body));
        }
        let summaries: Vec<ContainerSummary> =
            serde_json::from_slice(&body).map_err(|e| RuntimeError::Decode(e.to_string()))?;
        Ok(instances_from_summaries(
            summaries,
            &self.network,
            self.backend_port,
        ))
    }

    async fn create_instance(&self) -> RuntimeResult<InstanceId> {
        let (status, body) = self
            .call(
                http::Method::POST,
                "/containers/create",
                Some(self.create_body()),
            )
            .await?;
        if !status.is_success() {
            return Err(api_error(status, &body));
        }
        let created: CreateResponse =
            serde_json::from_slice(&body).map_err(|e| RuntimeError::Decode(e.to_string()))?;

        let start_path = format!("/containers/{}/start", created.id);
        let (status, body) = self.call(http::Method::POST, &start_path, None).await?;
        if !status.is_success() {
            let err = api_error(status, &body);
            // Don't leave a created-but-stopped container behind.
            if let Err(e) = self.remove_instance(&created.id).await {
                warn!(container = %created.id, error = %e, "cleanup of unstarted container failed");
            }
            return Err(err);
        }

        info!(container = %created.id, image = %self.image, "container started");
        Ok(created.id)
    }

    async fn remove_instance(&self, id: &str) -> RuntimeResult<()> {
        let path = format!("/containers/{id}?force=true");
        let (status, body) = self.call(http::Method::DELETE, &path, None).await?;
        if status == http::StatusCode::NOT_FOUND {
            debug!(container = %id, "container already gone");
            return Ok(());
        }
        if !status.is_success() {
            return Err(api_error(status, &body));
        }
        info!(container = %id, "container removed");
        Ok(())
    }
}

/// Convert container summaries into dispatchable instances.
///
/// Containers without an address on the service network are skipped:
/// there is nowhere to send their traffic.
fn instances_from_summaries(
    summaries: Vec<ContainerSummary>,
    network: &str,
    port: u16,
) -> Vec<Instance> {
    summaries
        .into_iter()
        .filter_map(|c| {
            let ip = c
                .network_settings
                .as_ref()
                .and_then(|n| n.networks.get(network))
                .map(|e| e.ip_address.as_str())
                .filter(|ip| !ip.is_empty());
            let Some(ip) = ip else {
                warn!(container = %c.id, %network, "container has no address on service network");
                return None;
            };
            let name = c
                .names
                .first()
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_else(|| c.id.clone());
            Some(Instance {
                address: format!("{ip}:{port}"),
                id: c.id,
                name,
                created_at: c.created,
            })
        })
        .collect()
}

fn api_error(status: http::StatusCode, body: &[u8]) -> RuntimeError {
    let message = serde_json::from_slice::<ErrorBody>(body)
        .map(|b| b.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).into_owned());
    RuntimeError::Api {
        status: status.as_u16(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_runtime() -> DockerRuntime {
        DockerRuntime::new(&RuntimeConfig {
            network: "mynet".to_string(),
            ..RuntimeConfig::default()
        })
    }

    const LIST_JSON: &str = r#"[
        {
            "Id": "aaa111",
            "Names": ["/backend-1"],
            "Created": 1700000100,
            "NetworkSettings": { "Networks": { "mynet": { "IPAddress": "172.18.0.4" } } }
        },
        {
            "Id": "bbb222",
            "Names": ["/backend-2"],
            "Created": 1700000000,
            "NetworkSettings": { "Networks": { "bridge": { "IPAddress": "172.17.0.2" } } }
        },
        {
            "Id": "ccc333",
            "Names": [],
            "Created": 1700000200,
            "NetworkSettings": { "Networks": { "mynet": { "IPAddress": "" } } }
        }
    ]"#;

    #[test]
    fn summaries_map_to_instances_on_network() {
        let summaries: Vec<ContainerSummary> = serde_json::from_str(LIST_JSON).unwrap();
        let instances = instances_from_summaries(summaries, "mynet", 5000);

        // Only the container with an IP on "mynet" is dispatchable.
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].id, "aaa111");
        assert_eq!(instances[0].name, "backend-1");
        assert_eq!(instances[0].address, "172.18.0.4:5000");
        assert_eq!(instances[0].created_at, 1_700_000_100);
    }

    #[test]
    fn unnamed_container_falls_back_to_id() {
        let json = r#"[{
            "Id": "ddd444",
            "Created": 1,
            "NetworkSettings": { "Networks": { "mynet": { "IPAddress": "10.0.0.9" } } }
        }]"#;
        let summaries: Vec<ContainerSummary> = serde_json::from_str(json).unwrap();
        let instances = instances_from_summaries(summaries, "mynet", 8080);
        assert_eq!(instances[0].name, "ddd444");
        assert_eq!(instances[0].address, "10.0.0.9:8080");
    }

    #[test]
    fn list_query_filters_label_and_running() {
        let query = test_runtime().list_query();
        assert!(query.starts_with("filters="));

        let encoded = query.trim_start_matches("filters=");
        let decoded: String = url::form_urlencoded::parse(format!("f={encoded}").as_bytes())
            .map(|(_, v)| v.into_owned())
            .next()
            .unwrap();
        let filters: serde_json::Value = serde_json::from_str(&decoded).unwrap();
        assert_eq!(filters["label"][0], "autoscale_service=backend");
        assert_eq!(filters["status"][0], "running");
    }

    #[test]
    fn create_body_labels_and_attaches_network() {
        let body = test_runtime().create_body();
        assert_eq!(body["Image"], "backend");
        assert_eq!(body["Labels"]["autoscale_service"], "backend");
        assert_eq!(body["HostConfig"]["NetworkMode"], "mynet");
    }

    #[test]
    fn api_error_prefers_message_field() {
        let err = api_error(
            http::StatusCode::CONFLICT,
            br#"{"message":"conflict: name in use"}"#,
        );
        assert_eq!(err.to_string(), "runtime returned 409: conflict: name in use");

        let err = api_error(http::StatusCode::INTERNAL_SERVER_ERROR, b"boom");
        assert_eq!(err.to_string(), "runtime returned 500: boom");
    }

    #[tokio::test]
    async fn missing_socket_is_connect_error() {
        let runtime = DockerRuntime::new(&RuntimeConfig {
            docker_socket: "/nonexistent/docker.sock".to_string(),
            ..RuntimeConfig::default()
        });
        let err = runtime.list_running().await.unwrap_err();
        assert!(matches!(err, RuntimeError::Connect(_)));
    }
}
