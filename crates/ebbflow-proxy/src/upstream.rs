//! Forwarding one request to one backend.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;

use crate::error::UpstreamError;

/// Headers that describe a single hop and are never copied across.
const HOP_BY_HOP: [&str; 8] = [
    "host",
    "content-length",
    "connection",
    "upgrade",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
];

/// A buffered inbound request, replayable against a second target.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub method: http::Method,
    /// Path plus query, e.g. `/load?n=3`.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ForwardRequest {
    pub fn get(path_and_query: impl Into<String>) -> Self {
        Self {
            method: http::Method::GET,
            path_and_query: path_and_query.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

/// Sends a request to a backend address.
pub trait Upstream: Send + Sync + 'static {
    fn send(
        &self,
        address: &str,
        request: &ForwardRequest,
    ) -> impl Future<Output = Result<http::Response<Bytes>, UpstreamError>> + Send;
}

/// Upstream over plain HTTP/1.1 with a pooled hyper client.
#[derive(Clone)]
pub struct HttpUpstream {
    client: Client<HttpConnector, Full<Bytes>>,
    timeout: Duration,
}

impl HttpUpstream {
    pub fn new(timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(timeout));
        Self {
            client: Client::builder(TokioExecutor::new()).build(connector),
            timeout,
        }
    }

    async fn exchange(
        &self,
        address: &str,
        request: &ForwardRequest,
    ) -> Result<http::Response<Bytes>, UpstreamError> {
        let uri = format!("http://{address}{}", request.path_and_query);
        let mut builder = http::Request::builder().method(request.method.clone()).uri(uri);
        if let Some(headers) = builder.headers_mut() {
            copy_end_to_end(&request.headers, headers);
        }
        let req = builder
            .body(Full::new(request.body.clone()))
            .map_err(|e| UpstreamError::Request {
                address: address.to_string(),
                message: e.to_string(),
            })?;

        let resp = self.client.request(req).await.map_err(|e| {
            if e.is_connect() {
                UpstreamError::Connect {
                    address: address.to_string(),
                    message: e.to_string(),
                }
            } else {
                UpstreamError::Request {
                    address: address.to_string(),
                    message: e.to_string(),
                }
            }
        })?;

        let (parts, body) = resp.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| UpstreamError::Request {
                address: address.to_string(),
                message: e.to_string(),
            })?
            .to_bytes();

        let mut out = http::Response::new(body);
        *out.status_mut() = parts.status;
        *out.version_mut() = parts.version;
        copy_end_to_end(&parts.headers, out.headers_mut());
        Ok(out)
    }
}

impl Upstream for HttpUpstream {
    async fn send(
        &self,
        address: &str,
        request: &ForwardRequest,
    ) -> Result<http::Response<Bytes>, UpstreamError> {
        match tokio::time::timeout(self.timeout, self.exchange(address, request)).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout {
                address: address.to_string(),
                timeout: self.timeout,
            }),
        }
    }
}

pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

fn copy_end_to_end(from: &HeaderMap, to: &mut HeaderMap) {
    for (name, value) in from {
        if !is_hop_by_hop(name) {
            to.append(name.clone(), value.clone());
        }
    }
}
