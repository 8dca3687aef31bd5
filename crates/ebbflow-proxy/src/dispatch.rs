//! Dispatcher: picks a target per request and forwards to it.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::{DispatchError, UpstreamError};
use crate::policy::{Policy, PolicySwitch};
use crate::table::{RoutingTable, RoutingTarget};
use crate::upstream::{ForwardRequest, Upstream};

pub struct Dispatcher<U> {
    table: Arc<RoutingTable>,
    policy: Arc<PolicySwitch>,
    upstream: U,
}

impl<U: Upstream> Dispatcher<U> {
    pub fn new(table: Arc<RoutingTable>, policy: Arc<PolicySwitch>, upstream: U) -> Self {
        Self {
            table,
            policy,
            upstream,
        }
    }

    pub fn table(&self) -> &Arc<RoutingTable> {
        &self.table
    }

    pub fn policy(&self) -> &Arc<PolicySwitch> {
        &self.policy
    }

    /// Forward `request` to a healthy target.
    ///
    /// The snapshot and policy are captured once at entry; a refresh or a
    /// policy switch mid-request does not affect it. On a transport
    /// failure the request is replayed once against a different healthy
    /// target, if there is one.
    pub async fn forward(&self, request: &ForwardRequest) -> Result<http::Response<Bytes>, DispatchError> {
        let snapshot = self.table.snapshot();
        let policy = self.policy.current();

        let healthy = snapshot.healthy();
        let Some(first) = policy
            .select(&healthy, self.policy.cursor())
            .map(|i| Arc::clone(healthy[i]))
        else {
            warn!(targets = snapshot.len(), "no healthy targets");
            return Err(DispatchError::NoTargetsAvailable);
        };

        let err = match self.attempt(&first, request, policy).await {
            Ok(resp) => return Ok(resp),
            Err(e) => e,
        };

        let alternates: Vec<&Arc<RoutingTarget>> = healthy
            .iter()
            .copied()
            .filter(|t| !Arc::ptr_eq(t, &first) && t.is_healthy())
            .collect();
        let Some(second) = policy
            .select(&alternates, self.policy.cursor())
            .map(|i| Arc::clone(alternates[i]))
        else {
            return Err(DispatchError::Upstream {
                attempts: 1,
                source: err,
            });
        };

        debug!(
            failed = %first.address,
            retry = %second.address,
            "retrying on alternate target"
        );
        self.attempt(&second, request, policy)
            .await
            .map_err(|source| DispatchError::Upstream {
                attempts: 2,
                source,
            })
    }

    async fn attempt(
        &self,
        target: &RoutingTarget,
        request: &ForwardRequest,
        policy: Policy,
    ) -> Result<http::Response<Bytes>, UpstreamError> {
        let started = Instant::now();
        match self.upstream.send(&target.address, request).await {
            Ok(resp) => {
                let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                self.table.record_result(target, latency_ms, true);
                debug!(
                    target = %target.address,
                    %policy,
                    status = resp.status().as_u16(),
                    latency_ms,
                    "forwarded"
                );
                Ok(resp)
            }
            Err(e) => {
                self.table.record_result(target, 0.0, false);
                warn!(target = %target.address, error = %e, "upstream attempt failed");
                Err(e)
            }
        }
    }
}
