//! The container runtime seam.

use std::future::Future;

use ebbflow_core::{Instance, InstanceId};

use crate::error::RuntimeResult;

/// Operations the registry needs from a container runtime.
///
/// Implementations are bound to one managed service: `list_running`
/// returns only running containers carrying the service label, and
/// `create_instance` starts a new container of the service image.
pub trait ContainerRuntime: Send + Sync + 'static {
    /// Running instances of the managed service, in any order.
    fn list_running(&self) -> impl Future<Output = RuntimeResult<Vec<Instance>>> + Send;

    /// Create and start one instance, returning its ID.
    fn create_instance(&self) -> impl Future<Output = RuntimeResult<InstanceId>> + Send;

    /// Stop and remove an instance. Removing an instance that is already
    /// gone succeeds.
    fn remove_instance(&self, id: &str) -> impl Future<Output = RuntimeResult<()>> + Send;
}
