//! ebbflow-runtime — the instance registry.
//!
//! Talks to the container runtime to list the running instances of the
//! managed backend service and to create or remove them. The registry is
//! the only component that changes the instance count.
//!
//! # Components
//!
//! - **`runtime`**: the [`ContainerRuntime`] seam
//! - **`docker`**: Docker Engine API client over the local unix socket
//! - **`registry`**: [`InstanceRegistry`]: ordered listing and serialized `scale_to`

pub mod docker;
pub mod error;
pub mod registry;
pub mod runtime;

pub use docker::DockerRuntime;
pub use error::{RuntimeError, RuntimeResult, ScaleError};
pub use registry::{InstanceRegistry, ScaleOutcome};
pub use runtime::ContainerRuntime;
