use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::RuntimeError;
use crate::types::{ContainerInspect, RawEvent};

pub mod docker;
pub use docker::DockerRuntime;

/// A container reported as running by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningContainer {
    pub id: String,
    pub name: String,
}

/// Read-only view of the container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Fetch the inspect payload of one container.
    async fn inspect(&self, id: &str) -> Result<ContainerInspect, RuntimeError>;

    /// List the containers currently running.
    async fn list_running(&self) -> Result<Vec<RunningContainer>, RuntimeError>;

    /// Subscribe to the live event stream. The stream ends when the
    /// connection to the runtime drops.
    fn events(&self) -> BoxStream<'static, Result<RawEvent, RuntimeError>>;
}
