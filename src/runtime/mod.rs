use crate::error::DiscoveryError;
use crate::types::{ContainerInspection, ContainerSnapshot};
use async_trait::async_trait;

pub mod docker;
pub use docker::DockerRuntime;

#[cfg(test)]
pub mod mock;

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Lists running containers.
    async fn list_containers(&self) -> Result<Vec<ContainerSnapshot>, DiscoveryError>;

    /// Fetches the details of a single container.
    async fn inspect_container(&self, id: &str) -> Result<ContainerInspection, DiscoveryError>;

    /// Runs a command inside a container and returns its combined output.
    async fn exec_in_container(&self, id: &str, cmd: &[&str]) -> Result<String, DiscoveryError>;
}
