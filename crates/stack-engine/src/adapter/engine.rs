//! # Container Engine Boundary
//!
//! The low-level operations every runtime must provide. Kind adapters
//! translate resource properties into these typed configs; engines
//! ([`MemoryEngine`](super::MemoryEngine), `DockerEngine`) talk to the
//! actual runtime.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

use crate::error::AdapterError;

fn default_driver() -> String {
    "bridge".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    #[serde(default = "default_driver")]
    pub driver: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAttachment {
    /// Network name to join.
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub internal: u16,
    pub external: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    #[default]
    No,
    Always,
    UnlessStopped,
    OnFailure,
}

impl Display for RestartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RestartPolicy::No => "no",
            RestartPolicy::Always => "always",
            RestartPolicy::UnlessStopped => "unless-stopped",
            RestartPolicy::OnFailure => "on-failure",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub name: String,
    /// Image id or reference.
    pub image: String,
    #[serde(default)]
    pub networks: Vec<NetworkAttachment>,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub restart: RestartPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub id: String,
    pub name: String,
    pub driver: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub running: bool,
    pub restart: RestartPolicy,
}

/// Runtime operations used by the kind adapters.
///
/// Lookups accept either the runtime id or the name. Every method maps a
/// missing object to [`AdapterError::NotFound`] and an unreachable runtime to
/// [`AdapterError::RuntimeUnavailable`].
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn create_network(&self, config: &NetworkConfig) -> Result<NetworkInfo, AdapterError>;
    async fn inspect_network(&self, id: &str) -> Result<NetworkInfo, AdapterError>;
    async fn remove_network(&self, id: &str) -> Result<(), AdapterError>;

    /// Pull `reference` if it is not present locally.
    async fn pull_image(&self, reference: &str) -> Result<ImageInfo, AdapterError>;
    async fn inspect_image(&self, id: &str) -> Result<ImageInfo, AdapterError>;
    async fn remove_image(&self, id: &str) -> Result<(), AdapterError>;

    /// Create without starting.
    async fn create_container(&self, config: &ContainerConfig) -> Result<ContainerInfo, AdapterError>;
    async fn start_container(&self, id: &str) -> Result<(), AdapterError>;
    async fn stop_container(&self, id: &str) -> Result<(), AdapterError>;
    async fn restart_container(&self, id: &str) -> Result<(), AdapterError>;
    async fn update_restart_policy(&self, id: &str, policy: RestartPolicy) -> Result<(), AdapterError>;
    async fn inspect_container(&self, id: &str) -> Result<ContainerInfo, AdapterError>;
    /// Remove, stopping first if running.
    async fn remove_container(&self, id: &str) -> Result<(), AdapterError>;

    /// Write `content` to `path` inside the container's filesystem.
    async fn copy_file(&self, id: &str, path: &str, content: &[u8]) -> Result<(), AdapterError>;
}
