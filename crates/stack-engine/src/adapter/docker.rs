//! [`ContainerEngine`] backed by the Docker Engine API through `bollard`.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, RemoveContainerOptions,
    RestartContainerOptions, StartContainerOptions, StopContainerOptions, UpdateContainerOptions,
    UploadToContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::{CreateImageOptions, RemoveImageOptions};
use bollard::models::{
    EndpointSettings, HostConfig, PortBinding, RestartPolicy as DockerRestartPolicy,
    RestartPolicyNameEnum,
};
use bollard::network::{ConnectNetworkOptions, CreateNetworkOptions, InspectNetworkOptions};
use bollard::Docker;
use futures::TryStreamExt;
use std::collections::HashMap;
use tracing::debug;

use super::engine::{
    ContainerConfig, ContainerEngine, ContainerInfo, ImageInfo, NetworkAttachment, NetworkConfig,
    NetworkInfo, RestartPolicy,
};
use crate::error::AdapterError;

pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect using `DOCKER_HOST` or the platform's default socket.
    pub fn connect() -> Result<Self, AdapterError> {
        let docker = Docker::connect_with_local_defaults().map_err(map_err)?;
        Ok(Self { docker })
    }

    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }
}

fn map_err(err: DockerError) -> AdapterError {
    match err {
        DockerError::DockerResponseServerError {
            status_code: 404,
            message,
        } => AdapterError::NotFound(message),
        DockerError::DockerResponseServerError {
            status_code,
            message,
        } => AdapterError::Engine(format!("{status_code}: {message}")),
        DockerError::IOError { err } => AdapterError::RuntimeUnavailable(err.to_string()),
        DockerError::RequestTimeoutError => {
            AdapterError::RuntimeUnavailable("request timed out".into())
        }
        DockerError::SocketNotFoundError(path) => {
            AdapterError::RuntimeUnavailable(format!("socket not found: {path}"))
        }
        other => AdapterError::Engine(other.to_string()),
    }
}

fn to_docker_policy(policy: RestartPolicy) -> DockerRestartPolicy {
    let name = match policy {
        RestartPolicy::No => RestartPolicyNameEnum::NO,
        RestartPolicy::Always => RestartPolicyNameEnum::ALWAYS,
        RestartPolicy::UnlessStopped => RestartPolicyNameEnum::UNLESS_STOPPED,
        RestartPolicy::OnFailure => RestartPolicyNameEnum::ON_FAILURE,
    };
    DockerRestartPolicy {
        name: Some(name),
        maximum_retry_count: None,
    }
}

fn from_docker_policy(policy: Option<&DockerRestartPolicy>) -> RestartPolicy {
    match policy.and_then(|p| p.name) {
        Some(RestartPolicyNameEnum::ALWAYS) => RestartPolicy::Always,
        Some(RestartPolicyNameEnum::UNLESS_STOPPED) => RestartPolicy::UnlessStopped,
        Some(RestartPolicyNameEnum::ON_FAILURE) => RestartPolicy::OnFailure,
        _ => RestartPolicy::No,
    }
}

fn endpoint(attachment: &NetworkAttachment) -> EndpointSettings {
    EndpointSettings {
        aliases: (!attachment.aliases.is_empty()).then(|| attachment.aliases.clone()),
        ..Default::default()
    }
}

/// Create-time endpoints hold the first network only; older API versions
/// reject more. The remaining networks are connected after create.
fn split_endpoints(
    networks: &[NetworkAttachment],
) -> (HashMap<String, EndpointSettings>, &[NetworkAttachment]) {
    match networks.split_first() {
        Some((first, rest)) => (HashMap::from([(first.name.clone(), endpoint(first))]), rest),
        None => (HashMap::new(), &[]),
    }
}

/// Single-file tar archive, as the copy endpoint expects.
fn tar_single_file(path: &str, content: &[u8]) -> Result<Vec<u8>, AdapterError> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, path.trim_start_matches('/'), content)
        .map_err(|e| AdapterError::Engine(format!("archive {path}: {e}")))?;
    builder
        .into_inner()
        .map_err(|e| AdapterError::Engine(format!("archive {path}: {e}")))
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn create_network(&self, config: &NetworkConfig) -> Result<NetworkInfo, AdapterError> {
        self.docker
            .create_network(CreateNetworkOptions {
                name: config.name.as_str(),
                driver: config.driver.as_str(),
                check_duplicate: true,
                ..Default::default()
            })
            .await
            .map_err(map_err)?;
        self.inspect_network(&config.name).await
    }

    async fn inspect_network(&self, id: &str) -> Result<NetworkInfo, AdapterError> {
        let network = self
            .docker
            .inspect_network(id, None::<InspectNetworkOptions<String>>)
            .await
            .map_err(map_err)?;
        Ok(NetworkInfo {
            id: network.id.unwrap_or_default(),
            name: network.name.unwrap_or_default(),
            driver: network.driver.unwrap_or_default(),
        })
    }

    async fn remove_network(&self, id: &str) -> Result<(), AdapterError> {
        self.docker.remove_network(id).await.map_err(map_err)
    }

    async fn pull_image(&self, reference: &str) -> Result<ImageInfo, AdapterError> {
        debug!(image = reference, "Pulling");
        self.docker
            .create_image(
                Some(CreateImageOptions {
                    from_image: reference,
                    ..Default::default()
                }),
                None,
                None,
            )
            .try_collect::<Vec<_>>()
            .await
            .map_err(map_err)?;
        let mut info = self.inspect_image(reference).await?;
        info.name = reference.to_string();
        Ok(info)
    }

    async fn inspect_image(&self, id: &str) -> Result<ImageInfo, AdapterError> {
        let image = self.docker.inspect_image(id).await.map_err(map_err)?;
        let name = image
            .repo_tags
            .as_ref()
            .and_then(|tags| tags.first().cloned())
            .unwrap_or_else(|| id.to_string());
        Ok(ImageInfo {
            id: image.id.unwrap_or_default(),
            name,
        })
    }

    async fn remove_image(&self, id: &str) -> Result<(), AdapterError> {
        self.docker
            .remove_image(id, None::<RemoveImageOptions>, None)
            .await
            .map(|_| ())
            .map_err(map_err)
    }

    async fn create_container(&self, config: &ContainerConfig) -> Result<ContainerInfo, AdapterError> {
        let mut exposed_ports = HashMap::new();
        let mut port_bindings = HashMap::new();
        for port in &config.ports {
            let key = format!("{}/tcp", port.internal);
            exposed_ports.insert(key.clone(), HashMap::new());
            port_bindings.insert(
                key,
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: Some(port.external.to_string()),
                }]),
            );
        }

        let (endpoints, extra_networks) = split_endpoints(&config.networks);

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            restart_policy: Some(to_docker_policy(config.restart)),
            network_mode: config.networks.first().map(|n| n.name.clone()),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: config.name.clone(),
                    platform: None,
                }),
                Config {
                    image: Some(config.image.clone()),
                    env: Some(config.env.clone()),
                    exposed_ports: Some(exposed_ports),
                    host_config: Some(host_config),
                    networking_config: Some(bollard::container::NetworkingConfig {
                        endpoints_config: endpoints,
                    }),
                    ..Default::default()
                },
            )
            .await
            .map_err(map_err)?;

        for attachment in extra_networks {
            let connected = self
                .docker
                .connect_network(
                    &attachment.name,
                    ConnectNetworkOptions {
                        container: created.id.clone(),
                        endpoint_config: endpoint(attachment),
                    },
                )
                .await
                .map_err(map_err);
            if let Err(e) = connected {
                // not yet recorded anywhere, so it must not outlive the failed create
                if let Err(cleanup) = self.remove_container(&created.id).await {
                    debug!(id = %created.id, error = %cleanup, "Cleanup after failed connect");
                }
                return Err(e);
            }
            debug!(id = %created.id, network = %attachment.name, "Network connected");
        }
        self.inspect_container(&created.id).await
    }

    async fn start_container(&self, id: &str) -> Result<(), AdapterError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(map_err)
    }

    async fn stop_container(&self, id: &str) -> Result<(), AdapterError> {
        self.docker
            .stop_container(id, None::<StopContainerOptions>)
            .await
            .map_err(map_err)
    }

    async fn restart_container(&self, id: &str) -> Result<(), AdapterError> {
        self.docker
            .restart_container(id, None::<RestartContainerOptions>)
            .await
            .map_err(map_err)
    }

    async fn update_restart_policy(&self, id: &str, policy: RestartPolicy) -> Result<(), AdapterError> {
        self.docker
            .update_container(
                id,
                UpdateContainerOptions::<String> {
                    restart_policy: Some(to_docker_policy(policy)),
                    ..Default::default()
                },
            )
            .await
            .map_err(map_err)
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInfo, AdapterError> {
        let container = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(map_err)?;
        Ok(ContainerInfo {
            id: container.id.unwrap_or_default(),
            name: container
                .name
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_default(),
            image: container.image.unwrap_or_default(),
            running: container
                .state
                .and_then(|s| s.running)
                .unwrap_or(false),
            restart: from_docker_policy(
                container
                    .host_config
                    .as_ref()
                    .and_then(|h| h.restart_policy.as_ref()),
            ),
        })
    }

    async fn remove_container(&self, id: &str) -> Result<(), AdapterError> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(map_err)
    }

    async fn copy_file(&self, id: &str, path: &str, content: &[u8]) -> Result<(), AdapterError> {
        let archive = tar_single_file(path, content)?;
        self.docker
            .upload_to_container(
                id,
                Some(UploadToContainerOptions {
                    path: "/".to_string(),
                    ..Default::default()
                }),
                archive.into(),
            )
            .await
            .map_err(map_err)
    }
}
