//! Container engine seam.
//!
//! The provisioner only needs a handful of engine operations, so they sit
//! behind [`ContainerRuntime`]. [`DockerRuntime`] is the bollard-backed
//! implementation used against a real daemon.

use crate::error::RuntimeError;
use crate::infra::config;
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogsOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding};
use bollard::Docker;
use futures_util::stream::{BoxStream, StreamExt, TryStreamExt};
use std::collections::HashMap;

/// Raw output chunks (stdout and stderr interleaved) from a container.
pub type LogStream = BoxStream<'static, Result<Vec<u8>, RuntimeError>>;

/// Engine-agnostic description of a container to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: Option<String>,
    pub image: String,
    pub env: Vec<String>,
    pub container_port: u16,
    pub host_port: u16,
    pub host_ip: String,
    /// `host_path:container_path` bind mounts.
    pub binds: Vec<String>,
}

impl ContainerSpec {
    pub fn port_key(&self) -> String {
        format!("{}/tcp", self.container_port)
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError>;

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError>;

    /// Creates (but does not start) a container, returning its id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;

    async fn stop_container(&self, id: &str) -> Result<(), RuntimeError>;

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Follows the combined output from the beginning. Dropping the stream closes it.
    async fn follow_logs(&self, id: &str) -> Result<LogStream, RuntimeError>;
}

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Connects using the socket override if one is configured, otherwise
    /// bollard's local defaults (`DOCKER_HOST` or the platform socket).
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = match config::docker_socket_override() {
            Some(socket) => {
                tracing::debug!(%socket, "using docker socket override");
                let socket = socket.trim_start_matches("unix://");
                Docker::connect_with_socket(socket, 120, bollard::API_DEFAULT_VERSION)
            }
            None => Docker::connect_with_local_defaults(),
        }
        .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;
        Ok(Self::new(docker))
    }

    /// Checks the daemon answers before any work is attempted.
    pub async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))
    }
}

fn split_image(image: &str) -> (&str, &str) {
    // A colon after the last slash separates the tag; earlier colons belong to a registry port.
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[name_start..].rfind(':') {
        Some(i) => (&image[..name_start + i], &image[name_start + i + 1..]),
        None => (image, "latest"),
    }
}

fn is_not_found(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        let (from_image, tag) = split_image(image);
        let options = CreateImageOptions {
            from_image,
            tag,
            ..Default::default()
        };
        let progress = self.docker.create_image(Some(options), None, None);
        futures_util::pin_mut!(progress);
        while let Some(info) = progress.try_next().await? {
            if let Some(status) = info.status {
                tracing::trace!(%image, %status, "pull progress");
            }
        }
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let port_key = spec.port_key();
        let exposed_ports = HashMap::from([(port_key.clone(), HashMap::new())]);
        let port_bindings = HashMap::from([(
            port_key,
            Some(vec![PortBinding {
                host_ip: Some(spec.host_ip.clone()),
                host_port: Some(spec.host_port.to_string()),
            }]),
        )]);

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings),
                binds: Some(spec.binds.clone()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let options = spec.name.as_ref().map(|name| CreateContainerOptions {
            name: name.clone(),
            platform: None,
        });

        let response = self.docker.create_container(options, config).await?;
        for warning in &response.warnings {
            tracing::warn!(id = %response.id, %warning, "container create warning");
        }
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn stop_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .stop_container(id, None::<StopContainerOptions>)
            .await?;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .remove_container(id, None::<RemoveContainerOptions>)
            .await?;
        Ok(())
    }

    async fn follow_logs(&self, id: &str) -> Result<LogStream, RuntimeError> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            tail: "all".to_string(),
            ..Default::default()
        };
        let stream = self
            .docker
            .logs(id, Some(options))
            .map(|chunk| {
                chunk
                    .map(|output| output.into_bytes().to_vec())
                    .map_err(RuntimeError::from)
            })
            .boxed();
        Ok(stream)
    }
}
