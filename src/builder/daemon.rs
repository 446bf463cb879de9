use crate::errors::PipelineError;
use async_trait::async_trait;
use bollard::container::{Config, CreateContainerOptions, InspectContainerOptions, StartContainerOptions};
use bollard::image::{CreateImageOptions, PushImageOptions};
use bollard::models::{HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum};
use bollard::Docker;
use futures_util::TryStreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

pub const PROJECT_LABEL: &str = "dockhand.project";

/// Container daemon operations that need structured responses.
#[async_trait]
pub trait ContainerDaemon: Send + Sync {
    /// Create and start `name` from `image`, publishing `container_port` on a random host
    /// port. Returns the host port.
    async fn start_container(
        &self,
        image: &str,
        name: &str,
        container_port: u16,
        project: &str,
    ) -> Result<u16, PipelineError>;

    /// Make `image` available locally, pulling only when it is missing.
    async fn pull_image(&self, image: &str) -> Result<(), PipelineError>;

    async fn push_image(&self, image: &str) -> Result<(), PipelineError>;
}

pub struct BollardDaemon {
    docker: Docker,
    poll_attempts: u32,
    poll_interval: Duration,
}

impl BollardDaemon {
    pub fn connect() -> Result<Self, PipelineError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self {
            docker,
            poll_attempts: 5,
            poll_interval: Duration::from_secs(1),
        })
    }

    async fn host_port(&self, name: &str, port_key: &str) -> Result<Option<u16>, PipelineError> {
        let inspected = self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await?;

        Ok(inspected
            .network_settings
            .and_then(|settings| settings.ports)
            .and_then(|ports| ports.get(port_key).cloned().flatten())
            .and_then(|bindings| {
                bindings
                    .into_iter()
                    .find_map(|binding| binding.host_port.and_then(|port| port.parse().ok()))
            }))
    }
}

/// Ask `inspect` for the published host port up to `attempts` times, `interval` apart.
/// The daemon fills in port bindings asynchronously after start.
pub(crate) async fn poll_host_port<F, Fut>(
    name: &str,
    attempts: u32,
    interval: Duration,
    mut inspect: F,
) -> Result<u16, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<u16>, PipelineError>>,
{
    for attempt in 1..=attempts {
        if let Some(port) = inspect().await? {
            tracing::info!(host_port = port, attempt, "Container port published");
            return Ok(port);
        }
        if attempt < attempts {
            tokio::time::sleep(interval).await;
        }
    }

    Err(PipelineError::NoPortMapping {
        container: name.to_string(),
    })
}

/// `registry/name:tag` into (`registry/name`, `tag`); a port in the registry is not a tag.
fn split_tag(image: &str) -> (&str, &str) {
    match image.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo, tag),
        _ => (image, "latest"),
    }
}

#[async_trait]
impl ContainerDaemon for BollardDaemon {
    #[tracing::instrument(name = "Start container", skip(self))]
    async fn start_container(
        &self,
        image: &str,
        name: &str,
        container_port: u16,
        project: &str,
    ) -> Result<u16, PipelineError> {
        let port_key = format!("{}/tcp", container_port);
        let config = Config {
            image: Some(image.to_string()),
            exposed_ports: Some(HashMap::from([(port_key.clone(), HashMap::new())])),
            labels: Some(HashMap::from([(PROJECT_LABEL.to_string(), project.to_string())])),
            host_config: Some(HostConfig {
                port_bindings: Some(HashMap::from([(
                    port_key.clone(),
                    Some(vec![PortBinding {
                        host_ip: Some("0.0.0.0".to_string()),
                        host_port: Some(String::new()),
                    }]),
                )])),
                restart_policy: Some(RestartPolicy {
                    name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
                    maximum_retry_count: None,
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.to_string(),
                    platform: None,
                }),
                config,
            )
            .await?;
        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await?;

        let port_key = port_key.as_str();
        poll_host_port(name, self.poll_attempts, self.poll_interval, move || {
            self.host_port(name, port_key)
        })
        .await
    }

    async fn pull_image(&self, image: &str) -> Result<(), PipelineError> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        tracing::info!(image, "Pulling image");
        self.docker
            .create_image(
                Some(CreateImageOptions {
                    from_image: image.to_string(),
                    ..Default::default()
                }),
                None,
                None,
            )
            .try_collect::<Vec<_>>()
            .await?;
        Ok(())
    }

    async fn push_image(&self, image: &str) -> Result<(), PipelineError> {
        let (repository, tag) = split_tag(image);
        tracing::info!(image, "Pushing image");
        self.docker
            .push_image(repository, Some(PushImageOptions { tag }), None)
            .try_collect::<Vec<_>>()
            .await?;
        Ok(())
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    pub struct MockDaemon {
        pub port: Option<u16>,
        pub calls: Mutex<Vec<String>>,
    }

    impl MockDaemon {
        pub fn with_port(port: u16) -> Self {
            Self {
                port: Some(port),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn without_port() -> Self {
            Self {
                port: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ContainerDaemon for MockDaemon {
        async fn start_container(
            &self,
            image: &str,
            name: &str,
            container_port: u16,
            _project: &str,
        ) -> Result<u16, PipelineError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("start {} {} {}", image, name, container_port));
            self.port.ok_or_else(|| PipelineError::NoPortMapping {
                container: name.to_string(),
            })
        }

        async fn pull_image(&self, image: &str) -> Result<(), PipelineError> {
            self.calls.lock().unwrap().push(format!("pull {}", image));
            Ok(())
        }

        async fn push_image(&self, image: &str) -> Result<(), PipelineError> {
            self.calls.lock().unwrap().push(format!("push {}", image));
            Ok(())
        }
    }
}
