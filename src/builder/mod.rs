//! Image builds and the build + start stage of the pipeline.

pub mod compose;
pub mod daemon;
mod line_buffer;
pub mod process;

pub use daemon::{BollardDaemon, ContainerDaemon, PROJECT_LABEL};
pub use line_buffer::LineBuffer;
pub use process::{CommandExecutor, CommandSpec, LineSink, ShellExecutor};

use crate::context::{self, ContextKey};
use crate::db::{DeploymentStore, ProjectStore};
use crate::errors::PipelineError;
use crate::events::{BuildSource, Deployed, Event, EventBus, EventHandler, SourceCodeReady};
use crate::lifecycle::ContainerLifecycle;
use crate::logs::{LogGateway, LogKey, LogStream, LogType};
use crate::models::{Deployment, DeploymentStatus, Project, ProjectStatus};
use crate::pipeline::DeploymentLocks;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Instrument;

#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub project_path: PathBuf,
    pub repository_id: String,
    pub deployment_id: i32,
    pub branch: String,
    pub image_tag: String,
    pub source: BuildSource,
    pub project_name: String,
}

impl BuildRequest {
    fn command(&self) -> CommandSpec {
        let cmd = match &self.source {
            BuildSource::Dockerfile(file) => {
                CommandSpec::docker(["build", "-t", self.image_tag.as_str(), "-f", file.as_str(), "."])
            }
            BuildSource::Compose(file) => CommandSpec::docker([
                "compose",
                "-p",
                self.project_name.as_str(),
                "-f",
                file.as_str(),
                "-f",
                compose::COMPOSE_OVERRIDE,
                "up",
                "-d",
                "--build",
            ]),
        };
        cmd.current_dir(&self.project_path)
    }
}

/// Runs `docker build` / `docker compose up --build`, streaming output to the build log.
#[derive(Clone)]
pub struct ImageBuilder {
    executor: Arc<dyn CommandExecutor>,
    gateway: LogGateway,
    deployments: Arc<dyn DeploymentStore>,
}

impl ImageBuilder {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        gateway: LogGateway,
        deployments: Arc<dyn DeploymentStore>,
    ) -> Self {
        Self {
            executor,
            gateway,
            deployments,
        }
    }

    /// Returns the images the build produced.
    pub async fn build(&self, request: &BuildRequest) -> Result<Vec<String>, PipelineError> {
        let images = match &request.source {
            BuildSource::Dockerfile(_) => vec![request.image_tag.clone()],
            BuildSource::Compose(file) => {
                compose::pin_images(
                    self.executor.as_ref(),
                    &request.project_path,
                    &request.project_name,
                    file,
                    &request.image_tag,
                )
                .await?
            }
        };

        let cmd = request.command();
        let span = tracing::info_span!(
            "Build image",
            image = %request.image_tag,
            deployment_id = request.deployment_id
        );
        let stream = LogStream::build(
            self.gateway.clone(),
            LogKey::new(&request.repository_id, &request.branch, LogType::Build),
            self.deployments.clone(),
            request.deployment_id,
        );
        self.executor.run_streaming(&cmd, &stream).instrument(span).await?;
        Ok(images)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// BuildStage: SOURCE_CODE_READY -> DEPLOYED
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct BuildStage {
    bus: EventBus,
    projects: Arc<dyn ProjectStore>,
    deployments: Arc<dyn DeploymentStore>,
    builder: ImageBuilder,
    daemon: Arc<dyn ContainerDaemon>,
    lifecycle: Arc<ContainerLifecycle>,
    gateway: LogGateway,
    locks: DeploymentLocks,
    registry: Option<String>,
    container_port: u16,
}

/// Names for one build of a project branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildNames {
    pub image: String,
    pub container: String,
}

impl BuildNames {
    pub fn new(registry: Option<&str>, project_name: &str, branch: &str, suffix: &str) -> Self {
        let base = format!("{}-{}", project_name, context::sanitize_project_name(branch));
        let image = match registry {
            Some(registry) => format!("{}/{}:{}", registry.trim_end_matches('/'), base, suffix),
            None => format!("{}:{}", base, suffix),
        };
        Self {
            image,
            container: format!("{}-{}", base, suffix),
        }
    }
}

/// Port of the last `EXPOSE` in a Dockerfile, so multi-stage builds report their final stage.
/// `EXPOSE 8080/tcp 9090` gives 8080; variable ports are skipped.
pub fn exposed_port(dockerfile: &str) -> Option<u16> {
    dockerfile
        .lines()
        .filter_map(|line| {
            let mut words = line.split_whitespace();
            match words.next() {
                Some(instruction) if instruction.eq_ignore_ascii_case("EXPOSE") => words
                    .filter_map(|word| word.split('/').next()?.parse::<u16>().ok())
                    .next(),
                _ => None,
            }
        })
        .last()
}

impl BuildStage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: EventBus,
        projects: Arc<dyn ProjectStore>,
        deployments: Arc<dyn DeploymentStore>,
        builder: ImageBuilder,
        daemon: Arc<dyn ContainerDaemon>,
        lifecycle: Arc<ContainerLifecycle>,
        gateway: LogGateway,
        locks: DeploymentLocks,
        registry: Option<String>,
        container_port: u16,
    ) -> Self {
        Self {
            bus,
            projects,
            deployments,
            builder,
            daemon,
            lifecycle,
            gateway,
            locks,
            registry,
            container_port,
        }
    }

    /// Port the built image listens on: its Dockerfile's `EXPOSE`, else the configured default.
    async fn image_port(&self, project_path: &Path, dockerfile: &str) -> u16 {
        match tokio::fs::read_to_string(project_path.join(dockerfile)).await {
            Ok(contents) => exposed_port(&contents).unwrap_or(self.container_port),
            Err(err) => {
                tracing::debug!(dockerfile, "Could not read Dockerfile: {}", err);
                self.container_port
            }
        }
    }

    /// Build, publish and start. Returns the host port for single-container projects.
    async fn build_and_start(
        &self,
        request: &BuildRequest,
        container_name: &str,
        container_port: u16,
    ) -> Result<Option<u16>, PipelineError> {
        let images = self.builder.build(request).await?;
        if self.registry.is_some() {
            for image in &images {
                self.daemon.push_image(image).await?;
            }
        }

        match &request.source {
            BuildSource::Compose(_) => Ok(None),
            BuildSource::Dockerfile(_) => {
                let port = self
                    .daemon
                    .start_container(
                        &request.image_tag,
                        container_name,
                        container_port,
                        &request.project_name,
                    )
                    .await?;
                Ok(Some(port))
            }
        }
    }

    async fn promote(
        &self,
        mut project: Project,
        mut deployment: Deployment,
        host_port: Option<u16>,
        request: &BuildRequest,
    ) -> Result<Deployment, PipelineError> {
        deployment.status = DeploymentStatus::Deployed;
        deployment.host_port = host_port.map(i32::from);
        let deployment = self
            .deployments
            .update(deployment)
            .await
            .map_err(PipelineError::Store)?;

        let superseded = project.active_deployment_id;
        project.active_deployment_id = Some(deployment.id);
        project.status = ProjectStatus::Running;
        let project = self.projects.update(project).await.map_err(PipelineError::Store)?;

        if let (Some(old_id), BuildSource::Dockerfile(_)) = (superseded, &request.source) {
            match self.deployments.find_by_id(old_id).await {
                Ok(Some(old)) if old.container_name != deployment.container_name => {
                    if let Err(err) = self.lifecycle.rm(&old.container_name, &request.project_path).await {
                        tracing::warn!("{}", err);
                    }
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(deployment_id = old_id, "Could not load superseded deployment: {}", err),
            }
        }

        match &request.source {
            BuildSource::Dockerfile(_) => self.lifecycle.follow_logs(
                &project.repo_id,
                &project.branch,
                &deployment.container_name,
            ),
            BuildSource::Compose(_) => self.lifecycle.follow_compose_logs(
                &request.project_path,
                &request.project_name,
                &project.repo_id,
                &project.branch,
            ),
        }
        Ok(deployment)
    }

    async fn mark_failed(&self, project: Project, mut deployment: Deployment, key: &LogKey, err: &PipelineError) {
        deployment.status = DeploymentStatus::Failed;
        if let Err(store_err) = self.deployments.update(deployment).await {
            tracing::error!("Failed to mark deployment failed: {}", store_err);
        }
        let project = Project {
            status: ProjectStatus::Failed,
            ..project
        };
        if let Err(store_err) = self.projects.update(project).await {
            tracing::error!("Failed to mark project failed: {}", store_err);
        }
        if let Err(queue_err) = self.gateway.publish(key, format!("Deployment failed: {}\n", err)).await {
            tracing::warn!("Failed to publish build error: {}", queue_err);
        }
    }

    async fn deploy(&self, event: SourceCodeReady) -> Result<(), PipelineError> {
        let project = self
            .projects
            .find(event.project_id)
            .await
            .map_err(PipelineError::Store)?
            .ok_or_else(|| PipelineError::Validation(format!("project {} not found", event.project_id)))?;

        let _guard = self.locks.acquire(&project.repo_id, &project.branch).await;

        let project_name = context::get(ContextKey::ProjectName)
            .unwrap_or_else(|| context::sanitize_project_name(&project.name));
        let suffix = context::get(ContextKey::BuildSuffix).unwrap_or_else(context::generate_build_suffix);
        let names = BuildNames::new(self.registry.as_deref(), &project_name, &project.branch, &suffix);

        let container_port = match &event.source {
            BuildSource::Dockerfile(file) => self.image_port(&event.project_path, file).await,
            BuildSource::Compose(_) => self.container_port,
        };
        let mut deployment = Deployment::new(
            project.id,
            project.branch.clone(),
            names.container.clone(),
            names.image.clone(),
            suffix,
        );
        if let BuildSource::Dockerfile(_) = &event.source {
            deployment.container_port = Some(i32::from(container_port));
        }
        let deployment = self
            .deployments
            .create(deployment)
            .await
            .map_err(PipelineError::Store)?;
        tracing::info!(deployment_id = deployment.id, image = %names.image, "Deployment started");

        let request = BuildRequest {
            project_path: event.project_path.clone(),
            repository_id: project.repo_id.clone(),
            deployment_id: deployment.id,
            branch: project.branch.clone(),
            image_tag: names.image.clone(),
            source: event.source.clone(),
            project_name,
        };
        let key = LogKey::new(&project.repo_id, &project.branch, LogType::Build);

        let built = self
            .build_and_start(&request, &names.container, container_port)
            .await;
        let outcome = match built {
            Ok(host_port) => {
                self.promote(project.clone(), deployment.clone(), host_port, &request)
                    .await
                    .map(|deployment| (deployment, host_port))
            }
            Err(err) => Err(err),
        };

        let result = match outcome {
            Ok((deployment, host_port)) => {
                tracing::info!(deployment_id = deployment.id, ?host_port, "Deployment live");
                self.bus.emit(Event::Deployed(Deployed {
                    project_id: project.id,
                    deployment_id: deployment.id,
                    container_name: deployment.container_name.clone(),
                    host_port,
                }));
                Ok(())
            }
            Err(err) => {
                self.mark_failed(project, deployment, &key, &err).await;
                Err(err)
            }
        };

        if let Err(err) = self.gateway.complete(&key).await {
            tracing::warn!("Failed to close build log: {}", err);
        }
        result
    }
}

#[async_trait]
impl EventHandler for BuildStage {
    fn name(&self) -> &'static str {
        "build_stage"
    }

    async fn handle(&self, event: Event) -> Result<(), PipelineError> {
        let Event::SourceCodeReady(ready) = event else {
            return Ok(());
        };
        let span = tracing::info_span!("Build stage", project_id = ready.project_id);
        self.deploy(ready).instrument(span).await
    }
}
