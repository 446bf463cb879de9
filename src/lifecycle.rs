//! Container lifecycle through the runtime CLI: start, stop, rollback, cleanup, removal,
//! and runtime log following.

use crate::builder::{compose, CommandExecutor, CommandSpec, ContainerDaemon};
use crate::db::{DeploymentStore, ProjectStore};
use crate::errors::PipelineError;
use crate::logs::{LogGateway, LogKey, LogStream, LogType};
use crate::models::{Deployment, DeploymentStatus, ProjectStatus};
use crate::pipeline::DeploymentLocks;
use std::path::Path;
use std::sync::Arc;

pub struct ContainerLifecycle {
    executor: Arc<dyn CommandExecutor>,
    daemon: Arc<dyn ContainerDaemon>,
    gateway: LogGateway,
    container_port: u16,
}

impl ContainerLifecycle {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        daemon: Arc<dyn ContainerDaemon>,
        gateway: LogGateway,
        container_port: u16,
    ) -> Self {
        Self {
            executor,
            daemon,
            gateway,
            container_port,
        }
    }

    /// Deployments recorded before the image port was tracked use the configured default.
    fn port_mapping(&self, deployment: &Deployment) -> String {
        let container_port = deployment
            .container_port
            .and_then(|port| u16::try_from(port).ok())
            .unwrap_or(self.container_port);
        match deployment.host_port {
            Some(host_port) => format!("{}:{}", host_port, container_port),
            None => container_port.to_string(),
        }
    }

    /// Replace any container of the same name with a fresh one from the deployment's image.
    #[tracing::instrument(name = "Start deployment", skip(self, path, deployment), fields(container = %deployment.container_name))]
    pub async fn start(
        &self,
        path: &Path,
        repo_id: &str,
        deployment: &Deployment,
    ) -> Result<(), PipelineError> {
        let remove = CommandSpec::docker(["rm", "-f", deployment.container_name.as_str()])
            .current_dir(path);
        if let Err(err) = self.executor.run(&remove).await {
            tracing::debug!("No previous container to remove: {}", err);
        }

        let run = CommandSpec::docker([
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            deployment.container_name.clone(),
            "--restart".to_string(),
            "unless-stopped".to_string(),
            "-p".to_string(),
            self.port_mapping(deployment),
            deployment.image_name.clone(),
        ])
        .current_dir(path);
        self.executor.run(&run).await?;

        self.follow_logs(repo_id, &deployment.branch, &deployment.container_name);
        Ok(())
    }

    pub async fn stop(&self, path: &Path, deployment: &Deployment) -> Result<(), PipelineError> {
        let stop = CommandSpec::docker(["stop", deployment.container_name.as_str()]).current_dir(path);
        self.executor.run(&stop).await.map(|_| ())
    }

    /// Bring `target` back up. The incumbent is left alone; callers remove it once this
    /// succeeds.
    pub async fn rollback(
        &self,
        path: &Path,
        project_name: &str,
        repo_id: &str,
        compose_file: Option<&str>,
        target: &Deployment,
    ) -> Result<(), PipelineError> {
        let result = match compose_file {
            Some(compose_file) => {
                self.rollback_compose(path, project_name, repo_id, compose_file, target)
                    .await
            }
            None => match self.daemon.pull_image(&target.image_name).await {
                Ok(()) => self.start(path, repo_id, target).await,
                Err(err) => Err(err),
            },
        };

        result.map_err(|source| PipelineError::Rollback {
            target: target.id,
            source: Box::new(source),
        })
    }

    /// Pin the stack to `target`'s images, pull any that are gone, and recreate the services
    /// without building.
    async fn rollback_compose(
        &self,
        path: &Path,
        project_name: &str,
        repo_id: &str,
        compose_file: &str,
        target: &Deployment,
    ) -> Result<(), PipelineError> {
        let images = compose::pin_images(
            self.executor.as_ref(),
            path,
            project_name,
            compose_file,
            &target.image_name,
        )
        .await?;
        for image in &images {
            self.daemon.pull_image(image).await?;
        }

        let up = CommandSpec::docker([
            "compose",
            "-p",
            project_name,
            "-f",
            compose_file,
            "-f",
            compose::COMPOSE_OVERRIDE,
            "up",
            "-d",
            "--no-build",
        ])
        .current_dir(path);
        self.executor.run(&up).await?;

        self.follow_compose_logs(path, project_name, repo_id, &target.branch);
        Ok(())
    }

    /// Drop the project's unused networks.
    pub async fn cleanup(&self, path: &Path, project_name: &str) -> Result<(), PipelineError> {
        let filter = format!("label=com.docker.compose.project={}", project_name);
        let prune = CommandSpec::docker(["network", "prune", "-f", "--filter", filter.as_str()])
            .current_dir(path);
        self.executor.run(&prune).await.map(|_| ())
    }

    pub async fn rm(&self, container_name: &str, path: &Path) -> Result<(), PipelineError> {
        let remove = CommandSpec::docker(["rm", "-f", container_name]).current_dir(path);
        self.executor
            .run(&remove)
            .await
            .map(|_| ())
            .map_err(|source| PipelineError::RemoveContainer {
                container: container_name.to_string(),
                source: Box::new(source),
            })
    }

    pub async fn rmi(&self, image: &str) -> Result<(), PipelineError> {
        self.executor
            .run(&CommandSpec::docker(["rmi", image]))
            .await
            .map(|_| ())
    }

    /// Stream `docker logs -f` into the runtime log until the container goes away.
    pub fn follow_logs(&self, repo_id: &str, branch: &str, container_name: &str) {
        let cmd = CommandSpec::docker(["logs", "-f", container_name]);
        self.spawn_follow(cmd, LogKey::new(repo_id, branch, LogType::Runtime));
    }

    pub fn follow_compose_logs(&self, path: &Path, project_name: &str, repo_id: &str, branch: &str) {
        let cmd = CommandSpec::docker(["compose", "-p", project_name, "logs", "-f"]).current_dir(path);
        self.spawn_follow(cmd, LogKey::new(repo_id, branch, LogType::Runtime));
    }

    fn spawn_follow(&self, cmd: CommandSpec, key: LogKey) {
        let executor = self.executor.clone();
        let gateway = self.gateway.clone();
        tokio::spawn(async move {
            let stream = LogStream::runtime(gateway.clone(), key.clone());
            if let Err(err) = executor.run_streaming(&cmd, &stream).await {
                tracing::debug!(command = %cmd, "Runtime log stream ended: {}", err);
            }
            if let Err(err) = gateway.complete(&key).await {
                tracing::warn!("Failed to close runtime log: {}", err);
            }
        });
    }
}

/// Roll a project back to one of its earlier deployments.
///
/// The target comes up first; only then is the superseded container (and its image)
/// removed and the active pointer moved. Historical rows are left untouched.
#[tracing::instrument(name = "Rollback project", skip(lifecycle, projects, deployments, locks))]
pub async fn rollback_project(
    lifecycle: &ContainerLifecycle,
    projects: &dyn ProjectStore,
    deployments: &dyn DeploymentStore,
    locks: &DeploymentLocks,
    project_id: i32,
    target_id: i32,
) -> Result<(), PipelineError> {
    let mut project = projects
        .find(project_id)
        .await
        .map_err(PipelineError::Store)?
        .ok_or_else(|| PipelineError::Validation(format!("project {} not found", project_id)))?;
    let target = deployments
        .find_by_id(target_id)
        .await
        .map_err(PipelineError::Store)?
        .filter(|d| d.project_id == project.id)
        .ok_or_else(|| {
            PipelineError::Validation(format!(
                "deployment {} does not belong to project {}",
                target_id, project_id
            ))
        })?;
    if target.status != DeploymentStatus::Deployed {
        return Err(PipelineError::Validation(format!(
            "deployment {} never went live",
            target_id
        )));
    }
    if project.active_deployment_id == Some(target.id) {
        tracing::info!("Target is already active");
        return Ok(());
    }

    let _guard = locks.acquire(&project.repo_id, &project.branch).await;
    let path = Path::new(&project.local_repo_path);
    lifecycle
        .rollback(
            path,
            &crate::context::sanitize_project_name(&project.name),
            &project.repo_id,
            project.docker_compose_file.as_deref(),
            &target,
        )
        .await?;

    let superseded = match project.active_deployment_id {
        Some(id) => deployments.find_by_id(id).await.map_err(PipelineError::Store)?,
        None => None,
    };
    if let (Some(old), None) = (&superseded, &project.docker_compose_file) {
        if old.container_name != target.container_name {
            if let Err(err) = lifecycle.rm(&old.container_name, path).await {
                tracing::warn!("{}", err);
            }
            if old.image_name != target.image_name {
                if let Err(err) = lifecycle.rmi(&old.image_name).await {
                    tracing::warn!(image = %old.image_name, "Failed to remove image: {}", err);
                }
            }
        }
    }

    project.active_deployment_id = Some(target.id);
    project.status = ProjectStatus::Running;
    projects.update(project).await.map_err(PipelineError::Store)?;
    tracing::info!(deployment_id = target.id, "Rolled back");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::daemon::mock::MockDaemon;
    use crate::builder::process::mock::MockExecutor;
    use crate::db::MemoryStore;
    use crate::logs::LogJob;
    use crate::models::Project;
    use crate::queue::MemoryQueue;

    fn lifecycle(executor: Arc<MockExecutor>) -> ContainerLifecycle {
        ContainerLifecycle::new(
            executor,
            Arc::new(MockDaemon::with_port(49200)),
            LogGateway::new(Arc::new(MemoryQueue::<LogJob>::new())),
            3000,
        )
    }

    fn deployed(project_id: i32, suffix: &str, host_port: i32) -> Deployment {
        let mut deployment = Deployment::new(
            project_id,
            "main".into(),
            format!("shop-main-{}", suffix),
            format!("shop-main:{}", suffix),
            suffix.into(),
        );
        deployment.status = DeploymentStatus::Deployed;
        deployment.host_port = Some(host_port);
        deployment
    }

    #[tokio::test]
    async fn test_start_replaces_same_name_container() {
        let executor = Arc::new(MockExecutor::default());
        lifecycle(executor.clone())
            .start(Path::new("/srv/shop"), "acme/shop", &deployed(1, "aaaa", 49001))
            .await
            .unwrap();

        let calls = executor.calls();
        assert_eq!(calls[0], "docker rm -f shop-main-aaaa");
        assert_eq!(
            calls[1],
            "docker run -d --name shop-main-aaaa --restart unless-stopped -p 49001:3000 shop-main:aaaa"
        );
    }

    #[tokio::test]
    async fn test_start_maps_the_port_the_image_listens_on() {
        let executor = Arc::new(MockExecutor::default());
        let deployment = Deployment {
            container_port: Some(8000),
            ..deployed(1, "aaaa", 49001)
        };
        lifecycle(executor.clone())
            .start(Path::new("/srv/shop"), "acme/shop", &deployment)
            .await
            .unwrap();

        assert!(executor.calls()[1].contains("-p 49001:8000 "));
    }

    #[tokio::test]
    async fn test_rm_failure_names_the_container() {
        let executor = Arc::new(MockExecutor::default());
        executor.fail_on("docker rm", 1);
        let err = lifecycle(executor)
            .rm("shop-main-aaaa", Path::new("/srv/shop"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("shop-main-aaaa"));
        assert!(matches!(err, PipelineError::RemoveContainer { .. }));
    }

    #[tokio::test]
    async fn test_rollback_failure_is_wrapped() {
        let executor = Arc::new(MockExecutor::default());
        executor.fail_on("docker run", 125);
        let err = lifecycle(executor)
            .rollback(
                Path::new("/srv/shop"),
                "shop",
                "acme/shop",
                None,
                &Deployment {
                    id: 4,
                    ..deployed(1, "aaaa", 49001)
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Rollback { target: 4, .. }));
    }

    #[tokio::test]
    async fn test_rollback_project_brings_target_up_before_removing_current() {
        let store = Arc::new(MemoryStore::new());
        let project = store
            .insert_project(Project::new(
                "acme/shop".into(),
                "main".into(),
                "shop".into(),
                "/srv/shop".into(),
            ))
            .unwrap();
        let old = DeploymentStore::create(store.as_ref(), deployed(project.id, "aaaa", 49001))
            .await
            .unwrap();
        let current = DeploymentStore::create(store.as_ref(), deployed(project.id, "bbbb", 49002))
            .await
            .unwrap();
        ProjectStore::update(
            store.as_ref(),
            Project {
                active_deployment_id: Some(current.id),
                ..project.clone()
            },
        )
        .await
        .unwrap();

        let executor = Arc::new(MockExecutor::default());
        rollback_project(
            &lifecycle(executor.clone()),
            store.as_ref(),
            store.as_ref(),
            &DeploymentLocks::new(),
            project.id,
            old.id,
        )
        .await
        .unwrap();

        let calls = executor.calls();
        let run_old = calls
            .iter()
            .position(|c| c.starts_with("docker run") && c.ends_with("shop-main:aaaa"))
            .unwrap();
        let rm_current = calls
            .iter()
            .position(|c| c == "docker rm -f shop-main-bbbb")
            .unwrap();
        assert!(run_old < rm_current);
        assert!(calls.contains(&"docker rmi shop-main:bbbb".to_string()));

        let project = store.find(project.id).await.unwrap().unwrap();
        assert_eq!(project.active_deployment_id, Some(old.id));
        assert_eq!(store.deployments_for(project.id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_compose_rollback_runs_the_target_images() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let project = store
            .insert_project(Project {
                docker_compose_file: Some("docker-compose.yml".into()),
                ..Project::new(
                    "acme/shop".into(),
                    "main".into(),
                    "shop".into(),
                    dir.path().to_string_lossy().into_owned(),
                )
            })
            .unwrap();
        let old = DeploymentStore::create(store.as_ref(), deployed(project.id, "aaaa", 49001))
            .await
            .unwrap();
        let current = DeploymentStore::create(store.as_ref(), deployed(project.id, "bbbb", 49002))
            .await
            .unwrap();
        ProjectStore::update(
            store.as_ref(),
            Project {
                active_deployment_id: Some(current.id),
                ..project.clone()
            },
        )
        .await
        .unwrap();

        let executor = Arc::new(MockExecutor::default());
        executor.respond_on(
            "docker compose -p shop -f docker-compose.yml config",
            r#"{"services": {"web": {"build": {"context": "."}}, "cache": {"image": "redis:7"}}}"#,
        );
        let daemon = Arc::new(MockDaemon::with_port(49200));
        let lifecycle = ContainerLifecycle::new(
            executor.clone(),
            daemon.clone(),
            LogGateway::new(Arc::new(MemoryQueue::<LogJob>::new())),
            3000,
        );
        rollback_project(
            &lifecycle,
            store.as_ref(),
            store.as_ref(),
            &DeploymentLocks::new(),
            project.id,
            old.id,
        )
        .await
        .unwrap();

        assert_eq!(daemon.calls(), vec!["pull shop-main-web:aaaa".to_string()]);
        let pinned = std::fs::read_to_string(dir.path().join(compose::COMPOSE_OVERRIDE)).unwrap();
        assert!(pinned.contains("shop-main-web:aaaa"));
        assert!(!pinned.contains("bbbb"));
        assert!(executor.calls().contains(
            &"docker compose -p shop -f docker-compose.yml -f docker-compose.dockhand.yml up -d --no-build"
                .to_string()
        ));

        let project = store.find(project.id).await.unwrap().unwrap();
        assert_eq!(project.active_deployment_id, Some(old.id));
    }

    #[tokio::test]
    async fn test_compose_rollback_failure_is_wrapped() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(MockExecutor::default());
        executor.respond_on(
            "docker compose -p shop -f docker-compose.yml config",
            r#"{"services": {"web": {"build": {"context": "."}}}}"#,
        );
        executor.fail_on("docker compose -p shop -f docker-compose.yml -f", 1);

        let err = lifecycle(executor)
            .rollback(
                dir.path(),
                "shop",
                "acme/shop",
                Some("docker-compose.yml"),
                &Deployment {
                    id: 9,
                    ..deployed(1, "aaaa", 49001)
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Rollback { target: 9, .. }));
    }

    #[tokio::test]
    async fn test_rollback_to_failed_deployment_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let project = store
            .insert_project(Project::new(
                "acme/shop".into(),
                "main".into(),
                "shop".into(),
                "/srv/shop".into(),
            ))
            .unwrap();
        let mut failed = deployed(project.id, "cccc", 49003);
        failed.status = DeploymentStatus::Failed;
        let failed = DeploymentStore::create(store.as_ref(), failed).await.unwrap();

        let executor = Arc::new(MockExecutor::default());
        let err = rollback_project(
            &lifecycle(executor.clone()),
            store.as_ref(),
            store.as_ref(),
            &DeploymentLocks::new(),
            project.id,
            failed.id,
        )
        .await
        .unwrap_err();
        assert!(err.is_validation());
        assert!(executor.calls().is_empty());
    }
}
