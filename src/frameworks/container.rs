use super::templates;
use super::{write_dockerignore_if_absent, BuildPlan, FrameworkHandler};
use crate::detector::Framework;
use crate::errors::PipelineError;
use crate::events::BuildSource;
use crate::models::Project;
use async_trait::async_trait;
use std::path::Path;

/// Project ships its own `Dockerfile`; it is used as is.
pub struct DockerfileHandler;

#[async_trait]
impl FrameworkHandler for DockerfileHandler {
    fn name(&self) -> &'static str {
        "dockerfile"
    }

    async fn scan(
        &self,
        _project_path: &Path,
        _project: &Project,
        _framework: Framework,
    ) -> Result<BuildPlan, PipelineError> {
        Ok(BuildPlan::default())
    }

    async fn create_dockerfile(
        &self,
        project_path: &Path,
        _plan: &BuildPlan,
    ) -> Result<BuildSource, PipelineError> {
        if !tokio::fs::try_exists(project_path.join("Dockerfile")).await? {
            return Err(PipelineError::Validation("Dockerfile disappeared".to_string()));
        }
        Ok(BuildSource::Dockerfile("Dockerfile".to_string()))
    }

    async fn add_dockerignore(&self, project_path: &Path) -> Result<(), PipelineError> {
        write_dockerignore_if_absent(project_path, templates::GENERIC_DOCKERIGNORE).await
    }
}

const COMPOSE_FILES: [&str; 2] = ["docker-compose.yml", "docker-compose.yaml"];

/// Multi-container project driven by its compose file.
pub struct ComposeHandler;

#[async_trait]
impl FrameworkHandler for ComposeHandler {
    fn name(&self) -> &'static str {
        "docker_compose"
    }

    async fn scan(
        &self,
        _project_path: &Path,
        _project: &Project,
        _framework: Framework,
    ) -> Result<BuildPlan, PipelineError> {
        Ok(BuildPlan::default())
    }

    async fn create_dockerfile(
        &self,
        project_path: &Path,
        _plan: &BuildPlan,
    ) -> Result<BuildSource, PipelineError> {
        for name in COMPOSE_FILES {
            if tokio::fs::try_exists(project_path.join(name)).await? {
                return Ok(BuildSource::Compose(name.to_string()));
            }
        }
        Err(PipelineError::Validation("no compose file found".to_string()))
    }

    async fn add_dockerignore(&self, _project_path: &Path) -> Result<(), PipelineError> {
        // each service has its own build context
        Ok(())
    }
}
