//! Per-framework handlers: scan a detected project, write its Dockerfile and
//! `.dockerignore`, then hand off to the builder with `SOURCE_CODE_READY`.

mod container;
mod nextjs;
mod node;
mod python;
mod react;
pub mod templates;

pub use container::{ComposeHandler, DockerfileHandler};
pub use nextjs::{select_nextjs_template, NextJsHandler, NextTemplate};
pub use node::{NodeServerHandler, PackageManager};
pub use python::{python_install_flags, python_manager, python_version, PythonHandler, PythonManager};
pub use react::ReactHandler;

use crate::db::ProjectStore;
use crate::detector::Framework;
use crate::errors::PipelineError;
use crate::events::{BuildSource, Event, EventBus, EventHandler, SourceCodeReady, GENERATED_DOCKERFILE};
use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use templates::DockerfileRenderer;

/// Everything a Dockerfile template needs, resolved from project overrides and stack defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildPlan {
    #[serde(skip)]
    pub template: Option<&'static str>,
    pub runtime_version: String,
    pub package_manager: String,
    pub install_command: String,
    pub build_command: Option<String>,
    pub run_command: String,
    pub output_directory: Option<String>,
    pub port: u16,
}

#[async_trait]
pub trait FrameworkHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn scan(
        &self,
        project_path: &Path,
        project: &crate::models::Project,
        framework: Framework,
    ) -> Result<BuildPlan, PipelineError>;

    async fn create_dockerfile(
        &self,
        project_path: &Path,
        plan: &BuildPlan,
    ) -> Result<BuildSource, PipelineError>;

    async fn add_dockerignore(&self, project_path: &Path) -> Result<(), PipelineError>;
}

/// Project override when set and non-blank, otherwise the stack default.
pub fn resolve_command(project_override: Option<&str>, default: impl Into<String>) -> String {
    match project_override.map(str::trim) {
        Some(value) if !value.is_empty() => value.to_string(),
        _ => default.into(),
    }
}

pub(crate) async fn read_optional(path: &Path) -> Option<String> {
    tokio::fs::read_to_string(path).await.ok()
}

pub(crate) async fn render_dockerfile(
    renderer: &DockerfileRenderer,
    project_path: &Path,
    plan: &BuildPlan,
) -> Result<BuildSource, PipelineError> {
    let template = plan
        .template
        .ok_or_else(|| PipelineError::Template("build plan has no template".to_string()))?;
    let contents = renderer
        .render(template, plan)
        .map_err(|err| PipelineError::Template(format!("{:#}", err)))?;

    tokio::fs::write(project_path.join(GENERATED_DOCKERFILE), contents).await?;
    tracing::info!(template, "Wrote {}", GENERATED_DOCKERFILE);
    Ok(BuildSource::Dockerfile(GENERATED_DOCKERFILE.to_string()))
}

pub(crate) async fn write_dockerignore_if_absent(
    project_path: &Path,
    contents: &str,
) -> Result<(), PipelineError> {
    let path = project_path.join(".dockerignore");
    if tokio::fs::try_exists(&path).await? {
        tracing::debug!("Keeping existing .dockerignore");
        return Ok(());
    }
    tokio::fs::write(path, contents).await?;
    Ok(())
}

/// Handlers for every framework, sharing one renderer.
pub fn registry(
    renderer: Arc<DockerfileRenderer>,
    port: u16,
) -> Vec<(Framework, Arc<dyn FrameworkHandler>)> {
    let python: Arc<dyn FrameworkHandler> = Arc::new(PythonHandler::new(renderer.clone(), port));
    vec![
        (
            Framework::NextJs,
            Arc::new(NextJsHandler::new(renderer.clone(), port)) as Arc<dyn FrameworkHandler>,
        ),
        (
            Framework::React,
            Arc::new(ReactHandler::new(renderer.clone(), port)),
        ),
        (
            Framework::Express,
            Arc::new(NodeServerHandler::new(renderer, port)),
        ),
        (Framework::Django, python.clone()),
        (Framework::Flask, python.clone()),
        (Framework::FastApi, python),
        (Framework::Dockerfile, Arc::new(DockerfileHandler)),
        (Framework::DockerCompose, Arc::new(ComposeHandler)),
    ]
}

/// `FRAMEWORK_DETECTED.<fw>` stage wrapping one handler.
pub struct FrameworkStage {
    bus: EventBus,
    projects: Arc<dyn ProjectStore>,
    handler: Arc<dyn FrameworkHandler>,
}

impl FrameworkStage {
    pub fn new(
        bus: EventBus,
        projects: Arc<dyn ProjectStore>,
        handler: Arc<dyn FrameworkHandler>,
    ) -> Self {
        Self {
            bus,
            projects,
            handler,
        }
    }
}

#[async_trait]
impl EventHandler for FrameworkStage {
    fn name(&self) -> &'static str {
        self.handler.name()
    }

    #[tracing::instrument(name = "Prepare source", skip_all, fields(handler = self.handler.name()))]
    async fn handle(&self, event: Event) -> Result<(), PipelineError> {
        let Event::FrameworkDetected(detected) = event else {
            return Ok(());
        };

        let mut project = self
            .projects
            .find(detected.project_id)
            .await
            .map_err(PipelineError::Store)?
            .ok_or_else(|| {
                PipelineError::Validation(format!("project {} not found", detected.project_id))
            })?;

        let path = detected.project_path.as_path();
        let plan = self.handler.scan(path, &project, detected.framework).await?;
        let source = self.handler.create_dockerfile(path, &plan).await?;
        self.handler.add_dockerignore(path).await?;

        if let BuildSource::Compose(file) = &source {
            if project.docker_compose_file.as_deref() != Some(file.as_str()) {
                project.docker_compose_file = Some(file.clone());
                self.projects
                    .update(project)
                    .await
                    .map_err(PipelineError::Store)?;
            }
        }

        self.bus.emit(Event::SourceCodeReady(SourceCodeReady {
            project_path: detected.project_path,
            project_id: detected.project_id,
            source,
        }));
        Ok(())
    }
}
