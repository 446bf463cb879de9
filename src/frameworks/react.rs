use super::node::{has_dependency, node_version, read_package_json, PackageManager};
use super::templates::{self, DockerfileRenderer};
use super::{
    render_dockerfile, resolve_command, write_dockerignore_if_absent, BuildPlan, FrameworkHandler,
};
use crate::detector::Framework;
use crate::errors::PipelineError;
use crate::events::BuildSource;
use crate::models::Project;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// Client-side React app, built once and served by nginx.
pub struct ReactHandler {
    renderer: Arc<DockerfileRenderer>,
    port: u16,
}

impl ReactHandler {
    pub fn new(renderer: Arc<DockerfileRenderer>, port: u16) -> Self {
        Self { renderer, port }
    }
}

#[async_trait]
impl FrameworkHandler for ReactHandler {
    fn name(&self) -> &'static str {
        "react"
    }

    async fn scan(
        &self,
        project_path: &Path,
        project: &Project,
        _framework: Framework,
    ) -> Result<BuildPlan, PipelineError> {
        let package = read_package_json(project_path).await?;
        let manager = PackageManager::detect(project_path).await;
        let default_output = if has_dependency(&package, "vite") {
            "dist"
        } else {
            "build"
        };

        Ok(BuildPlan {
            template: Some(templates::STATIC_SITE),
            runtime_version: node_version(&package),
            package_manager: manager.as_str().to_string(),
            install_command: resolve_command(
                project.install_command.as_deref(),
                manager.install_command(),
            ),
            build_command: Some(resolve_command(
                project.build_command.as_deref(),
                manager.run_script("build"),
            )),
            run_command: String::new(),
            output_directory: Some(resolve_command(
                project.output_directory.as_deref(),
                default_output,
            )),
            port: self.port,
        })
    }

    async fn create_dockerfile(
        &self,
        project_path: &Path,
        plan: &BuildPlan,
    ) -> Result<BuildSource, PipelineError> {
        render_dockerfile(&self.renderer, project_path, plan).await
    }

    async fn add_dockerignore(&self, project_path: &Path) -> Result<(), PipelineError> {
        write_dockerignore_if_absent(project_path, templates::NODE_DOCKERIGNORE).await
    }
}
