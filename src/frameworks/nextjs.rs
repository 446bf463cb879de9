use super::node::{node_version, read_package_json, PackageManager};
use super::templates::{self, DockerfileRenderer};
use super::{
    read_optional, render_dockerfile, resolve_command, write_dockerignore_if_absent, BuildPlan,
    FrameworkHandler,
};
use crate::detector::Framework;
use crate::errors::PipelineError;
use crate::events::BuildSource;
use crate::models::Project;
use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use std::sync::{Arc, OnceLock};

const CONFIG_FILES: [&str; 3] = ["next.config.js", "next.config.mjs", "next.config.ts"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextTemplate {
    Default,
    Static,
    Standalone,
}

/// Template for the `output` value of `next.config.*`.
pub fn select_nextjs_template(output: Option<&str>) -> NextTemplate {
    match output {
        Some("export") => NextTemplate::Static,
        Some("standalone") => NextTemplate::Standalone,
        _ => NextTemplate::Default,
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct NextConfig {
    output: Option<String>,
    dist_dir: Option<String>,
}

fn parse_next_config(source: &str) -> NextConfig {
    static OUTPUT: OnceLock<Regex> = OnceLock::new();
    static DIST_DIR: OnceLock<Regex> = OnceLock::new();
    let output = OUTPUT.get_or_init(|| {
        Regex::new(r#"output\s*:\s*['"`]([A-Za-z]+)['"`]"#).expect("static regex")
    });
    let dist_dir = DIST_DIR.get_or_init(|| {
        Regex::new(r#"distDir\s*:\s*['"`]([^'"`]+)['"`]"#).expect("static regex")
    });

    NextConfig {
        output: output.captures(source).map(|c| c[1].to_string()),
        dist_dir: dist_dir.captures(source).map(|c| c[1].to_string()),
    }
}

/// Where the build lands. A static export never ends up in `.next`.
fn output_directory(template: NextTemplate, dist_dir: Option<&str>) -> String {
    match (template, dist_dir) {
        (NextTemplate::Static, None | Some(".next")) => "out".to_string(),
        (_, Some(dir)) => dir.trim_end_matches('/').to_string(),
        (_, None) => ".next".to_string(),
    }
}

pub struct NextJsHandler {
    renderer: Arc<DockerfileRenderer>,
    port: u16,
}

impl NextJsHandler {
    pub fn new(renderer: Arc<DockerfileRenderer>, port: u16) -> Self {
        Self { renderer, port }
    }

    async fn read_config(project_path: &Path) -> NextConfig {
        for name in CONFIG_FILES {
            if let Some(source) = read_optional(&project_path.join(name)).await {
                return parse_next_config(&source);
            }
        }
        NextConfig::default()
    }
}

#[async_trait]
impl FrameworkHandler for NextJsHandler {
    fn name(&self) -> &'static str {
        "nextjs"
    }

    async fn scan(
        &self,
        project_path: &Path,
        project: &Project,
        _framework: Framework,
    ) -> Result<BuildPlan, PipelineError> {
        let package = read_package_json(project_path).await?;
        let manager = PackageManager::detect(project_path).await;
        let config = Self::read_config(project_path).await;
        let template = select_nextjs_template(config.output.as_deref());

        let output = resolve_command(
            project.output_directory.as_deref(),
            output_directory(template, config.dist_dir.as_deref()),
        );
        let (template_name, default_run) = match template {
            NextTemplate::Default => (templates::NEXTJS_DEFAULT, format!("{} start", manager.as_str())),
            NextTemplate::Standalone => (
                templates::NEXTJS_STANDALONE,
                r#"["node", "server.js"]"#.to_string(),
            ),
            NextTemplate::Static => (templates::STATIC_SITE, String::new()),
        };
        tracing::debug!(?template, output = %output, "Next.js configuration");

        Ok(BuildPlan {
            template: Some(template_name),
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
            run_command: resolve_command(project.run_command.as_deref(), default_run),
            output_directory: Some(output),
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
