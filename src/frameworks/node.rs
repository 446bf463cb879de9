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
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

const DEFAULT_NODE_VERSION: &str = "20";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Npm,
    Yarn,
    Pnpm,
}

impl PackageManager {
    /// Decided by lockfile: pnpm, then yarn, else npm.
    pub async fn detect(project_path: &Path) -> Self {
        let exists = |name: &str| {
            let path = project_path.join(name);
            async move { tokio::fs::try_exists(path).await.unwrap_or(false) }
        };
        if exists("pnpm-lock.yaml").await {
            Self::Pnpm
        } else if exists("yarn.lock").await {
            Self::Yarn
        } else {
            Self::Npm
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Npm => "npm",
            Self::Yarn => "yarn",
            Self::Pnpm => "pnpm",
        }
    }

    pub fn install_command(&self) -> &'static str {
        match self {
            Self::Npm => "npm install",
            Self::Yarn => "yarn install --frozen-lockfile",
            Self::Pnpm => "pnpm install --frozen-lockfile",
        }
    }

    pub fn run_script(&self, script: &str) -> String {
        format!("{} run {}", self.as_str(), script)
    }
}

pub(crate) async fn read_package_json(project_path: &Path) -> Result<Value, PipelineError> {
    let raw = read_optional(&project_path.join("package.json"))
        .await
        .ok_or_else(|| PipelineError::Validation("package.json is missing".to_string()))?;
    serde_json::from_str(&raw)
        .map_err(|err| PipelineError::Validation(format!("invalid package.json: {}", err)))
}

/// Major version from `engines.node`, e.g. `">=18.17"` gives `"18"`.
pub(crate) fn node_version(package: &Value) -> String {
    package
        .pointer("/engines/node")
        .and_then(Value::as_str)
        .and_then(|range| {
            let digits: String = range
                .chars()
                .skip_while(|c| !c.is_ascii_digit())
                .take_while(|c| c.is_ascii_digit())
                .collect();
            (!digits.is_empty()).then_some(digits)
        })
        .unwrap_or_else(|| DEFAULT_NODE_VERSION.to_string())
}

pub(crate) fn has_dependency(package: &Value, name: &str) -> bool {
    ["dependencies", "devDependencies"]
        .iter()
        .any(|section| package.get(section).and_then(|deps| deps.get(name)).is_some())
}

fn has_script(package: &Value, script: &str) -> bool {
    package.pointer(&format!("/scripts/{}", script)).is_some()
}

/// Long-running Node server (express).
pub struct NodeServerHandler {
    renderer: Arc<DockerfileRenderer>,
    port: u16,
}

impl NodeServerHandler {
    pub fn new(renderer: Arc<DockerfileRenderer>, port: u16) -> Self {
        Self { renderer, port }
    }
}

#[async_trait]
impl FrameworkHandler for NodeServerHandler {
    fn name(&self) -> &'static str {
        "node_server"
    }

    async fn scan(
        &self,
        project_path: &Path,
        project: &Project,
        _framework: Framework,
    ) -> Result<BuildPlan, PipelineError> {
        let package = read_package_json(project_path).await?;
        let manager = PackageManager::detect(project_path).await;

        let default_run = if has_script(&package, "start") {
            format!("{} start", manager.as_str())
        } else {
            let main = package
                .get("main")
                .and_then(Value::as_str)
                .unwrap_or("index.js");
            format!("node {}", main)
        };
        let build_command = match project.build_command.as_deref() {
            Some(cmd) if !cmd.trim().is_empty() => Some(cmd.trim().to_string()),
            _ => has_script(&package, "build").then(|| manager.run_script("build")),
        };

        Ok(BuildPlan {
            template: Some(templates::NODE_SERVER),
            runtime_version: node_version(&package),
            package_manager: manager.as_str().to_string(),
            install_command: resolve_command(
                project.install_command.as_deref(),
                manager.install_command(),
            ),
            build_command,
            run_command: resolve_command(project.run_command.as_deref(), default_run),
            output_directory: None,
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_node_version_takes_major_from_engines() {
        assert_eq!(node_version(&json!({"engines": {"node": ">=18.17.0"}})), "18");
        assert_eq!(node_version(&json!({"engines": {"node": "22.x"}})), "22");
        assert_eq!(node_version(&json!({"engines": {"node": "lts"}})), "20");
        assert_eq!(node_version(&json!({})), "20");
    }

    #[tokio::test]
    async fn test_lockfile_picks_package_manager() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(PackageManager::detect(dir.path()).await, PackageManager::Npm);

        std::fs::write(dir.path().join("yarn.lock"), "").unwrap();
        assert_eq!(PackageManager::detect(dir.path()).await, PackageManager::Yarn);

        std::fs::write(dir.path().join("pnpm-lock.yaml"), "").unwrap();
        assert_eq!(PackageManager::detect(dir.path()).await, PackageManager::Pnpm);
    }

    #[tokio::test]
    async fn test_express_scan_prefers_start_script_and_overrides() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"scripts": {"start": "node server.js"}, "dependencies": {"express": "4"}}"#,
        )
        .unwrap();
        let handler =
            NodeServerHandler::new(Arc::new(DockerfileRenderer::new().unwrap()), 3000);

        let mut project = Project::default();
        let plan = handler
            .scan(dir.path(), &project, Framework::Express)
            .await
            .unwrap();
        assert_eq!(plan.run_command, "npm start");
        assert_eq!(plan.build_command, None);

        project.run_command = Some("node dist/main.js".into());
        let plan = handler
            .scan(dir.path(), &project, Framework::Express)
            .await
            .unwrap();
        assert_eq!(plan.run_command, "node dist/main.js");
    }
}
