use super::templates::{self, DockerfileRenderer};
use super::{
    read_optional, render_dockerfile, resolve_command, write_dockerignore_if_absent, BuildPlan,
    FrameworkHandler,
};
use crate::detector::{requirement_name, Framework};
use crate::errors::PipelineError;
use crate::events::BuildSource;
use crate::models::Project;
use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use std::sync::{Arc, OnceLock};

const DEFAULT_PYTHON_VERSION: &str = "3.11";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PythonManager {
    Poetry,
    Pipenv,
    Requirements,
}

impl PythonManager {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Poetry => "poetry",
            Self::Pipenv => "pipenv",
            Self::Requirements => "requirements",
        }
    }

    fn install_command(&self, flags: &str) -> String {
        match self {
            Self::Poetry => format!(
                "pip install --no-cache-dir poetry && poetry config virtualenvs.create false && poetry install --no-root {}",
                flags
            )
            .trim_end()
            .to_string(),
            Self::Pipenv => {
                "pip install --no-cache-dir pipenv && pipenv install --system --deploy".to_string()
            }
            Self::Requirements => "pip install --no-cache-dir -r requirements.txt".to_string(),
        }
    }
}

fn minor_version() -> &'static Regex {
    static MINOR: OnceLock<Regex> = OnceLock::new();
    MINOR.get_or_init(|| Regex::new(r"(?:^|[^\d.])3\.(\d+)").expect("static regex"))
}

/// `3.X` from the first `3.<minor>` in `text`, when the minor is supported. The `3` must start
/// a version, so `4.3.8` and `13.1` are not read as Python 3.
fn supported_version(text: &str) -> Option<String> {
    let minor: u32 = minor_version().captures(text)?[1].parse().ok()?;
    (6..=13).contains(&minor).then(|| format!("3.{}", minor))
}

fn section_lines<'a>(toml: &'a str, header: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    toml.lines()
        .map(str::trim)
        .skip_while(move |line| *line != header)
        .skip(1)
        .take_while(|line| !line.starts_with('['))
}

fn has_section(toml: &str, header: &str) -> bool {
    toml.lines().any(|line| line.trim() == header)
}

fn poetry_python_constraint(pyproject: &str) -> Option<&str> {
    section_lines(pyproject, "[tool.poetry.dependencies]").find_map(|line| {
        let (key, value) = line.split_once('=')?;
        (key.trim() == "python").then(|| value.trim())
    })
}

fn requirements_python_constraint(requirements: &str) -> Option<&str> {
    requirements.lines().map(str::trim).find(|line| {
        requirement_name(line).eq_ignore_ascii_case("python") && line.len() > "python".len()
    })
}

/// First valid version from: poetry `python` constraint, `runtime.txt`, `.python-version`,
/// a `python` line in `requirements.txt`. Falls back to 3.11.
pub fn python_version(
    pyproject: Option<&str>,
    runtime_txt: Option<&str>,
    python_version_file: Option<&str>,
    requirements: Option<&str>,
) -> String {
    let candidates = [
        pyproject.and_then(poetry_python_constraint),
        runtime_txt,
        python_version_file,
        requirements.and_then(requirements_python_constraint),
    ];
    candidates
        .into_iter()
        .flatten()
        .find_map(supported_version)
        .unwrap_or_else(|| DEFAULT_PYTHON_VERSION.to_string())
}

pub fn python_manager(pyproject: Option<&str>, has_pipfile: bool) -> PythonManager {
    match pyproject {
        Some(toml) if has_section(toml, "[tool.poetry]") || has_section(toml, "[tool.poetry.dependencies]") => {
            PythonManager::Poetry
        }
        _ if has_pipfile => PythonManager::Pipenv,
        _ => PythonManager::Requirements,
    }
}

/// `--without dev` only when poetry has a dev group to skip.
pub fn python_install_flags(manager: PythonManager, pyproject: Option<&str>) -> String {
    let has_dev_group = pyproject
        .map(|toml| {
            has_section(toml, "[tool.poetry.group.dev.dependencies]")
                || has_section(toml, "[tool.poetry.dev-dependencies]")
        })
        .unwrap_or(false);
    if manager == PythonManager::Poetry && has_dev_group {
        "--without dev".to_string()
    } else {
        String::new()
    }
}

/// Django, Flask and FastAPI share one handler; only the server defaults differ.
pub struct PythonHandler {
    renderer: Arc<DockerfileRenderer>,
    port: u16,
}

impl PythonHandler {
    pub fn new(renderer: Arc<DockerfileRenderer>, port: u16) -> Self {
        Self { renderer, port }
    }

    /// Package providing the server (installed alongside project deps) and the command.
    async fn server_defaults(
        &self,
        project_path: &Path,
        framework: Framework,
    ) -> Result<(&'static str, String), PipelineError> {
        let port = self.port;
        match framework {
            Framework::Django => {
                let module = django_module(project_path).await.ok_or_else(|| {
                    PipelineError::Validation("no Django wsgi.py found".to_string())
                })?;
                Ok((
                    "gunicorn",
                    format!("gunicorn {}.wsgi:application --bind 0.0.0.0:{}", module, port),
                ))
            }
            Framework::Flask => Ok(("gunicorn", format!("gunicorn app:app --bind 0.0.0.0:{}", port))),
            Framework::FastApi => Ok((
                "uvicorn",
                format!("uvicorn main:app --host 0.0.0.0 --port {}", port),
            )),
            other => Err(PipelineError::Validation(format!(
                "{} is not a Python framework",
                other
            ))),
        }
    }
}

/// Directory holding the Django project's `wsgi.py`.
async fn django_module(project_path: &Path) -> Option<String> {
    let mut entries = tokio::fs::read_dir(project_path).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        if tokio::fs::try_exists(entry.path().join("wsgi.py"))
            .await
            .unwrap_or(false)
        {
            return Some(entry.file_name().to_string_lossy().to_string());
        }
    }
    None
}

#[async_trait]
impl FrameworkHandler for PythonHandler {
    fn name(&self) -> &'static str {
        "python"
    }

    async fn scan(
        &self,
        project_path: &Path,
        project: &Project,
        framework: Framework,
    ) -> Result<BuildPlan, PipelineError> {
        let pyproject = read_optional(&project_path.join("pyproject.toml")).await;
        let runtime_txt = read_optional(&project_path.join("runtime.txt")).await;
        let version_file = read_optional(&project_path.join(".python-version")).await;
        let requirements = read_optional(&project_path.join("requirements.txt")).await;
        let has_pipfile = tokio::fs::try_exists(project_path.join("Pipfile"))
            .await
            .unwrap_or(false);

        let version = python_version(
            pyproject.as_deref(),
            runtime_txt.as_deref(),
            version_file.as_deref(),
            requirements.as_deref(),
        );
        let manager = python_manager(pyproject.as_deref(), has_pipfile);
        let flags = python_install_flags(manager, pyproject.as_deref());
        tracing::debug!(version = %version, manager = manager.as_str(), flags = %flags, "Python toolchain");

        let (server_package, default_run) = self.server_defaults(project_path, framework).await?;
        let default_install = format!(
            "{} && pip install --no-cache-dir {}",
            manager.install_command(&flags),
            server_package
        );
        let build_command = match framework {
            Framework::Django => Some(resolve_command(
                project.build_command.as_deref(),
                "python manage.py collectstatic --noinput",
            )),
            _ => project
                .build_command
                .as_deref()
                .map(str::trim)
                .filter(|cmd| !cmd.is_empty())
                .map(str::to_string),
        };

        Ok(BuildPlan {
            template: Some(templates::PYTHON_APP),
            runtime_version: version,
            package_manager: manager.as_str().to_string(),
            install_command: resolve_command(project.install_command.as_deref(), default_install),
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
        write_dockerignore_if_absent(project_path, templates::PYTHON_DOCKERIGNORE).await
    }
}
