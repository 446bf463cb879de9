mod classifier;
mod definitions;

pub use classifier::MarkerKind;
pub(crate) use classifier::requirement_name;
pub use definitions::{definitions_for, FrameworkDefinition, FRAMEWORK_DEFINITIONS};

use crate::context::{self, ContextKey};
use crate::db::ProjectStore;
use crate::errors::PipelineError;
use crate::events::{Event, EventBus, EventHandler, FrameworkDetected};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Framework: the closed set of stacks we know how to containerize
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Framework {
    #[serde(rename = "nextjs")]
    NextJs,
    #[serde(rename = "react")]
    React,
    #[serde(rename = "express")]
    Express,
    #[serde(rename = "django")]
    Django,
    #[serde(rename = "flask")]
    Flask,
    #[serde(rename = "fastapi")]
    FastApi,
    #[serde(rename = "dockerfile")]
    Dockerfile,
    #[serde(rename = "docker-compose")]
    DockerCompose,
}

impl Framework {
    pub const ALL: [Framework; 8] = [
        Framework::NextJs,
        Framework::React,
        Framework::Express,
        Framework::Django,
        Framework::Flask,
        Framework::FastApi,
        Framework::Dockerfile,
        Framework::DockerCompose,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NextJs => "nextjs",
            Self::React => "react",
            Self::Express => "express",
            Self::Django => "django",
            Self::Flask => "flask",
            Self::FastApi => "fastapi",
            Self::Dockerfile => "dockerfile",
            Self::DockerCompose => "docker-compose",
        }
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Framework {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|framework| framework.as_str() == s)
            .ok_or_else(|| format!("unknown framework {}", s))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// FileSystem trait: directory access behind a seam
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub trait FileSystem: Send + Sync {
    fn list_dir(&self, path: &Path) -> Result<Vec<String>, std::io::Error>;
    fn read_to_string(&self, path: &Path) -> Result<String, std::io::Error>;
}

/// Production filesystem using std::fs. Calls block, so async callers go through
/// `spawn_blocking`.
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn list_dir(&self, path: &Path) -> Result<Vec<String>, std::io::Error> {
        let entries = std::fs::read_dir(path)?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        Ok(entries)
    }

    fn read_to_string(&self, path: &Path) -> Result<String, std::io::Error> {
        std::fs::read_to_string(path)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// detect: classify a project directory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub framework: Framework,
    pub config_file: String,
}

pub fn detect(project_path: &Path, fs: &dyn FileSystem) -> Result<Detection, PipelineError> {
    let files = fs.list_dir(project_path).map_err(|err| {
        PipelineError::Validation(format!(
            "cannot list {}: {}",
            project_path.display(),
            err
        ))
    })?;

    for def in FRAMEWORK_DEFINITIONS {
        if !files.iter().any(|f| f == def.marker_file) {
            continue;
        }
        let content = match fs.read_to_string(&project_path.join(def.marker_file)) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!(marker = def.marker_file, "Unreadable marker file: {}", err);
                continue;
            }
        };
        if def.marker.accepts(&content, def.dependencies) {
            return Ok(Detection {
                framework: def.framework,
                config_file: def.marker_file.to_string(),
            });
        }
    }

    Err(PipelineError::Validation(format!(
        "no supported framework found in {}",
        project_path.display()
    )))
}

/// Replay a stored framework, or detect one from disk.
fn resolve(
    project_path: &Path,
    stored: Option<Framework>,
    fs: &dyn FileSystem,
) -> Result<Detection, PipelineError> {
    match stored {
        Some(framework) => Ok(Detection {
            framework,
            config_file: config_file_for(framework, project_path, fs),
        }),
        None => detect(project_path, fs),
    }
}

/// Marker file for a framework already known, preferring one present on disk.
fn config_file_for(framework: Framework, project_path: &Path, fs: &dyn FileSystem) -> String {
    let files = fs.list_dir(project_path).unwrap_or_default();
    let mut defs = definitions_for(framework).peekable();
    let fallback = defs
        .peek()
        .map(|def| def.marker_file)
        .unwrap_or_default()
        .to_string();
    defs.find(|def| files.iter().any(|f| f == def.marker_file))
        .map(|def| def.marker_file.to_string())
        .unwrap_or(fallback)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// FrameworkDispatcher: PROJECT_UPLOADED stage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct FrameworkDispatcher {
    bus: EventBus,
    projects: Arc<dyn ProjectStore>,
    fs: Arc<dyn FileSystem>,
}

impl FrameworkDispatcher {
    pub fn new(bus: EventBus, projects: Arc<dyn ProjectStore>, fs: Arc<dyn FileSystem>) -> Self {
        Self { bus, projects, fs }
    }
}

#[async_trait]
impl EventHandler for FrameworkDispatcher {
    fn name(&self) -> &'static str {
        "framework_dispatcher"
    }

    #[tracing::instrument(name = "Detect framework", skip_all)]
    async fn handle(&self, event: Event) -> Result<(), PipelineError> {
        let Event::ProjectUploaded(uploaded) = event else {
            return Ok(());
        };

        let mut project = self
            .projects
            .find(uploaded.project_id)
            .await
            .map_err(PipelineError::Store)?
            .ok_or_else(|| {
                PipelineError::Validation(format!("project {} not found", uploaded.project_id))
            })?;

        let stored = project
            .framework
            .as_deref()
            .and_then(|f| f.parse::<Framework>().ok());

        let fs = self.fs.clone();
        let project_path = uploaded.project_path.clone();
        let detection = tokio::task::spawn_blocking(move || resolve(&project_path, stored, fs.as_ref()))
            .await
            .map_err(|err| PipelineError::Io(std::io::Error::other(err)))??;
        tracing::info!(
            framework = %detection.framework,
            config_file = %detection.config_file,
            replayed = stored.is_some(),
            "Framework resolved"
        );

        context::set(ContextKey::Framework, detection.framework.as_str());
        if stored.is_none() {
            project.framework = Some(detection.framework.as_str().to_string());
            self.projects
                .update(project)
                .await
                .map_err(PipelineError::Store)?;
        }

        self.bus.emit(Event::FrameworkDetected(FrameworkDetected {
            project_path: uploaded.project_path,
            project_id: uploaded.project_id,
            framework: detection.framework,
            config_file: detection.config_file,
        }));
        Ok(())
    }
}
