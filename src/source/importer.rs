use super::{checkout_dir, GitClient};
use crate::context::{self, ContextKey};
use crate::db::ProjectStore;
use crate::errors::PipelineError;
use crate::events::{Event, EventBus, ProjectUploaded};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Entry point for a newly imported repository: fresh clone, then `PROJECT_UPLOADED`.
pub struct RepositoryImporter {
    bus: EventBus,
    projects: Arc<dyn ProjectStore>,
    git: GitClient,
    projects_root: PathBuf,
}

impl RepositoryImporter {
    pub fn new(
        bus: EventBus,
        projects: Arc<dyn ProjectStore>,
        git: GitClient,
        projects_root: impl AsRef<Path>,
    ) -> Self {
        Self {
            bus,
            projects,
            git,
            projects_root: projects_root.as_ref().to_path_buf(),
        }
    }

    /// Clone the project's branch into its checkout directory, replacing whatever was there,
    /// and start a pipeline run. The returned handles finish when the first stage has run.
    #[tracing::instrument(name = "Import repository", skip(self))]
    pub async fn import(
        &self,
        project_id: i32,
        clone_url: &str,
    ) -> Result<Vec<JoinHandle<()>>, PipelineError> {
        let mut project = self
            .projects
            .find(project_id)
            .await
            .map_err(PipelineError::Store)?
            .ok_or_else(|| PipelineError::Validation(format!("project {} not found", project_id)))?;
        if project.local_repo_path.trim().is_empty() {
            let dir = checkout_dir(&self.projects_root, &project.repo_id, &project.branch);
            project.local_repo_path = dir.to_string_lossy().into_owned();
            project = self
                .projects
                .update(project)
                .await
                .map_err(PipelineError::Store)?;
        }

        let path = PathBuf::from(&project.local_repo_path);
        if tokio::fs::try_exists(&path).await? {
            tracing::info!(path = %path.display(), "Removing previous checkout");
            tokio::fs::remove_dir_all(&path).await?;
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.git.clone_branch(clone_url, &project.branch, &path).await?;

        let handles = context::init(async {
            context::set(ContextKey::RepositoryId, project.repo_id.as_str());
            context::set(ContextKey::Branch, project.branch.as_str());
            context::set(ContextKey::ProjectName, project.name.as_str());
            self.bus.emit(Event::ProjectUploaded(ProjectUploaded {
                project_path: path.clone(),
                project_id: project.id,
            }))
        })
        .await;
        Ok(handles)
    }
}
