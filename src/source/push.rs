use super::GitClient;
use crate::context::{self, ContextKey};
use crate::db::ProjectStore;
use crate::errors::PipelineError;
use crate::events::{BuildSource, Event, EventBus, EventHandler, SourceCodeReady};
use crate::pipeline::DeploymentLocks;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

/// `PUSH_EVENT_RECEIVED` stage: bring the checkout up to date and hand it to the builder.
pub struct PushSync {
    bus: EventBus,
    projects: Arc<dyn ProjectStore>,
    git: GitClient,
    locks: DeploymentLocks,
}

impl PushSync {
    pub fn new(
        bus: EventBus,
        projects: Arc<dyn ProjectStore>,
        git: GitClient,
        locks: DeploymentLocks,
    ) -> Self {
        Self {
            bus,
            projects,
            git,
            locks,
        }
    }
}

#[async_trait]
impl EventHandler for PushSync {
    fn name(&self) -> &'static str {
        "push_sync"
    }

    #[tracing::instrument(name = "Sync pushed branch", skip_all)]
    async fn handle(&self, event: Event) -> Result<(), PipelineError> {
        let Event::PushEventReceived(push) = event else {
            return Ok(());
        };

        let project = self
            .projects
            .find(push.project_id)
            .await
            .map_err(PipelineError::Store)?
            .ok_or_else(|| PipelineError::Validation(format!("project {} not found", push.project_id)))?;
        if project.branch != push.branch {
            return Err(PipelineError::Validation(format!(
                "push to {} does not match project branch {}",
                push.branch, project.branch
            )));
        }

        let path = PathBuf::from(&project.local_repo_path);
        {
            let _guard = self.locks.acquire(&project.repo_id, &project.branch).await;
            self.git.pull(&path, &project.branch).await?;
        }
        tracing::info!(
            repository = %push.repository,
            pusher = push.pusher.as_deref().unwrap_or("unknown"),
            "Repository synced"
        );

        context::set(ContextKey::RepositoryId, project.repo_id.as_str());
        context::set(ContextKey::Branch, project.branch.as_str());
        context::set(ContextKey::ProjectName, project.name.as_str());
        if let Some(message) = &push.commit_message {
            context::set(ContextKey::LastCommitMessage, message.as_str());
        }

        self.bus.emit(Event::SourceCodeReady(SourceCodeReady {
            project_path: path,
            project_id: project.id,
            source: BuildSource::for_project(&project),
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::process::mock::MockExecutor;
    use crate::context::PipelineContext;
    use crate::db::MemoryStore;
    use crate::events::testing::Recorder;
    use crate::events::{PushEventReceived, Topic, GENERATED_DOCKERFILE};
    use crate::models::Project;

    fn push(project_id: i32, branch: &str) -> Event {
        Event::PushEventReceived(PushEventReceived {
            project_id,
            repository: "acme/shop".into(),
            clone_url: "https://github.com/acme/shop.git".into(),
            branch: branch.into(),
            commit_message: Some("fix checkout".into()),
            pusher: Some("ada".into()),
        })
    }

    #[tokio::test]
    async fn test_push_pulls_then_emits_source_ready() {
        let store = Arc::new(MemoryStore::new());
        let mut project = Project::new(
            "acme/shop".into(),
            "main".into(),
            "Shop".into(),
            "/srv/acme-shop/main".into(),
        );
        project.framework = Some("nextjs".into());
        let project = store.insert_project(project).unwrap();

        let bus = EventBus::new();
        let (recorder, mut rx) = Recorder::new();
        bus.subscribe(Topic::SourceCodeReady, recorder);
        let executor = Arc::new(MockExecutor::default());
        let sync = PushSync::new(
            bus,
            store,
            GitClient::new(executor.clone(), None),
            DeploymentLocks::new(),
        );

        context::scope(PipelineContext::new(), sync.handle(push(project.id, "main")))
            .await
            .unwrap();

        assert_eq!(executor.calls(), vec!["git pull origin main".to_string()]);
        let (event, repo) = rx.recv().await.unwrap();
        assert_eq!(repo.as_deref(), Some("acme/shop"));
        assert_eq!(
            event,
            Event::SourceCodeReady(SourceCodeReady {
                project_path: PathBuf::from("/srv/acme-shop/main"),
                project_id: project.id,
                source: BuildSource::Dockerfile(GENERATED_DOCKERFILE.to_string()),
            })
        );
    }

    #[tokio::test]
    async fn test_failed_pull_stops_the_run() {
        let store = Arc::new(MemoryStore::new());
        let project = store
            .insert_project(Project::new(
                "acme/shop".into(),
                "main".into(),
                "Shop".into(),
                "/srv/acme-shop/main".into(),
            ))
            .unwrap();

        let bus = EventBus::new();
        let (recorder, mut rx) = Recorder::new();
        bus.subscribe(Topic::SourceCodeReady, recorder);
        let executor = Arc::new(MockExecutor::default());
        executor.fail_on("git pull", 1);
        let sync = PushSync::new(bus, store, GitClient::new(executor, None), DeploymentLocks::new());

        let err = context::scope(PipelineContext::new(), sync.handle(push(project.id, "main")))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ToolExecution { .. }));
        assert!(rx.try_recv().is_err());
    }
}
