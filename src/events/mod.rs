//! In-process pub/sub connecting the pipeline stages.
//!
//! `PROJECT_UPLOADED -> FRAMEWORK_DETECTED.<fw> -> SOURCE_CODE_READY -> DEPLOYED`,
//! and for pushes `PUSH_EVENT_RECEIVED -> SOURCE_CODE_READY`.

use crate::context;
use crate::detector::Framework;
use crate::errors::PipelineError;
use crate::models;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tokio::task::JoinHandle;

/// Name of the Dockerfile generated for detected frameworks. A user's own `Dockerfile`
/// is never overwritten.
pub const GENERATED_DOCKERFILE: &str = "Dockerfile.dockhand";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    ProjectUploaded,
    FrameworkDetected(Framework),
    SourceCodeReady,
    PushEventReceived,
    Deployed,
}

impl Topic {
    pub fn as_str(&self) -> String {
        match self {
            Self::ProjectUploaded => "PROJECT_UPLOADED".to_string(),
            Self::FrameworkDetected(framework) => {
                format!("FRAMEWORK_DETECTED.{}", framework.as_str())
            }
            Self::SourceCodeReady => "SOURCE_CODE_READY".to_string(),
            Self::PushEventReceived => "PUSH_EVENT_RECEIVED".to_string(),
            Self::Deployed => "DEPLOYED".to_string(),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectUploaded {
    pub project_path: PathBuf,
    pub project_id: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameworkDetected {
    pub project_path: PathBuf,
    pub project_id: i32,
    pub framework: Framework,
    /// Marker file the framework was recognised by
    pub config_file: String,
}

/// What the builder should feed to the container runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildSource {
    Dockerfile(String),
    Compose(String),
}

impl BuildSource {
    /// Build source for a project whose files were already prepared by an earlier run.
    pub fn for_project(project: &models::Project) -> Self {
        if let Some(compose) = &project.docker_compose_file {
            return Self::Compose(compose.clone());
        }
        match project.framework.as_deref().and_then(|f| f.parse().ok()) {
            Some(Framework::Dockerfile) => Self::Dockerfile("Dockerfile".to_string()),
            Some(Framework::DockerCompose) => Self::Compose("docker-compose.yml".to_string()),
            _ => Self::Dockerfile(GENERATED_DOCKERFILE.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCodeReady {
    pub project_path: PathBuf,
    pub project_id: i32,
    pub source: BuildSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEventReceived {
    pub project_id: i32,
    pub repository: String,
    pub clone_url: String,
    pub branch: String,
    pub commit_message: Option<String>,
    pub pusher: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployed {
    pub project_id: i32,
    pub deployment_id: i32,
    pub container_name: String,
    /// `None` for compose projects, which publish their own ports.
    pub host_port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    ProjectUploaded(ProjectUploaded),
    FrameworkDetected(FrameworkDetected),
    SourceCodeReady(SourceCodeReady),
    PushEventReceived(PushEventReceived),
    Deployed(Deployed),
}

impl Event {
    pub fn topic(&self) -> Topic {
        match self {
            Self::ProjectUploaded(_) => Topic::ProjectUploaded,
            Self::FrameworkDetected(e) => Topic::FrameworkDetected(e.framework),
            Self::SourceCodeReady(_) => Topic::SourceCodeReady,
            Self::PushEventReceived(_) => Topic::PushEventReceived,
            Self::Deployed(_) => Topic::Deployed,
        }
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, event: Event) -> Result<(), PipelineError>;
}

/// Topic keyed subscriber table. Cloning shares the table.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<HashMap<Topic, Vec<Arc<dyn EventHandler>>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, topic: Topic, handler: Arc<dyn EventHandler>) {
        tracing::debug!(topic = %topic, handler = handler.name(), "Subscribing handler");
        match self.subscribers.write() {
            Ok(mut subscribers) => subscribers.entry(topic).or_default().push(handler),
            Err(err) => tracing::error!("subscriber table poisoned: {}", err),
        }
    }

    fn handlers_for(&self, topic: Topic) -> Vec<Arc<dyn EventHandler>> {
        self.subscribers
            .read()
            .map(|subscribers| subscribers.get(&topic).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Fire-and-forget. Each handler runs on its own task with a copy of the caller's
    /// context scope; failures are logged here and never reach the emitter.
    pub fn emit(&self, event: Event) -> Vec<JoinHandle<()>> {
        let topic = event.topic();
        let handlers = self.handlers_for(topic);
        if handlers.is_empty() {
            tracing::warn!(topic = %topic, "No handlers subscribed");
        }

        let ctx = context::snapshot().unwrap_or_default();
        handlers
            .into_iter()
            .map(|handler| {
                let event = event.clone();
                let ctx = ctx.clone();
                tokio::spawn(context::scope(ctx, run_handler(handler, event)))
            })
            .collect()
    }

    /// Run the subscribed handlers in order, awaiting each, in the caller's scope.
    pub async fn dispatch(&self, event: Event) {
        for handler in self.handlers_for(event.topic()) {
            run_handler(handler, event.clone()).await;
        }
    }
}

async fn run_handler(handler: Arc<dyn EventHandler>, event: Event) {
    let topic = event.topic();
    match handler.handle(event).await {
        Ok(()) => tracing::debug!(topic = %topic, handler = handler.name(), "Handled event"),
        Err(err) if err.is_validation() => {
            tracing::warn!(topic = %topic, handler = handler.name(), "Stage aborted: {}", err)
        }
        Err(err) => {
            tracing::error!(topic = %topic, handler = handler.name(), "Handler failed: {}", err)
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::Recorder;
    use super::*;
    use crate::context::{ContextKey, PipelineContext};

    struct Failing;

    #[async_trait]
    impl EventHandler for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn handle(&self, _event: Event) -> Result<(), PipelineError> {
            Err(PipelineError::Validation("nothing recognised".into()))
        }
    }

    fn deployed() -> Event {
        Event::Deployed(Deployed {
            project_id: 1,
            deployment_id: 2,
            container_name: "shop-main-abcd".into(),
            host_port: Some(49153),
        })
    }

    #[test]
    fn test_framework_topics_are_namespaced() {
        assert_eq!(
            Topic::FrameworkDetected(Framework::NextJs).as_str(),
            "FRAMEWORK_DETECTED.nextjs"
        );
        assert_eq!(Topic::SourceCodeReady.to_string(), "SOURCE_CODE_READY");
    }

    #[tokio::test]
    async fn test_emit_copies_scope_and_swallows_errors() {
        let bus = EventBus::new();
        let (recorder, mut rx) = Recorder::new();
        bus.subscribe(Topic::Deployed, Arc::new(Failing));
        bus.subscribe(Topic::Deployed, recorder);

        let ctx = PipelineContext::new().with(ContextKey::RepositoryId, "acme/shop");
        let handles = context::scope(ctx, async { bus.emit(deployed()) }).await;
        for handle in handles {
            handle.await.unwrap();
        }

        let (event, repo) = rx.recv().await.unwrap();
        assert_eq!(event, deployed());
        assert_eq!(repo.as_deref(), Some("acme/shop"));
    }

    #[tokio::test]
    async fn test_emit_to_other_topic_reaches_nobody() {
        let bus = EventBus::new();
        let (recorder, mut rx) = Recorder::new();
        bus.subscribe(Topic::FrameworkDetected(Framework::Flask), recorder);
        bus.dispatch(deployed()).await;
        assert!(rx.try_recv().is_err());
    }
}
