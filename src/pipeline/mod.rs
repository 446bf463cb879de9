//! Subscribes every stage to the bus.

mod locks;

pub use locks::DeploymentLocks;

use crate::builder::{BuildStage, CommandExecutor, ContainerDaemon, ImageBuilder};
use crate::db::{DeploymentStore, ProjectStore};
use crate::detector::{FileSystem, FrameworkDispatcher};
use crate::events::{EventBus, Topic};
use crate::frameworks::{self, templates::DockerfileRenderer, FrameworkStage};
use crate::lifecycle::ContainerLifecycle;
use crate::logs::LogGateway;
use crate::source::{GitClient, PushSync};
use std::sync::Arc;

/// Collaborators shared by the pipeline stages.
#[derive(Clone)]
pub struct PipelineServices {
    pub projects: Arc<dyn ProjectStore>,
    pub deployments: Arc<dyn DeploymentStore>,
    pub executor: Arc<dyn CommandExecutor>,
    pub daemon: Arc<dyn ContainerDaemon>,
    pub fs: Arc<dyn FileSystem>,
    pub renderer: Arc<DockerfileRenderer>,
    pub gateway: LogGateway,
    pub git: GitClient,
    pub locks: DeploymentLocks,
    pub registry: Option<String>,
    pub container_port: u16,
}

impl PipelineServices {
    pub fn lifecycle(&self) -> Arc<ContainerLifecycle> {
        Arc::new(ContainerLifecycle::new(
            self.executor.clone(),
            self.daemon.clone(),
            self.gateway.clone(),
            self.container_port,
        ))
    }
}

/// Wire `PROJECT_UPLOADED -> FRAMEWORK_DETECTED.<fw> -> SOURCE_CODE_READY -> DEPLOYED` and
/// `PUSH_EVENT_RECEIVED -> SOURCE_CODE_READY` onto `bus`.
pub fn register(bus: &EventBus, services: &PipelineServices) -> Arc<ContainerLifecycle> {
    bus.subscribe(
        Topic::ProjectUploaded,
        Arc::new(FrameworkDispatcher::new(
            bus.clone(),
            services.projects.clone(),
            services.fs.clone(),
        )),
    );

    for (framework, handler) in frameworks::registry(services.renderer.clone(), services.container_port) {
        bus.subscribe(
            Topic::FrameworkDetected(framework),
            Arc::new(FrameworkStage::new(
                bus.clone(),
                services.projects.clone(),
                handler,
            )),
        );
    }

    let lifecycle = services.lifecycle();
    bus.subscribe(
        Topic::SourceCodeReady,
        Arc::new(BuildStage::new(
            bus.clone(),
            services.projects.clone(),
            services.deployments.clone(),
            ImageBuilder::new(
                services.executor.clone(),
                services.gateway.clone(),
                services.deployments.clone(),
            ),
            services.daemon.clone(),
            lifecycle.clone(),
            services.gateway.clone(),
            services.locks.clone(),
            services.registry.clone(),
            services.container_port,
        )),
    );

    bus.subscribe(
        Topic::PushEventReceived,
        Arc::new(PushSync::new(
            bus.clone(),
            services.projects.clone(),
            services.git.clone(),
            services.locks.clone(),
        )),
    );

    tracing::info!("Pipeline stages registered");
    lifecycle
}
