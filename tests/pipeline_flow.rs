mod common;

use common::{FakeDaemon, FakeShell, Recorder};
use dockhand::db::{DeploymentStore, MemoryStore, ProjectStore};
use dockhand::detector::RealFileSystem;
use dockhand::events::{Event, EventBus, PushEventReceived, Topic, GENERATED_DOCKERFILE};
use dockhand::frameworks::templates::DockerfileRenderer;
use dockhand::lifecycle::rollback_project;
use dockhand::logs::{self, LogFrame, LogGateway, LogHub, LogJob, LogKey, LogSubscriber, LogType};
use dockhand::models::{DeploymentStatus, Project, ProjectStatus};
use dockhand::pipeline::{self, DeploymentLocks, PipelineServices};
use dockhand::queue::{JobQueue, MemoryQueue};
use dockhand::source::{GitClient, RepositoryImporter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};

const PACKAGE_JSON: &str =
    r#"{"name": "shop", "scripts": {"start": "node server.js"}, "dependencies": {"express": "4.18.2"}}"#;

struct Harness {
    bus: EventBus,
    store: Arc<MemoryStore>,
    shell: Arc<FakeShell>,
    hub: Arc<LogHub>,
    services: PipelineServices,
    importer: RepositoryImporter,
    deployed: UnboundedReceiver<Event>,
    root: tempfile::TempDir,
}

fn harness() -> Harness {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let shell = Arc::new(FakeShell::with_fixture(&[
        ("package.json", PACKAGE_JSON),
        ("server.js", "require('express')().listen(3000)"),
    ]));

    let log_queue: Arc<dyn JobQueue<LogJob>> = Arc::new(MemoryQueue::new());
    let hub = Arc::new(LogHub::new());
    tokio::spawn(logs::run_log_worker(log_queue.clone(), hub.clone()));

    let git = GitClient::new(shell.clone(), None);
    let services = PipelineServices {
        projects: store.clone(),
        deployments: store.clone(),
        executor: shell.clone(),
        daemon: Arc::new(FakeDaemon::new(49153)),
        fs: Arc::new(RealFileSystem),
        renderer: Arc::new(DockerfileRenderer::new().unwrap()),
        gateway: LogGateway::new(log_queue),
        git: git.clone(),
        locks: DeploymentLocks::new(),
        registry: None,
        container_port: 3000,
    };

    let bus = EventBus::new();
    pipeline::register(&bus, &services);
    let (recorder, deployed) = Recorder::new();
    bus.subscribe(Topic::Deployed, recorder);

    let importer = RepositoryImporter::new(bus.clone(), store.clone(), git, root.path());

    Harness {
        bus,
        store,
        shell,
        hub,
        services,
        importer,
        deployed,
        root,
    }
}

async fn next_deployed(rx: &mut UnboundedReceiver<Event>) -> dockhand::events::Deployed {
    match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
        Ok(Some(Event::Deployed(deployed))) => deployed,
        other => panic!("expected a deployment, got {:?}", other),
    }
}

async fn frames_until_complete(rx: &mut UnboundedReceiver<LogFrame>) -> Vec<LogFrame> {
    let mut frames = Vec::new();
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("log stream did not complete")
            .expect("log hub dropped the viewer");
        let done = frame.event == "complete";
        frames.push(frame);
        if done {
            return frames;
        }
    }
}

#[tokio::test]
async fn imported_express_project_goes_live() {
    let mut h = harness();
    let project = h
        .store
        .insert_project(Project::new("acme/shop".into(), "main".into(), "Shop".into(), String::new()))
        .unwrap();

    let (tx, mut build_log) = mpsc::unbounded_channel::<LogFrame>();
    let viewer: Arc<dyn LogSubscriber> = Arc::new(tx);
    h.hub
        .subscribe(LogKey::new("acme/shop", "main", LogType::Build), viewer);

    h.importer
        .import(project.id, "https://github.com/acme/shop.git")
        .await
        .unwrap();
    let deployed = next_deployed(&mut h.deployed).await;

    assert_eq!(deployed.project_id, project.id);
    assert_eq!(deployed.host_port, Some(49153));
    assert!(deployed.container_name.starts_with("shop-main-"));

    let project = h.store.find(project.id).await.unwrap().unwrap();
    assert_eq!(project.status, ProjectStatus::Running);
    assert_eq!(project.active_deployment_id, Some(deployed.deployment_id));
    assert_eq!(project.framework.as_deref(), Some("express"));

    let checkout = h.root.path().join("acme-shop").join("main");
    assert_eq!(project.local_repo_path, checkout.to_string_lossy());
    assert!(checkout.join(GENERATED_DOCKERFILE).exists());
    assert!(checkout.join(".dockerignore").exists());

    let deployment = h
        .store
        .find_by_id(deployed.deployment_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Deployed);
    assert_eq!(deployment.host_port, Some(49153));

    let calls = h.shell.calls();
    assert!(calls[0].starts_with("git clone --depth 1 --single-branch --branch main"));
    assert!(calls
        .iter()
        .any(|c| c.starts_with("docker build -t shop-main:") && c.ends_with("-f Dockerfile.dockhand .")));

    let frames = frames_until_complete(&mut build_log).await;
    assert!(frames.iter().any(|f| f.event == "build" && f.data.contains("docker build")));
    assert_eq!(frames.last().map(|f| f.event.as_str()), Some("complete"));
}

#[tokio::test]
async fn push_redeploys_and_rollback_restores_previous_build() {
    let mut h = harness();
    let project = h
        .store
        .insert_project(Project::new("acme/shop".into(), "main".into(), "Shop".into(), String::new()))
        .unwrap();

    h.importer
        .import(project.id, "https://github.com/acme/shop.git")
        .await
        .unwrap();
    let first = next_deployed(&mut h.deployed).await;

    dockhand::context::init(async {
        h.bus.emit(Event::PushEventReceived(PushEventReceived {
            project_id: project.id,
            repository: "acme/shop".into(),
            clone_url: "https://github.com/acme/shop.git".into(),
            branch: "main".into(),
            commit_message: Some("Bump express".into()),
            pusher: Some("octocat".into()),
        }))
    })
    .await;
    let second = next_deployed(&mut h.deployed).await;
    assert_ne!(first.deployment_id, second.deployment_id);
    assert_ne!(first.container_name, second.container_name);

    let calls = h.shell.calls();
    assert!(calls.iter().any(|c| c == "git pull origin main"));
    assert!(calls
        .iter()
        .any(|c| c == &format!("docker rm -f {}", first.container_name)));

    let project_now = h.store.find(project.id).await.unwrap().unwrap();
    assert_eq!(project_now.active_deployment_id, Some(second.deployment_id));

    let lifecycle = h.services.lifecycle();
    rollback_project(
        &lifecycle,
        h.store.as_ref(),
        h.store.as_ref(),
        &h.services.locks,
        project.id,
        first.deployment_id,
    )
    .await
    .unwrap();

    let project_now = h.store.find(project.id).await.unwrap().unwrap();
    assert_eq!(project_now.active_deployment_id, Some(first.deployment_id));
    assert_eq!(project_now.status, ProjectStatus::Running);

    let calls = h.shell.calls();
    assert!(calls
        .iter()
        .any(|c| c.starts_with(&format!("docker run -d --name {}", first.container_name))));
    assert!(calls
        .iter()
        .any(|c| c == &format!("docker rm -f {}", second.container_name)));

    // both rows survive the rollback
    assert_eq!(h.store.deployments_for(project.id).unwrap().len(), 2);
}
