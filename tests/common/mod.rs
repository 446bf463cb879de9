#![allow(dead_code)]

use async_trait::async_trait;
use dockhand::builder::{CommandExecutor, CommandSpec, ContainerDaemon, LineSink};
use dockhand::db::MemoryStore;
use dockhand::errors::PipelineError;
use dockhand::events::{Event, EventBus, EventHandler};
use dockhand::logs::LogHub;
use dockhand::startup::{run, AppState};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub const WEBHOOK_SECRET: &str = "it-is-a-secret";

pub struct TestApp {
    pub address: String,
    pub store: Arc<MemoryStore>,
    pub bus: EventBus,
    pub hub: Arc<LogHub>,
}

// we have to run server in another thread
pub async fn spawn_app() -> TestApp {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    let store = Arc::new(MemoryStore::new());
    let bus = EventBus::new();
    let hub = Arc::new(LogHub::new());

    let server = run(
        listener,
        AppState {
            bus: bus.clone(),
            projects: store.clone(),
            hub: hub.clone(),
            webhook_secret: WEBHOOK_SECRET.to_string(),
        },
    )
    .expect("Failed to bind address.");
    let _ = tokio::spawn(server);

    TestApp {
        address,
        store,
        bus,
        hub,
    }
}

/// `sha256=<hex>` the way GitHub signs deliveries.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Forwards every event it handles.
pub struct Recorder {
    tx: mpsc::UnboundedSender<Event>,
}

impl Recorder {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl EventHandler for Recorder {
    fn name(&self) -> &'static str {
        "recorder"
    }

    async fn handle(&self, event: Event) -> Result<(), PipelineError> {
        let _ = self.tx.send(event);
        Ok(())
    }
}

/// Records every command. `git clone` materialises `fixture` files into the destination,
/// streaming commands emit one line of output.
#[derive(Default)]
pub struct FakeShell {
    calls: Mutex<Vec<String>>,
    fixture: Vec<(String, String)>,
}

impl FakeShell {
    pub fn with_fixture(files: &[(&str, &str)]) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fixture: files
                .iter()
                .map(|(name, content)| (name.to_string(), content.to_string()))
                .collect(),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, cmd: &CommandSpec) {
        let line = std::iter::once(cmd.program.clone())
            .chain(cmd.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        self.calls.lock().unwrap().push(line);
    }
}

#[async_trait]
impl CommandExecutor for FakeShell {
    async fn run(&self, cmd: &CommandSpec) -> Result<String, PipelineError> {
        self.record(cmd);
        if cmd.program == "git" && cmd.args.first().map(String::as_str) == Some("clone") {
            if let Some(dest) = cmd.args.last() {
                let dest = Path::new(dest);
                std::fs::create_dir_all(dest)?;
                for (name, content) in &self.fixture {
                    std::fs::write(dest.join(name), content)?;
                }
            }
        }
        Ok(String::new())
    }

    async fn run_streaming(&self, cmd: &CommandSpec, sink: &dyn LineSink) -> Result<(), PipelineError> {
        self.record(cmd);
        sink.line(&format!("$ {} {}\n", cmd.program, cmd.args.join(" "))).await;
        Ok(())
    }
}

/// Daemon that "starts" every container on a fixed host port.
pub struct FakeDaemon {
    pub host_port: u16,
    pub started: Mutex<Vec<(String, String)>>,
}

impl FakeDaemon {
    pub fn new(host_port: u16) -> Self {
        Self {
            host_port,
            started: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ContainerDaemon for FakeDaemon {
    async fn start_container(
        &self,
        image: &str,
        name: &str,
        _container_port: u16,
        _project: &str,
    ) -> Result<u16, PipelineError> {
        self.started
            .lock()
            .unwrap()
            .push((image.to_string(), name.to_string()));
        Ok(self.host_port)
    }

    async fn pull_image(&self, _image: &str) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn push_image(&self, _image: &str) -> Result<(), PipelineError> {
        Ok(())
    }
}
