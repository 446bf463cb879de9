use crate::builder::{BollardDaemon, ShellExecutor};
use crate::configuration::{QueueBackend, Settings};
use crate::connectors::{CloudflareClient, HttpNotifier, LogNotifier, Notifier};
use crate::db::{CustomDomainStore, PgStore, ProjectStore};
use crate::detector::RealFileSystem;
use crate::dns::{DnsJob, DnsWorker, HickoryResolver, PropagationChecker, ReqwestProbe};
use crate::domains::DomainAttacher;
use crate::events::EventBus;
use crate::frameworks::templates::DockerfileRenderer;
use crate::lifecycle::ContainerLifecycle;
use crate::logs::{self, LogGateway, LogHub, LogJob};
use crate::pipeline::{self, DeploymentLocks, PipelineServices};
use crate::queue::{AmqpQueue, JobQueue, MemoryQueue};
use crate::routes;
use crate::source::{GitClient, RepositoryImporter};
use actix_cors::Cors;
use actix_web::{dev::Server, middleware, web, App, HttpServer};
use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::PgPool;
use std::net::{IpAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;
use tracing_actix_web::TracingLogger;

/// What the HTTP surface needs.
#[derive(Clone)]
pub struct AppState {
    pub bus: EventBus,
    pub projects: Arc<dyn ProjectStore>,
    pub hub: Arc<LogHub>,
    pub webhook_secret: String,
}

pub fn run(listener: TcpListener, state: AppState) -> Result<Server, std::io::Error> {
    let bus = web::Data::new(state.bus);
    let projects = web::Data::new(state.projects);
    let hub = web::Data::new(state.hub);
    let secret = web::Data::new(routes::WebhookSecret(state.webhook_secret));

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .wrap(middleware::Compress::default())
            .wrap(Cors::permissive())
            .service(web::scope("/health_check").service(routes::health_check))
            .service(web::scope("/webhook").service(routes::push_handler))
            .service(web::resource("/logs/ws").route(web::get().to(routes::log_socket)))
            .app_data(bus.clone())
            .app_data(projects.clone())
            .app_data(hub.clone())
            .app_data(secret.clone())
    })
    .listen(listener)?
    .run();

    Ok(server)
}

fn job_queue<J>(settings: &Settings, queue: &str) -> anyhow::Result<Arc<dyn JobQueue<J>>>
where
    J: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let job_queue: Arc<dyn JobQueue<J>> = match settings.queue.backend {
        QueueBackend::Amqp => Arc::new(
            AmqpQueue::<J>::try_new(settings.amqp.connection_string(), queue)
                .with_context(|| format!("amqp queue {}", queue))?,
        ),
        QueueBackend::Memory => Arc::new(MemoryQueue::<J>::new()),
    };
    Ok(job_queue)
}

/// The running platform: HTTP server plus the entry points embedders drive directly.
pub struct Platform {
    pub server: Server,
    pub importer: Arc<RepositoryImporter>,
    pub domains: Arc<DomainAttacher>,
    pub lifecycle: Arc<ContainerLifecycle>,
    pub services: PipelineServices,
}

/// Wire stores, queues, workers and pipeline stages from `settings`, then start serving.
pub async fn build(
    settings: Settings,
    pg_pool: PgPool,
    listener: TcpListener,
) -> anyhow::Result<Platform> {
    let store = Arc::new(PgStore::new(pg_pool));
    store
        .migrate()
        .await
        .map_err(|err| anyhow::anyhow!(err))?;

    let log_queue = job_queue::<LogJob>(&settings, &settings.queue.log_queue)?;
    let dns_queue = job_queue::<DnsJob>(&settings, &settings.queue.dns_queue)?;

    let hub = Arc::new(LogHub::new());
    tokio::spawn(logs::run_log_worker(log_queue.clone(), hub.clone()));
    let gateway = LogGateway::new(log_queue);

    let executor = Arc::new(ShellExecutor);
    let services = PipelineServices {
        projects: store.clone(),
        deployments: store.clone(),
        executor: executor.clone(),
        daemon: Arc::new(BollardDaemon::connect().context("docker daemon")?),
        fs: Arc::new(RealFileSystem),
        renderer: Arc::new(DockerfileRenderer::new()?),
        gateway,
        git: GitClient::new(executor, settings.git.access_token.clone()),
        locks: DeploymentLocks::new(),
        registry: settings.docker.registry.clone(),
        container_port: settings.docker.container_port,
    };

    let bus = EventBus::new();
    let lifecycle = pipeline::register(&bus, &services);

    let notifier: Arc<dyn Notifier> = match &settings.notifications.url {
        Some(url) => Arc::new(HttpNotifier::new(url.clone())?),
        None => Arc::new(LogNotifier),
    };
    let server_ip: IpAddr = settings
        .dns
        .server_ip
        .parse()
        .with_context(|| format!("dns.server_ip {}", settings.dns.server_ip))?;
    let checker = PropagationChecker::new(
        Arc::new(HickoryResolver::new(Duration::from_millis(settings.dns.lookup_timeout_ms))),
        Arc::new(ReqwestProbe::new(Duration::from_secs(settings.dns.probe_timeout_secs))),
        server_ip,
    );
    let domain_store: Arc<dyn CustomDomainStore> = store.clone();
    tokio::spawn(DnsWorker::new(dns_queue.clone(), checker, domain_store.clone(), notifier).run());

    let domains = Arc::new(DomainAttacher::new(
        Arc::new(CloudflareClient::new(&settings.cloudflare)?),
        domain_store,
        dns_queue,
        settings.dns.server_ip.clone(),
        settings.dns.name_servers.clone(),
    ));
    let importer = Arc::new(RepositoryImporter::new(
        bus.clone(),
        services.projects.clone(),
        services.git.clone(),
        &settings.docker.projects_root,
    ));

    let server = run(
        listener,
        AppState {
            bus,
            projects: services.projects.clone(),
            hub,
            webhook_secret: settings.webhook.secret.clone(),
        },
    )?;
    tracing::info!("Platform started");

    Ok(Platform {
        server,
        importer,
        domains,
        lifecycle,
        services,
    })
}
