use serde;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub app_port: u16,
    pub app_host: String,
    pub amqp: AmqpSettings,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub docker: DockerSettings,
    #[serde(default)]
    pub git: GitSettings,
    #[serde(default)]
    pub webhook: WebhookSettings,
    #[serde(default)]
    pub dns: DnsSettings,
    #[serde(default)]
    pub cloudflare: CloudflareSettings,
    #[serde(default)]
    pub notifications: NotificationSettings,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub database_name: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct AmqpSettings {
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: u16,
}

/// Which backend carries the log and DNS job queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    Amqp,
    Memory,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct QueueSettings {
    pub backend: QueueBackend,
    pub log_queue: String,
    pub dns_queue: String,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Amqp,
            log_queue: "dockhand.logs".to_string(),
            dns_queue: "dockhand.dns".to_string(),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct DockerSettings {
    /// Directory where imported repositories are checked out
    pub projects_root: String,
    /// Optional registry prefix for built images (e.g. registry.local:5000)
    pub registry: Option<String>,
    /// Port the application listens on inside the container
    pub container_port: u16,
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            projects_root: "/var/lib/dockhand/projects".to_string(),
            registry: None,
            container_port: 3000,
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct GitSettings {
    #[serde(default)]
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct WebhookSettings {
    #[serde(default)]
    pub secret: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct DnsSettings {
    /// Public IP every custom domain must resolve to
    pub server_ip: String,
    /// Name servers the zone is expected to be delegated to
    #[serde(default)]
    pub name_servers: Vec<String>,
    pub lookup_timeout_ms: u64,
    pub probe_timeout_secs: u64,
}

impl Default for DnsSettings {
    fn default() -> Self {
        Self {
            server_ip: "127.0.0.1".to_string(),
            name_servers: Vec::new(),
            lookup_timeout_ms: 5000,
            probe_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CloudflareSettings {
    pub base_url: String,
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub api_token: String,
    pub timeout_secs: u64,
}

impl Default for CloudflareSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.cloudflare.com/client/v4".to_string(),
            account_id: String::new(),
            api_token: String::new(),
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct NotificationSettings {
    /// Endpoint receiving user notifications; notifications are only logged when unset
    #[serde(default)]
    pub url: Option<String>,
}

impl DatabaseSettings {
    // Connection string: postgresql://<username>:<password>@<host>:<port>/<database_name>
    pub fn connection_string(&self) -> String {
        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name,
        )
    }
}

impl AmqpSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}/%2f",
            self.username, self.password, self.host, self.port,
        )
    }
}

fn secret_from_env(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|value| !value.trim().is_empty())
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let settings = config::Config::builder()
        .add_source(config::File::with_name("configuration"))
        .add_source(config::Environment::with_prefix("DOCKHAND").separator("__"))
        .build()?;

    let mut config: Settings = settings.try_deserialize()?;

    // Secrets never live in the yaml file
    if let Some(secret) = secret_from_env("WEBHOOK_SECRET") {
        config.webhook.secret = secret;
    }
    if let Some(token) = secret_from_env("GIT_ACCESS_TOKEN") {
        config.git.access_token = Some(token);
    }
    if let Some(token) = secret_from_env("CLOUDFLARE_API_TOKEN") {
        config.cloudflare.api_token = token;
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amqp_connection_string() {
        let amqp = AmqpSettings {
            username: "guest".to_string(),
            password: "secret".to_string(),
            host: "mq".to_string(),
            port: 5672,
        };
        assert_eq!(amqp.connection_string(), "amqp://guest:secret@mq:5672/%2f");
    }

    #[test]
    fn test_queue_settings_default_to_amqp() {
        let queue = QueueSettings::default();
        assert_eq!(queue.backend, QueueBackend::Amqp);
        assert_eq!(queue.log_queue, "dockhand.logs");
    }

    #[test]
    fn test_dns_settings_deserialize_with_name_servers() {
        let yaml = r#"
server_ip: "203.0.113.10"
name_servers: ["ns1.example.net", "ns2.example.net"]
lookup_timeout_ms: 2000
probe_timeout_secs: 5
"#;
        let dns: DnsSettings = config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(dns.server_ip, "203.0.113.10");
        assert_eq!(dns.name_servers.len(), 2);
        assert_eq!(dns.lookup_timeout_ms, 2000);
    }
}
