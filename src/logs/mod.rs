//! Build and runtime log fan-out.
//!
//! Producers push [`LogJob`]s onto a durable queue; a single worker drains it into the
//! [`LogHub`], which forwards to live viewers or buffers for late ones.

mod hub;

pub use hub::{LogFrame, LogHub, LogSubscriber, SubscriptionId, MAX_BUFFERED_ENTRIES};

use crate::builder::LineSink;
use crate::db::DeploymentStore;
use crate::queue::{JobQueue, QueueError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogType {
    Build,
    Runtime,
}

impl LogType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Runtime => "runtime",
        }
    }
}

impl fmt::Display for LogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "build" => Ok(Self::Build),
            "runtime" => Ok(Self::Runtime),
            other => Err(format!("unknown log type {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogKey {
    pub repository_id: String,
    pub branch: String,
    pub log_type: LogType,
}

impl LogKey {
    pub fn new(repository_id: impl Into<String>, branch: impl Into<String>, log_type: LogType) -> Self {
        Self {
            repository_id: repository_id.into(),
            branch: branch.into(),
            log_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub message: String,
    pub complete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogJob {
    pub key: LogKey,
    pub entry: LogEntry,
}

/// Producer side of the log queue.
#[derive(Clone)]
pub struct LogGateway {
    queue: Arc<dyn JobQueue<LogJob>>,
}

impl LogGateway {
    pub fn new(queue: Arc<dyn JobQueue<LogJob>>) -> Self {
        Self { queue }
    }

    pub async fn publish(&self, key: &LogKey, message: impl Into<String>) -> Result<(), QueueError> {
        self.queue
            .enqueue(LogJob {
                key: key.clone(),
                entry: LogEntry {
                    message: message.into(),
                    complete: false,
                },
            })
            .await
    }

    /// Tell viewers the stream for `key` has ended.
    pub async fn complete(&self, key: &LogKey) -> Result<(), QueueError> {
        self.queue
            .enqueue(LogJob {
                key: key.clone(),
                entry: LogEntry {
                    message: String::new(),
                    complete: true,
                },
            })
            .await
    }
}

/// Line sink feeding the gateway and, for builds, the deployment's log history.
pub struct LogStream {
    gateway: LogGateway,
    key: LogKey,
    history: Option<(Arc<dyn DeploymentStore>, i32)>,
}

impl LogStream {
    pub fn runtime(gateway: LogGateway, key: LogKey) -> Self {
        Self {
            gateway,
            key,
            history: None,
        }
    }

    pub fn build(
        gateway: LogGateway,
        key: LogKey,
        deployments: Arc<dyn DeploymentStore>,
        deployment_id: i32,
    ) -> Self {
        Self {
            gateway,
            key,
            history: Some((deployments, deployment_id)),
        }
    }
}

#[async_trait]
impl LineSink for LogStream {
    async fn line(&self, line: &str) {
        if let Err(err) = self.gateway.publish(&self.key, line).await {
            tracing::warn!(log_type = %self.key.log_type, "Dropping log line: {}", err);
        }
        if let Some((deployments, deployment_id)) = &self.history {
            if let Err(err) = deployments
                .add_log(*deployment_id, line.trim_end_matches(['\r', '\n']))
                .await
            {
                tracing::warn!(deployment_id, "Failed to store log line: {}", err);
            }
        }
    }
}

/// Drain the log queue into the hub, one job at a time, in order.
pub async fn run_log_worker(queue: Arc<dyn JobQueue<LogJob>>, hub: Arc<LogHub>) {
    let mut consumer = match queue.consumer().await {
        Ok(consumer) => consumer,
        Err(err) => {
            tracing::error!("Log worker could not attach to queue: {}", err);
            return;
        }
    };
    tracing::info!("Log worker started");

    while let Some(next) = consumer.next().await {
        match next {
            Ok(delivery) => {
                hub.deliver(delivery.job.clone());
                if let Err(err) = delivery.ack().await {
                    tracing::error!("Failed to ack log job: {}", err);
                }
            }
            Err(err) => tracing::error!("Log worker receive error: {}", err),
        }
    }
    tracing::warn!("Log queue closed, worker exiting");
}
