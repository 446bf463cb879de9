use super::errors::ConnectorError;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// User facing notifications raised by background jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    DomainLive {
        project_id: i32,
        domain: String,
    },
    DomainPropagationFailed {
        project_id: i32,
        domain: String,
        attempts: u32,
    },
    DomainCheckErrored {
        project_id: i32,
        domain: String,
        message: String,
    },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), ConnectorError>;
}

/// Posts the notification as JSON to a configured endpoint.
pub struct HttpNotifier {
    url: String,
    http_client: reqwest::Client,
}

impl HttpNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, ConnectorError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| ConnectorError::Internal(format!("HTTP client error: {}", err)))?;
        Ok(Self {
            url: url.into(),
            http_client,
        })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    #[tracing::instrument(name = "Send notification", skip(self))]
    async fn notify(&self, notification: Notification) -> Result<(), ConnectorError> {
        let resp = self
            .http_client
            .post(&self.url)
            .json(&notification)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(ConnectorError::from_status(status, body))
    }
}

/// Fallback when no endpoint is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), ConnectorError> {
        tracing::info!(?notification, "Notification");
        Ok(())
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingNotifier {
        pub sent: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, notification: Notification) -> Result<(), ConnectorError> {
            self.sent.lock().unwrap().push(notification);
            Ok(())
        }
    }
}
