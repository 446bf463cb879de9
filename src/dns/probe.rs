use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Is anything answering HTTP for `domain` at `ip`?
#[async_trait]
pub trait HttpProbe: Send + Sync {
    async fn reachable(&self, domain: &str, ip: IpAddr) -> bool;
}

/// Tries HTTPS, then HTTP, pinning `domain` to the server's address. Any response counts,
/// including error statuses and redirects.
pub struct ReqwestProbe {
    timeout: Duration,
    https_port: u16,
    http_port: u16,
}

impl ReqwestProbe {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            https_port: 443,
            http_port: 80,
        }
    }

    pub fn with_ports(timeout: Duration, https_port: u16, http_port: u16) -> Self {
        Self {
            timeout,
            https_port,
            http_port,
        }
    }

    async fn try_scheme(&self, scheme: &str, port: u16, domain: &str, ip: IpAddr) -> bool {
        let client = match reqwest::Client::builder()
            .resolve(domain, SocketAddr::new(ip, port))
            .timeout(self.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(true)
            .build()
        {
            Ok(client) => client,
            Err(err) => {
                tracing::warn!("Failed to build probe client: {}", err);
                return false;
            }
        };

        let url = format!("{}://{}:{}/", scheme, domain, port);
        match client.get(&url).send().await {
            Ok(resp) => {
                tracing::debug!(url, status = %resp.status(), "Probe answered");
                true
            }
            Err(err) => {
                tracing::debug!(url, "Probe failed: {}", err);
                false
            }
        }
    }
}

#[async_trait]
impl HttpProbe for ReqwestProbe {
    async fn reachable(&self, domain: &str, ip: IpAddr) -> bool {
        self.try_scheme("https", self.https_port, domain, ip).await
            || self.try_scheme("http", self.http_port, domain, ip).await
    }
}
