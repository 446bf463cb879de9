//! Custom domain propagation checks.
//!
//! A [`DnsJob`] is checked once per delivery. When the domain is not reachable yet the job
//! is put back on the queue with a longer delay, until [`MAX_ATTEMPTS`] is reached.

mod probe;
mod resolver;

pub use probe::{HttpProbe, ReqwestProbe};
pub use resolver::{DnsResolver, HickoryResolver};

use crate::connectors::{Notification, Notifier};
use crate::db::CustomDomainStore;
use crate::errors::PipelineError;
use crate::queue::JobQueue;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

pub const MAX_ATTEMPTS: u32 = 144;
const BASE_DELAY: Duration = Duration::from_secs(10 * 60);
const MAX_DELAY: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsJob {
    pub domain: String,
    pub project_id: i32,
    pub zone_id: String,
    /// Apex of the provider zone, where delegation is checked. Empty for jobs queued
    /// before it was recorded.
    #[serde(default)]
    pub zone_name: String,
    pub a_record_id: String,
    pub cname_record_id: String,
    pub attempts: u32,
    /// Name servers the zone must be delegated to
    pub name_servers: Vec<String>,
}

/// `min(10 min * 2^(attempts + 1), 1 h)`
pub fn backoff_delay(attempts: u32) -> Duration {
    let factor = 2u32.checked_pow(attempts.saturating_add(1)).unwrap_or(u32::MAX);
    BASE_DELAY.checked_mul(factor).map_or(MAX_DELAY, |delay| delay.min(MAX_DELAY))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    NotYet,
    Propagated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Propagating,
    Succeeded,
    Failed,
}

/// What one tick did with a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Succeeded,
    Rescheduled { attempts: u32, delay: Duration },
    Failed,
    Errored(String),
}

impl TickOutcome {
    pub fn state(&self) -> JobState {
        match self {
            Self::Succeeded => JobState::Succeeded,
            Self::Rescheduled { .. } => JobState::Propagating,
            Self::Failed | Self::Errored(_) => JobState::Failed,
        }
    }
}

fn normalize_name_server(name: &str) -> String {
    name.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Second-level labels under which ccTLDs sell names, as in `example.co.uk`.
const SECOND_LEVEL_SUFFIXES: [&str; 9] = ["ac", "co", "com", "edu", "gov", "ltd", "net", "org", "plc"];

/// Best guess at the registered domain: `shop.example.com` -> `example.com`,
/// `shop.example.co.uk` -> `example.co.uk`. Only used when the provider has no zone yet.
pub fn registrable_domain(domain: &str) -> String {
    let labels: Vec<&str> = domain.trim_end_matches('.').split('.').collect();
    let keep = match labels.as_slice() {
        [.., second, tld] if tld.len() == 2 && SECOND_LEVEL_SUFFIXES.contains(second) => 3,
        _ => 2,
    };
    labels[labels.len().saturating_sub(keep)..].join(".")
}

/// Zones that could hold `domain`, most specific first, down to its registrable domain.
pub fn zone_candidates(domain: &str) -> Vec<String> {
    let domain = domain.trim_end_matches('.');
    let apex = registrable_domain(domain);
    let mut candidates = vec![domain.to_string()];
    let mut rest = domain;
    while rest.len() > apex.len() {
        match rest.split_once('.') {
            Some((_, parent)) => {
                rest = parent;
                candidates.push(rest.to_string());
            }
            None => break,
        }
    }
    candidates
}

/// A, NS and HTTP reachability check for one domain.
pub struct PropagationChecker {
    resolver: Arc<dyn DnsResolver>,
    probe: Arc<dyn HttpProbe>,
    server_ip: IpAddr,
}

impl PropagationChecker {
    pub fn new(resolver: Arc<dyn DnsResolver>, probe: Arc<dyn HttpProbe>, server_ip: IpAddr) -> Self {
        Self {
            resolver,
            probe,
            server_ip,
        }
    }

    pub async fn check(&self, job: &DnsJob) -> Propagation {
        match self.resolver.lookup_a(&job.domain).await {
            Ok(addresses) if !addresses.is_empty() => {}
            Ok(_) => {
                tracing::debug!(domain = %job.domain, "No A records yet");
                return Propagation::NotYet;
            }
            Err(err) => {
                tracing::debug!(domain = %job.domain, "A lookup failed: {}", err);
                return Propagation::NotYet;
            }
        }

        if !job.name_servers.is_empty() {
            let zone = if job.zone_name.is_empty() {
                registrable_domain(&job.domain)
            } else {
                job.zone_name.clone()
            };
            let found: Vec<String> = match self.resolver.lookup_ns(&zone).await {
                Ok(found) => found.iter().map(|ns| normalize_name_server(ns)).collect(),
                Err(err) => {
                    tracing::debug!(zone = %zone, "NS lookup failed: {}", err);
                    return Propagation::NotYet;
                }
            };
            let delegated = job
                .name_servers
                .iter()
                .map(|ns| normalize_name_server(ns))
                .all(|expected| found.contains(&expected));
            if !delegated {
                tracing::debug!(zone = %zone, ?found, "Zone not delegated yet");
                return Propagation::NotYet;
            }
        }

        if self.probe.reachable(&job.domain, self.server_ip).await {
            Propagation::Propagated
        } else {
            Propagation::NotYet
        }
    }
}

/// Consumes the DNS queue.
pub struct DnsWorker {
    queue: Arc<dyn JobQueue<DnsJob>>,
    checker: PropagationChecker,
    domains: Arc<dyn CustomDomainStore>,
    notifier: Arc<dyn Notifier>,
}

impl DnsWorker {
    pub fn new(
        queue: Arc<dyn JobQueue<DnsJob>>,
        checker: PropagationChecker,
        domains: Arc<dyn CustomDomainStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            queue,
            checker,
            domains,
            notifier,
        }
    }

    async fn notify(&self, notification: Notification) {
        if let Err(err) = self.notifier.notify(notification).await {
            tracing::warn!("Failed to send notification: {}", err);
        }
    }

    async fn advance(&self, job: &DnsJob) -> Result<TickOutcome, PipelineError> {
        match self.checker.check(job).await {
            Propagation::Propagated => {
                if let Some(domain) = self
                    .domains
                    .find_by_domain(&job.domain)
                    .await
                    .map_err(PipelineError::Store)?
                {
                    self.domains
                        .mark_live(domain.id)
                        .await
                        .map_err(PipelineError::Store)?;
                }
                tracing::info!(domain = %job.domain, attempts = job.attempts, "Domain is live");
                self.notify(Notification::DomainLive {
                    project_id: job.project_id,
                    domain: job.domain.clone(),
                })
                .await;
                Ok(TickOutcome::Succeeded)
            }
            Propagation::NotYet if job.attempts >= MAX_ATTEMPTS => {
                tracing::warn!(domain = %job.domain, attempts = job.attempts, "Giving up on domain");
                self.notify(Notification::DomainPropagationFailed {
                    project_id: job.project_id,
                    domain: job.domain.clone(),
                    attempts: job.attempts,
                })
                .await;
                Ok(TickOutcome::Failed)
            }
            Propagation::NotYet => {
                let delay = backoff_delay(job.attempts);
                let attempts = job.attempts + 1;
                self.queue
                    .enqueue_delayed(
                        DnsJob {
                            attempts,
                            ..job.clone()
                        },
                        delay,
                    )
                    .await?;
                tracing::info!(
                    domain = %job.domain,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Domain not propagated yet, rescheduled"
                );
                Ok(TickOutcome::Rescheduled { attempts, delay })
            }
        }
    }

    /// Handle one delivery of `job`.
    #[tracing::instrument(name = "DNS propagation tick", skip(self, job), fields(domain = %job.domain, attempts = job.attempts))]
    pub async fn tick(&self, job: &DnsJob) -> TickOutcome {
        match self.advance(job).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!("DNS check failed: {}", err);
                self.notify(Notification::DomainCheckErrored {
                    project_id: job.project_id,
                    domain: job.domain.clone(),
                    message: err.to_string(),
                })
                .await;
                TickOutcome::Errored(err.to_string())
            }
        }
    }

    pub async fn run(self) {
        let mut consumer = match self.queue.consumer().await {
            Ok(consumer) => consumer,
            Err(err) => {
                tracing::error!("DNS worker could not attach to queue: {}", err);
                return;
            }
        };
        tracing::info!("DNS worker started");

        while let Some(next) = consumer.next().await {
            match next {
                Ok(delivery) => {
                    self.tick(&delivery.job).await;
                    if let Err(err) = delivery.ack().await {
                        tracing::error!("Failed to ack DNS job: {}", err);
                    }
                }
                Err(err) => tracing::error!("DNS worker receive error: {}", err),
            }
        }
        tracing::warn!("DNS queue closed, worker exiting");
    }
}
