use crate::connectors::{DnsProvider, DnsRecordType, Zone};
use crate::db::CustomDomainStore;
use crate::dns::{registrable_domain, zone_candidates, DnsJob};
use crate::errors::PipelineError;
use crate::models::CustomDomain;
use crate::queue::JobQueue;
use regex::Regex;
use std::sync::{Arc, OnceLock};

const SSL_MODE: &str = "full";

fn is_valid_domain(domain: &str) -> bool {
    static DOMAIN: OnceLock<Regex> = OnceLock::new();
    let re = DOMAIN.get_or_init(|| {
        Regex::new(r"^([a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,63}$").expect("static regex")
    });
    domain.len() <= 253 && re.is_match(domain)
}

/// Points a custom domain at this server and schedules its propagation check.
pub struct DomainAttacher {
    provider: Arc<dyn DnsProvider>,
    domains: Arc<dyn CustomDomainStore>,
    queue: Arc<dyn JobQueue<DnsJob>>,
    server_ip: String,
    fallback_name_servers: Vec<String>,
}

impl DomainAttacher {
    pub fn new(
        provider: Arc<dyn DnsProvider>,
        domains: Arc<dyn CustomDomainStore>,
        queue: Arc<dyn JobQueue<DnsJob>>,
        server_ip: impl Into<String>,
        fallback_name_servers: Vec<String>,
    ) -> Self {
        Self {
            provider,
            domains,
            queue,
            server_ip: server_ip.into(),
            fallback_name_servers,
        }
    }

    /// The most specific zone the account already has for `domain`, else a new zone for its
    /// registered domain.
    async fn zone_for(&self, domain: &str) -> Result<Zone, PipelineError> {
        for candidate in zone_candidates(domain) {
            if let Some(zone) = self.provider.find_zone(&candidate).await? {
                return Ok(Zone {
                    name: if zone.name.is_empty() { candidate } else { zone.name },
                    ..zone
                });
            }
        }

        let apex = registrable_domain(domain);
        let zone = self.provider.ensure_zone(&apex).await?;
        Ok(Zone {
            name: if zone.name.is_empty() { apex } else { zone.name },
            ..zone
        })
    }

    #[tracing::instrument(name = "Attach custom domain", skip(self))]
    pub async fn attach(&self, project_id: i32, domain: &str) -> Result<CustomDomain, PipelineError> {
        let domain = domain.trim().trim_end_matches('.').to_ascii_lowercase();
        if !is_valid_domain(&domain) {
            return Err(PipelineError::Validation(format!("invalid domain {}", domain)));
        }
        if self
            .domains
            .find_by_domain(&domain)
            .await
            .map_err(PipelineError::Store)?
            .is_some()
        {
            return Err(PipelineError::Validation(format!(
                "domain {} is already attached",
                domain
            )));
        }

        let zone = self.zone_for(&domain).await?;
        let a_record_id = self
            .provider
            .ensure_record(&zone.id, DnsRecordType::A, &domain, &self.server_ip)
            .await?;
        let cname_record_id = self
            .provider
            .ensure_record(
                &zone.id,
                DnsRecordType::Cname,
                &format!("www.{}", domain),
                &domain,
            )
            .await?;
        self.provider.set_ssl_mode(&zone.id, SSL_MODE).await?;

        let custom_domain = self
            .domains
            .insert(CustomDomain::new(
                project_id,
                domain.clone(),
                zone.id.clone(),
                a_record_id.clone(),
                cname_record_id.clone(),
            ))
            .await
            .map_err(PipelineError::Store)?;

        let name_servers = if zone.name_servers.is_empty() {
            self.fallback_name_servers.clone()
        } else {
            zone.name_servers
        };
        self.queue
            .enqueue(DnsJob {
                domain,
                project_id,
                zone_id: zone.id,
                zone_name: zone.name,
                a_record_id,
                cname_record_id,
                attempts: 0,
                name_servers,
            })
            .await?;
        tracing::info!(domain = %custom_domain.domain, "Propagation check scheduled");
        Ok(custom_domain)
    }
}
