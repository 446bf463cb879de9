use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;

#[async_trait]
pub trait DnsResolver: Send + Sync {
    async fn lookup_a(&self, name: &str) -> Result<Vec<IpAddr>, String>;

    async fn lookup_ns(&self, name: &str) -> Result<Vec<String>, String>;
}

/// Uncached resolver with a fixed per-lookup timeout.
pub struct HickoryResolver {
    resolver: TokioAsyncResolver,
    timeout: Duration,
}

impl HickoryResolver {
    pub fn new(timeout: Duration) -> Self {
        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        opts.attempts = 1;
        opts.cache_size = 0;
        Self {
            resolver: TokioAsyncResolver::tokio(ResolverConfig::default(), opts),
            timeout,
        }
    }

    async fn bounded<T, E, F>(&self, name: &str, lookup: F) -> Result<T, String>
    where
        F: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        match tokio::time::timeout(self.timeout, lookup).await {
            Ok(Ok(found)) => Ok(found),
            Ok(Err(err)) => Err(format!("{}: {}", name, err)),
            Err(_) => Err(format!("{}: lookup timed out", name)),
        }
    }
}

#[async_trait]
impl DnsResolver for HickoryResolver {
    async fn lookup_a(&self, name: &str) -> Result<Vec<IpAddr>, String> {
        let found = self.bounded(name, self.resolver.lookup_ip(name)).await?;
        Ok(found.iter().filter(IpAddr::is_ipv4).collect())
    }

    async fn lookup_ns(&self, name: &str) -> Result<Vec<String>, String> {
        let found = self.bounded(name, self.resolver.ns_lookup(name)).await?;
        Ok(found.iter().map(|ns| ns.to_string()).collect())
    }
}
