// src/discovery/dns.rs
use super::Lookup;
use crate::error::{DiscoverError, Result};
use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use std::net::{IpAddr, SocketAddr};

/// Resolves a name to all of its A/AAAA records, each paired with the
/// configured port.
pub struct DnsLookup {
    resolver: TokioAsyncResolver,
    host: String,
    port: u16,
}

impl DnsLookup {
    pub fn new(host: &str, port: u16) -> Result<Self> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|e| DiscoverError::Lookup(e.to_string()))?;

        Ok(Self {
            resolver,
            host: host.to_string(),
            port,
        })
    }
}

#[async_trait]
impl Lookup for DnsLookup {
    async fn lookup(&self) -> anyhow::Result<Vec<String>> {
        if let Ok(ip) = self.host.parse::<IpAddr>() {
            return Ok(vec![SocketAddr::new(ip, self.port).to_string()]);
        }

        let ips = self.resolver.lookup_ip(self.host.as_str()).await?;
        Ok(ips
            .iter()
            .map(|ip| SocketAddr::new(ip, self.port).to_string())
            .collect())
    }

    fn name(&self) -> String {
        format!("dns://{}:{}", self.host, self.port)
    }
}
